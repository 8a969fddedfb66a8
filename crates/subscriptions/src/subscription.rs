use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use rxp_endpoint::{DeliveryError, Observer, ObserverId, SharedCredentials, SharedObserver};
use rxp_name::ResourceName;
use rxp_protocol::{Change, RequestKind, Status};

struct Pending {
    affected: Option<ResourceName>,
    change: Change,
}

enum State {
    Forwarding,
    Buffering(VecDeque<Pending>),
    Closed,
}

/// One observer following one pattern.
///
/// A subscription is itself an [`Observer`]: backends report into it and it
/// forwards to the subscriber under its own kind and pattern. While
/// buffering, change events are held back so that an initial snapshot can
/// be delivered first; terminal outcomes always flush the buffer. Once a
/// terminal outcome has been delivered nothing else is.
pub struct Subscription {
    credentials: SharedCredentials,
    observer: SharedObserver,
    pattern: ResourceName,
    wants_initial_read: bool,
    state: Mutex<State>,
}

impl Subscription {
    /// Creates a subscription in the forwarding state.
    #[must_use]
    pub fn new(
        credentials: SharedCredentials,
        observer: SharedObserver,
        pattern: ResourceName,
        wants_initial_read: bool,
    ) -> Self {
        Self {
            credentials,
            observer,
            pattern,
            wants_initial_read,
            state: Mutex::new(State::Forwarding),
        }
    }

    /// Registry key for `pattern` followed by `observer`.
    #[must_use]
    pub fn key(pattern: &ResourceName, observer: ObserverId) -> String {
        format!("{pattern}#{observer}")
    }

    /// This subscription's registry key.
    #[must_use]
    pub fn identity(&self) -> String {
        Self::key(&self.pattern, self.observer.id())
    }

    /// The followed pattern.
    #[must_use]
    pub const fn pattern(&self) -> &ResourceName {
        &self.pattern
    }

    /// Credentials captured when subscribing.
    #[must_use]
    pub fn credentials(&self) -> &SharedCredentials {
        &self.credentials
    }

    /// The subscriber.
    #[must_use]
    pub fn observer(&self) -> &SharedObserver {
        &self.observer
    }

    /// Whether an initial snapshot was requested.
    #[must_use]
    pub const fn wants_initial_read(&self) -> bool {
        self.wants_initial_read
    }

    /// `SUBSCRIBE_STATUS` with an initial read, `SUBSCRIBE` otherwise.
    #[must_use]
    pub const fn request_kind(&self) -> RequestKind {
        if self.wants_initial_read {
            RequestKind::SubscribeStatus
        } else {
            RequestKind::Subscribe
        }
    }

    /// Holds back change events until [`Self::stop_buffering`].
    pub fn start_buffering(&self) {
        let mut state = self.state.lock();
        if matches!(*state, State::Forwarding) {
            *state = State::Buffering(VecDeque::new());
        }
    }

    /// Delivers held-back events in order and resumes forwarding.
    ///
    /// # Errors
    ///
    /// Returns the first delivery error; later events are dropped.
    pub fn stop_buffering(&self) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        let State::Buffering(queued) = &mut *state else {
            return Ok(());
        };
        let queued = std::mem::take(queued);
        *state = State::Forwarding;

        // Keep the lock while draining so a concurrent event cannot overtake.
        for Pending { affected, change } in queued {
            self.forward(affected, change)?;
        }
        Ok(())
    }

    /// True between [`Self::start_buffering`] and [`Self::stop_buffering`].
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        matches!(*self.state.lock(), State::Buffering(_))
    }

    /// True once a terminal outcome was delivered.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), State::Closed)
    }

    /// Reports `status` for this subscription, ending it for the subscriber.
    ///
    /// # Errors
    ///
    /// Propagates delivery errors.
    pub fn fail(&self, status: Status) -> Result<(), DeliveryError> {
        self.on_error(self.request_kind(), Some(self.pattern.clone()), status)
    }

    /// Confirms the end of this subscription to the subscriber.
    ///
    /// # Errors
    ///
    /// Propagates delivery errors.
    pub fn finish(&self) -> Result<(), DeliveryError> {
        self.on_success(self.request_kind(), Some(self.pattern.clone()), Vec::new())
    }

    fn forward(&self, affected: Option<ResourceName>, change: Change) -> Result<(), DeliveryError> {
        self.observer
            .on_data(self.request_kind(), self.pattern.clone(), affected, change)
    }

    /// Flushes the buffer, closes and hands the terminal outcome to
    /// `deliver`, all under the state lock.
    fn end<F>(&self, deliver: F) -> Result<(), DeliveryError>
    where
        F: FnOnce(&dyn Observer) -> Result<(), DeliveryError>,
    {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Closed) {
            State::Closed => return Err(DeliveryError::Closed),
            State::Buffering(queued) => {
                for Pending { affected, change } in queued {
                    self.forward(affected, change)?;
                }
            }
            State::Forwarding => {}
        }
        deliver(self.observer.as_ref())
    }
}

impl Observer for Subscription {
    fn id(&self) -> ObserverId {
        self.observer.id()
    }

    fn on_success(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        affected: Vec<ResourceName>,
    ) -> Result<(), DeliveryError> {
        self.end(|observer| observer.on_success(request, resource, affected))
    }

    fn on_data(
        &self,
        request: RequestKind,
        resource: ResourceName,
        affected: Option<ResourceName>,
        change: Change,
    ) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed => Err(DeliveryError::Closed),
            _ if matches!(change, Change::Initial(_)) => {
                self.observer.on_data(request, resource, affected, change)
            }
            State::Buffering(queued) => {
                queued.push_back(Pending { affected, change });
                Ok(())
            }
            State::Forwarding => self.forward(affected, change),
        }
    }

    fn on_error(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        status: Status,
    ) -> Result<(), DeliveryError> {
        self.end(|observer| observer.on_error(request, resource, status))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("observer", &self.observer.id())
            .field("wants_initial_read", &self.wants_initial_read)
            .field("buffering", &self.is_buffering())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxp_endpoint::{ChannelObserver, Notification};
    use rxp_policy::AccessPolicy;
    use rxp_protocol::Data;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn subscription(initial: bool) -> (Subscription, UnboundedReceiver<Notification>) {
        let (observer, notifications) = ChannelObserver::new();
        let sub = Subscription::new(
            Arc::new(AccessPolicy::new()),
            observer,
            name("a/+"),
            initial,
        );
        (sub, notifications)
    }

    fn drain(notifications: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = notifications.try_recv() {
            out.push(notification);
        }
        out
    }

    fn initial(resource: &str) -> Notification {
        Notification::Data {
            request: RequestKind::SubscribeStatus,
            resource: name("a/+"),
            affected: Some(name(resource)),
            change: Change::Initial(Data::new("m", resource.to_owned())),
        }
    }

    fn updated(resource: &str) -> Notification {
        Notification::Data {
            request: RequestKind::SubscribeStatus,
            resource: name("a/+"),
            affected: Some(name(resource)),
            change: Change::Updated(Data::new("m", resource.to_owned())),
        }
    }

    fn deliver(sub: &Subscription, notification: Notification) -> Result<(), DeliveryError> {
        let Notification::Data {
            request,
            resource,
            affected,
            change,
        } = notification
        else {
            unreachable!()
        };
        sub.on_data(request, resource, affected, change)
    }

    fn send(sub: &Subscription, notification: Notification) {
        deliver(sub, notification).unwrap();
    }

    #[test]
    fn test_buffering_holds_changes_until_stopped() {
        let (sub, mut notifications) = subscription(true);

        sub.start_buffering();
        send(&sub, initial("a/x"));
        send(&sub, updated("a/y"));
        send(&sub, updated("a/z"));
        assert_eq!(drain(&mut notifications), vec![initial("a/x")]);

        sub.stop_buffering().unwrap();
        assert!(!sub.is_buffering());
        assert_eq!(
            drain(&mut notifications),
            vec![updated("a/y"), updated("a/z")]
        );

        send(&sub, updated("a/w"));
        assert_eq!(drain(&mut notifications), vec![updated("a/w")]);
    }

    #[test]
    fn test_error_flushes_buffer_first() {
        let (sub, mut notifications) = subscription(true);

        sub.start_buffering();
        send(&sub, updated("a/y"));
        sub.fail(Status::OutOfSync).unwrap();

        assert_eq!(
            drain(&mut notifications),
            vec![
                updated("a/y"),
                Notification::Error {
                    request: RequestKind::SubscribeStatus,
                    resource: Some(name("a/+")),
                    status: Status::OutOfSync,
                },
            ]
        );
    }

    #[test]
    fn test_success_flushes_buffer_first() {
        let (sub, mut notifications) = subscription(true);

        sub.start_buffering();
        send(&sub, updated("a/y"));
        sub.finish().unwrap();

        let delivered = drain(&mut notifications);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0], updated("a/y"));
        assert!(delivered[1].is_terminal());
    }

    #[test]
    fn test_nothing_is_delivered_after_terminal_outcome() {
        let (sub, mut notifications) = subscription(true);

        sub.fail(Status::OutOfSync).unwrap();
        assert!(sub.is_closed());

        assert_eq!(deliver(&sub, updated("a/1")), Err(DeliveryError::Closed));
        assert_eq!(deliver(&sub, initial("a/2")), Err(DeliveryError::Closed));
        assert_eq!(sub.finish(), Err(DeliveryError::Closed));

        assert_eq!(
            drain(&mut notifications),
            vec![Notification::Error {
                request: RequestKind::SubscribeStatus,
                resource: Some(name("a/+")),
                status: Status::OutOfSync,
            }]
        );
    }

    #[test]
    fn test_buffering_after_close_is_ignored() {
        let (sub, mut notifications) = subscription(true);

        sub.finish().unwrap();
        sub.start_buffering();
        assert!(!sub.is_buffering());
        sub.stop_buffering().unwrap();

        let delivered = drain(&mut notifications);
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].is_terminal());
    }

    #[test]
    fn test_changes_use_subscription_kind_and_pattern() {
        let (sub, mut notifications) = subscription(false);

        sub.on_data(
            RequestKind::Update,
            name("a/b"),
            Some(name("a/b")),
            Change::Deleted,
        )
        .unwrap();

        assert_eq!(
            drain(&mut notifications),
            vec![Notification::Data {
                request: RequestKind::Subscribe,
                resource: name("a/+"),
                affected: Some(name("a/b")),
                change: Change::Deleted,
            }]
        );
    }

    #[test]
    fn test_identity_is_pattern_and_observer() {
        let (sub, _notifications) = subscription(false);
        assert_eq!(sub.identity(), format!("a/+#{}", sub.id()));
        assert_eq!(sub.identity(), Subscription::key(&name("/a/+"), sub.id()));
    }
}
