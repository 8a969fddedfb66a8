//! In-memory (single node) backend for local development and tests.
//!
//! Resources live in an ordered map. Every mutation is published on a change
//! feed while the store is still locked, and a single feed task fans the
//! events out to subscriptions in that order. Requests themselves run on
//! spawned tasks, so their outcomes may arrive in any order.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;

pub use config::{CredentialRecheck, MemoryEndpointConfig};
pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rxp_endpoint::{
    DeliveryError, Endpoint, EndpointError, Observer, SharedCredentials, SharedObserver,
};
use rxp_name::ResourceName;
use rxp_policy::Credentials;
use rxp_protocol::{Change, Data, RequestKind, Status};
use rxp_subscriptions::{Subscription, SubscriptionRegistry};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Store = BTreeMap<ResourceName, Data>;

enum FeedEvent {
    Change {
        resource: ResourceName,
        change: Change,
    },
    Overflow {
        resource: ResourceName,
    },
}

struct Inner {
    config: MemoryEndpointConfig,
    store: RwLock<Store>,
    registry: Arc<SubscriptionRegistry>,
    feed: mpsc::UnboundedSender<FeedEvent>,
    runtime: Handle,
    shutdown: CancellationToken,
}

/// In-memory resource backend.
#[derive(Clone)]
pub struct MemoryEndpoint {
    inner: Arc<Inner>,
}

impl MemoryEndpoint {
    /// Creates an empty backend and spawns its change feed on the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a Tokio runtime.
    pub fn start(config: MemoryEndpointConfig) -> Result<Self, Error> {
        let runtime = Handle::try_current()?;
        let registry = Arc::new(SubscriptionRegistry::new());
        let shutdown = CancellationToken::new();
        let (feed, events) = mpsc::unbounded_channel();

        runtime.spawn(run_feed(
            Arc::clone(&registry),
            config.credential_recheck,
            events,
            shutdown.clone(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store: RwLock::new(Store::new()),
                registry,
                feed,
                runtime,
                shutdown,
            }),
        })
    }

    /// The configuration this backend was started with.
    #[must_use]
    pub fn config(&self) -> &MemoryEndpointConfig {
        &self.inner.config
    }

    /// Current content of `resource`.
    #[must_use]
    pub fn get(&self, resource: &ResourceName) -> Option<Data> {
        self.inner.store.read().get(resource).cloned()
    }

    /// Number of stored resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.store.read().len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.store.read().is_empty()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Reports that changes to `resource` may have been lost.
    ///
    /// The signal travels through the change feed behind every event already
    /// published, after which each subscription covering `resource` is
    /// dropped with `OUT_OF_SYNC`.
    pub fn signal_overflow(&self, resource: ResourceName) {
        self.inner.publish(FeedEvent::Overflow { resource });
    }

    /// Stops the change feed. Later requests fail with
    /// [`EndpointError::Closed`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// True once [`Self::shutdown`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn spawn<F>(&self, request: RequestKind, work: F) -> rxp_endpoint::Result
    where
        F: FnOnce(&Inner) -> Result<(), DeliveryError> + Send + 'static,
    {
        if self.is_closed() {
            return Err(EndpointError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            if let Err(err) = work(&inner) {
                debug!(%request, "dropping outcome: {err}");
            }
        });
        Ok(())
    }

    fn subscribe_with(
        &self,
        credentials: SharedCredentials,
        pattern: ResourceName,
        observer: SharedObserver,
        wants_initial_read: bool,
    ) -> rxp_endpoint::Result {
        if self.is_closed() {
            return Err(EndpointError::Closed);
        }

        let subscription = Arc::new(Subscription::new(
            credentials,
            observer,
            pattern,
            wants_initial_read,
        ));
        let granted = subscription
            .credentials()
            .can_read(subscription.pattern());

        // Register before returning so that no later mutation is missed.
        if granted {
            if wants_initial_read {
                subscription.start_buffering();
            }
            if self
                .inner
                .registry
                .subscribe(Arc::clone(&subscription))
                .is_some()
            {
                debug!(pattern = %subscription.pattern(), "replaced subscription");
            }
        }

        let request = subscription.request_kind();
        self.spawn(request, move |inner| {
            if !granted {
                return subscription.fail(Status::Forbidden);
            }
            let sent = inner.send_initial(&subscription);
            if sent.is_err() {
                inner.registry.remove(&subscription);
            }
            sent
        })
    }
}

impl std::fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEndpoint")
            .field("resources", &self.len())
            .field("subscriptions", &self.subscriptions())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn publish(&self, event: FeedEvent) {
        if self.feed.send(event).is_err() {
            debug!("change feed stopped, dropping event");
        }
    }

    fn changed(&self, resource: &ResourceName, change: Change) {
        self.publish(FeedEvent::Change {
            resource: resource.clone(),
            change,
        });
    }

    fn with_mime_type(&self, resource: &ResourceName, mut data: Data) -> Data {
        if data.mime_type.is_empty() {
            if let Some(mime_type) = self.config.mime_type_for(resource) {
                mime_type.clone_into(&mut data.mime_type);
            }
        }
        data
    }

    fn create(
        &self,
        credentials: &dyn Credentials,
        resource: ResourceName,
        data: Data,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Create;

        if !credentials.can_create(&resource) {
            return observer.on_error(REQUEST, Some(resource), Status::Forbidden);
        }
        if resource.is_pattern() {
            return observer.on_error(REQUEST, Some(resource), Status::BadRequest);
        }

        let data = self.with_mime_type(&resource, data);
        let created = {
            let mut store = self.store.write();
            if store.contains_key(&resource) {
                false
            } else {
                store.insert(resource.clone(), data.clone());
                self.changed(&resource, Change::Created(data));
                true
            }
        };

        if created {
            observer.on_success(REQUEST, Some(resource.clone()), vec![resource])
        } else {
            observer.on_error(REQUEST, Some(resource), Status::AlreadyExists)
        }
    }

    fn update(
        &self,
        credentials: &dyn Credentials,
        resource: ResourceName,
        data: Data,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Update;

        if !credentials.can_update(&resource) {
            return observer.on_error(REQUEST, Some(resource), Status::Forbidden);
        }

        let affected = {
            let mut store = self.store.write();
            let affected = matching(&store, &resource);
            for name in &affected {
                let data = self.with_mime_type(name, data.clone());
                store.insert(name.clone(), data.clone());
                self.changed(name, Change::Updated(data));
            }
            affected
        };

        if affected.is_empty() && resource.is_simple() {
            return observer.on_error(REQUEST, Some(resource), Status::NotFound);
        }
        observer.on_success(REQUEST, Some(resource), affected)
    }

    fn save(
        &self,
        credentials: &dyn Credentials,
        resource: ResourceName,
        data: Data,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Save;

        if !credentials.can_save(&resource) {
            return observer.on_error(REQUEST, Some(resource), Status::Forbidden);
        }

        let affected = {
            let mut store = self.store.write();
            if resource.is_pattern() {
                let affected = matching(&store, &resource);
                for name in &affected {
                    let data = self.with_mime_type(name, data.clone());
                    store.insert(name.clone(), data.clone());
                    self.changed(name, Change::Updated(data));
                }
                affected
            } else {
                let data = self.with_mime_type(&resource, data);
                let change = match store.insert(resource.clone(), data.clone()) {
                    Some(_) => Change::Updated(data),
                    None => Change::Created(data),
                };
                self.changed(&resource, change);
                vec![resource.clone()]
            }
        };

        observer.on_success(REQUEST, Some(resource), affected)
    }

    fn delete(
        &self,
        credentials: &dyn Credentials,
        resource: ResourceName,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Delete;

        if !credentials.can_delete(&resource) {
            return observer.on_error(REQUEST, Some(resource), Status::Forbidden);
        }

        let affected = {
            let mut store = self.store.write();
            let affected = matching(&store, &resource);
            for name in &affected {
                store.remove(name);
                self.changed(name, Change::Deleted);
            }
            affected
        };

        if affected.is_empty() && resource.is_simple() {
            return observer.on_error(REQUEST, Some(resource), Status::NotFound);
        }
        observer.on_success(REQUEST, Some(resource), affected)
    }

    fn read(
        &self,
        credentials: &dyn Credentials,
        resource: ResourceName,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Read;

        if !credentials.can_read(&resource) {
            return observer.on_error(REQUEST, Some(resource), Status::Forbidden);
        }

        let snapshot = self.snapshot(&resource);
        if snapshot.is_empty() && resource.is_simple() {
            return observer.on_error(REQUEST, Some(resource), Status::NotFound);
        }

        for (name, data) in snapshot {
            observer.on_data(REQUEST, resource.clone(), Some(name), Change::Initial(data))?;
        }
        observer.on_success(REQUEST, Some(resource), Vec::new())
    }

    fn send_initial(&self, subscription: &Subscription) -> Result<(), DeliveryError> {
        if !subscription.wants_initial_read() {
            return Ok(());
        }

        let pattern = subscription.pattern();
        for (name, data) in self.snapshot(pattern) {
            subscription.on_data(
                subscription.request_kind(),
                pattern.clone(),
                Some(name),
                Change::Initial(data),
            )?;
        }
        subscription.stop_buffering()
    }

    fn unsubscribe(
        &self,
        pattern: ResourceName,
        observer: &dyn Observer,
    ) -> Result<(), DeliveryError> {
        const REQUEST: RequestKind = RequestKind::Unsubscribe;

        let Some(subscription) = self.registry.unsubscribe(&pattern, observer.id()) else {
            return observer.on_error(REQUEST, Some(pattern), Status::NotFound);
        };

        subscription.finish()?;
        observer.on_success(REQUEST, Some(pattern), Vec::new())
    }

    fn unsubscribe_all(&self, observer: &dyn Observer) -> Result<(), DeliveryError> {
        for subscription in self.registry.unsubscribe_all(observer.id()) {
            subscription.finish()?;
        }
        observer.on_success(RequestKind::UnsubscribeAll, None, Vec::new())
    }

    fn snapshot(&self, resource: &ResourceName) -> Vec<(ResourceName, Data)> {
        let store = self.store.read();
        matching(&store, resource)
            .into_iter()
            .filter_map(|name| {
                let data = store.get(&name)?.clone();
                Some((name, data))
            })
            .collect()
    }
}

/// Stored names covered by `resource`, in name order.
fn matching(store: &Store, resource: &ResourceName) -> Vec<ResourceName> {
    if resource.is_simple() {
        return store
            .contains_key(resource)
            .then(|| resource.clone())
            .into_iter()
            .collect();
    }

    store
        .keys()
        .filter(|name| resource.matches(name))
        .cloned()
        .collect()
}

async fn run_feed(
    registry: Arc<SubscriptionRegistry>,
    recheck: CredentialRecheck,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            FeedEvent::Change { resource, change } => {
                fan_out(&registry, recheck, &resource, &change);
            }
            FeedEvent::Overflow { resource } => {
                registry.out_of_sync(&resource);
            }
        }
    }

    debug!("change feed stopped");
}

fn fan_out(
    registry: &SubscriptionRegistry,
    recheck: CredentialRecheck,
    resource: &ResourceName,
    change: &Change,
) {
    for subscription in registry.matches(resource) {
        let pattern = subscription.pattern();
        let can_read = subscription.credentials().can_read(pattern);

        match recheck {
            CredentialRecheck::EvictOnGranted if matches!(change, Change::Created(_)) => {
                if can_read && registry.remove(&subscription) {
                    debug!(%pattern, %resource, "dropping subscription on created event");
                }
            }
            _ if !can_read => {
                if registry.remove(&subscription) {
                    debug!(%pattern, %resource, "dropping subscription, read no longer granted");
                    if let Err(err) = subscription.fail(Status::Forbidden) {
                        warn!(%pattern, "cannot send forbidden: {err}");
                    }
                }
                continue;
            }
            _ => {}
        }

        let delivered = subscription.on_data(
            subscription.request_kind(),
            pattern.clone(),
            Some(resource.clone()),
            change.clone(),
        );
        if let Err(err) = delivered {
            debug!(%pattern, "dropping subscription: {err}");
            registry.remove(&subscription);
        }
    }
}

impl Endpoint for MemoryEndpoint {
    fn create(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Create, move |inner| {
            inner.create(credentials.as_ref(), resource, data, observer.as_ref())
        })
    }

    fn update(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Update, move |inner| {
            inner.update(credentials.as_ref(), resource, data, observer.as_ref())
        })
    }

    fn save(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Save, move |inner| {
            inner.save(credentials.as_ref(), resource, data, observer.as_ref())
        })
    }

    fn delete(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Delete, move |inner| {
            inner.delete(credentials.as_ref(), resource, observer.as_ref())
        })
    }

    fn read(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Read, move |inner| {
            inner.read(credentials.as_ref(), resource, observer.as_ref())
        })
    }

    fn subscribe(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.subscribe_with(credentials, resource, observer, false)
    }

    fn subscribe_status(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.subscribe_with(credentials, resource, observer, true)
    }

    fn unsubscribe(
        &self,
        _credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Unsubscribe, move |inner| {
            inner.unsubscribe(resource, observer.as_ref())
        })
    }

    fn unsubscribe_all(
        &self,
        _credentials: SharedCredentials,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::UnsubscribeAll, move |inner| {
            inner.unsubscribe_all(observer.as_ref())
        })
    }

    fn ping(
        &self,
        _credentials: SharedCredentials,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.spawn(RequestKind::Ping, move |_| {
            observer.on_success(RequestKind::Ping, None, Vec::new())
        })
    }
}
