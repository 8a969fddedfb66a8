use crate::error::DeliveryError;

use std::fmt;
use std::sync::Arc;

use rxp_name::ResourceName;
use rxp_protocol::{Change, RequestKind, Response, ResponseBody, Status};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Identity of a callback target.
///
/// Subscriptions are keyed by pattern and observer id, so two observers
/// sharing an id are treated as the same subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ObserverId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Receives the outcomes of requests.
///
/// `on_data` may be called any number of times for one request; `on_success`
/// and `on_error` end it.
pub trait Observer: Send + Sync {
    /// Identity used to key subscriptions.
    fn id(&self) -> ObserverId;

    /// The request completed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the target is gone.
    fn on_success(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        affected: Vec<ResourceName>,
    ) -> Result<(), DeliveryError>;

    /// Content of `affected`, matched by `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the target is gone.
    fn on_data(
        &self,
        request: RequestKind,
        resource: ResourceName,
        affected: Option<ResourceName>,
        change: Change,
    ) -> Result<(), DeliveryError>;

    /// The request failed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the target is gone.
    fn on_error(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        status: Status,
    ) -> Result<(), DeliveryError>;
}

/// Hands a decoded response to the matching observer callback.
///
/// # Errors
///
/// Propagates the observer's delivery error.
pub fn dispatch(observer: &dyn Observer, response: Response) -> Result<(), DeliveryError> {
    let Response {
        request,
        resource,
        body,
    } = response;

    match body {
        ResponseBody::Success { affected } => {
            observer.on_success(request, resource, affected.unwrap_or_default())
        }
        ResponseBody::Data { change, affected } => {
            let affected = match affected {
                Some(mut affected) if affected.len() == 1 => affected.pop(),
                Some(affected) => {
                    warn!(
                        %request,
                        count = affected.len(),
                        "data response without a single affected resource"
                    );
                    None
                }
                None => None,
            };
            match resource {
                Some(resource) => observer.on_data(request, resource, affected, change),
                None => observer.on_error(request, None, Status::BadRequest),
            }
        }
        ResponseBody::Error(status) => observer.on_error(request, resource, status),
    }
}

/// One observer callback, as a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// See [`Observer::on_success`].
    Success {
        /// Originating request kind.
        request: RequestKind,
        /// Originating resource.
        resource: Option<ResourceName>,
        /// Touched resources.
        affected: Vec<ResourceName>,
    },
    /// See [`Observer::on_data`].
    Data {
        /// Originating request kind.
        request: RequestKind,
        /// Originating resource or pattern.
        resource: ResourceName,
        /// The concrete resource.
        affected: Option<ResourceName>,
        /// What happened.
        change: Change,
    },
    /// See [`Observer::on_error`].
    Error {
        /// Originating request kind.
        request: RequestKind,
        /// Originating resource.
        resource: Option<ResourceName>,
        /// Failure kind.
        status: Status,
    },
}

impl Notification {
    /// True for success and error.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data { .. })
    }

    /// The originating request kind.
    #[must_use]
    pub const fn request(&self) -> RequestKind {
        match self {
            Self::Success { request, .. }
            | Self::Data { request, .. }
            | Self::Error { request, .. } => *request,
        }
    }
}

/// An observer that forwards every callback into a channel.
#[derive(Debug)]
pub struct ChannelObserver {
    id: ObserverId,
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its notifications.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        Self::with_id(ObserverId::new())
    }

    /// Like [`Self::new`] with a caller-chosen identity.
    #[must_use]
    pub fn with_id(id: ObserverId) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { id, sender }), receiver)
    }

    fn send(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.sender
            .send(notification)
            .map_err(|_| DeliveryError::Closed)
    }
}

impl Observer for ChannelObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn on_success(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        affected: Vec<ResourceName>,
    ) -> Result<(), DeliveryError> {
        self.send(Notification::Success {
            request,
            resource,
            affected,
        })
    }

    fn on_data(
        &self,
        request: RequestKind,
        resource: ResourceName,
        affected: Option<ResourceName>,
        change: Change,
    ) -> Result<(), DeliveryError> {
        self.send(Notification::Data {
            request,
            resource,
            affected,
            change,
        })
    }

    fn on_error(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        status: Status,
    ) -> Result<(), DeliveryError> {
        self.send(Notification::Error {
            request,
            resource,
            status,
        })
    }
}
