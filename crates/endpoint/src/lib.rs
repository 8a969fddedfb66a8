//! Contracts between the session layer and backends.
//!
//! A backend implements [`Endpoint`]: every call returns as soon as the
//! request has been accepted and reports its outcome later through an
//! [`Observer`]. The client session implements the same trait, so code
//! written against a local backend works unchanged against a remote one.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod observer;

pub use error::{DeliveryError, EndpointError};
pub use observer::{ChannelObserver, Notification, Observer, ObserverId, dispatch};

use std::sync::Arc;

use rxp_name::ResourceName;
use rxp_policy::Credentials;
use rxp_protocol::{Data, Request};

/// Shared credentials handle.
pub type SharedCredentials = Arc<dyn Credentials>;

/// Shared observer handle.
pub type SharedObserver = Arc<dyn Observer>;

/// Result of submitting a request.
pub type Result<T = ()> = std::result::Result<T, EndpointError>;

/// Something that executes resource requests.
pub trait Endpoint: Send + Sync {
    /// Creates `resource`, which must be simple and must not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn create(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> Result;

    /// Replaces every existing resource matching `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn update(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> Result;

    /// Creates or replaces `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn save(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> Result;

    /// Deletes every resource matching `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn delete(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> Result;

    /// Reads every resource matching `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn read(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> Result;

    /// Follows changes to resources matching `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn subscribe(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> Result;

    /// Reads the current state of `resource`, then follows its changes.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn subscribe_status(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> Result;

    /// Ends the subscription of `observer` on `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn unsubscribe(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> Result;

    /// Ends every subscription of `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn unsubscribe_all(&self, credentials: SharedCredentials, observer: SharedObserver) -> Result;

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn ping(&self, credentials: SharedCredentials, observer: SharedObserver) -> Result;

    /// Submits a decoded request to the matching method.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Closed`] if the request cannot be submitted.
    fn execute(
        &self,
        credentials: SharedCredentials,
        request: Request,
        observer: SharedObserver,
    ) -> Result {
        match request {
            Request::Ping => self.ping(credentials, observer),
            Request::Create { resource, data } => {
                self.create(credentials, resource, data, observer)
            }
            Request::Update { resource, data } => {
                self.update(credentials, resource, data, observer)
            }
            Request::Save { resource, data } => self.save(credentials, resource, data, observer),
            Request::Delete { resource } => self.delete(credentials, resource, observer),
            Request::Read { resource } => self.read(credentials, resource, observer),
            Request::Subscribe { resource } => self.subscribe(credentials, resource, observer),
            Request::SubscribeStatus { resource } => {
                self.subscribe_status(credentials, resource, observer)
            }
            Request::Unsubscribe { resource } => self.unsubscribe(credentials, resource, observer),
            Request::UnsubscribeAll => self.unsubscribe_all(credentials, observer),
        }
    }
}
