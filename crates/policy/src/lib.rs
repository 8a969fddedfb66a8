//! Access control for resource requests.
//!
//! An [`AccessPolicy`] maps patterns to [`Rights`] and answers permission
//! checks with the most specific grant covering the resource. Backends only
//! see the [`Credentials`] trait.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod authorization;
mod error;
mod policy;
mod rights;

pub use authorization::{
    AUTHORIZATION, BearerToken, DecodedToken, StaticTokenDecoder, TokenDecoder,
    resolve_credentials,
};
pub use error::{Error, Result};
pub use policy::{AccessEntry, AccessPolicy, now_millis};
pub use rights::Rights;

use rxp_name::ResourceName;

/// Permission checks a backend performs before acting on a request.
pub trait Credentials: Send + Sync + std::fmt::Debug {
    /// May create `resource`.
    fn can_create(&self, resource: &ResourceName) -> bool;

    /// May read or subscribe to `resource`.
    fn can_read(&self, resource: &ResourceName) -> bool;

    /// May update `resource`.
    fn can_update(&self, resource: &ResourceName) -> bool;

    /// May delete `resource`.
    fn can_delete(&self, resource: &ResourceName) -> bool;

    /// May create-or-update `resource`.
    fn can_save(&self, resource: &ResourceName) -> bool {
        self.can_create(resource) && self.can_update(resource)
    }

    /// The `Authorization` header value representing these credentials.
    fn serialize(&self) -> String;
}
