//! Sessions carrying resource requests over a byte stream.
//!
//! A [`Server`] decodes requests from each connection, resolves the caller's
//! credentials from the `Authorization` header and submits the request to
//! an [`Endpoint`](rxp_endpoint::Endpoint). Every callback the endpoint makes
//! becomes a response frame, written by a single task per connection.
//!
//! A [`Client`] is itself an `Endpoint`: it encodes each call as a request
//! frame and routes responses back to the observer of the matching
//! [`RequestKey`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod config;
mod connection;
mod error;
mod server;

pub use client::{Client, RequestKey};
pub use config::{ClientConfig, ConfigHandle, DEFAULT_PORT, ServerConfig};
pub use error::{Error, Result};
pub use server::Server;
