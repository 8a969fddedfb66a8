use thiserror::Error;

/// Errors that can occur when starting a memory endpoint.
#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint was started outside a Tokio runtime.
    #[error("memory endpoint must be started inside a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
