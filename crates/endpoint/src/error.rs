use thiserror::Error;

/// Errors returned when a request cannot even be submitted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint is no longer accepting requests.
    #[error("endpoint closed")]
    Closed,
    /// The request cannot be put on the wire, e.g. it exceeds the frame
    /// size limit.
    #[error("request cannot be encoded: {0}")]
    Unencodable(String),
}

/// Errors returned when an outcome cannot reach its observer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The observer's connection or channel is gone.
    #[error("observer closed")]
    Closed,
    /// The outcome cannot be put on the wire; the peer receives
    /// `INTERNAL_SERVER_ERROR` for the request instead.
    #[error("outcome cannot be encoded: {0}")]
    Unencodable(String),
}
