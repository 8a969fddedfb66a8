//! Error types for the wire codec.

use std::io;
use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for encoding and decoding messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The byte stream violates the frame grammar.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A resource field did not hold a valid name.
    #[error("Invalid resource name: {0}")]
    InvalidName(#[from] rxp_name::Error),

    /// A message cannot be represented on the wire.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Frame-level violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The version field is not supported.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// Unknown request or response code.
    #[error("Unknown message kind {0}")]
    UnknownKind(u16),

    /// Unknown data reason code.
    #[error("Unknown reason {0}")]
    UnknownReason(u8),

    /// A field extends past the end of the frame.
    #[error("Frame truncated")]
    Truncated,

    /// Bytes remain after the payload was fully read.
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    /// A string field is not UTF-8.
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}
