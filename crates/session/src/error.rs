use std::io;

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a session or prevent one from starting.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading, writing or decoding a frame failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent a message only the other side may send.
    #[error("unexpected {0} from peer")]
    UnexpectedMessage(&'static str),

    /// A configuration file could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    /// The configured default credentials do not parse.
    #[error("invalid default credentials: {0}")]
    Credentials(#[from] rxp_policy::Error),
}
