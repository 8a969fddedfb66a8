use thiserror::Error;

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building access policies.
#[derive(Debug, Error)]
pub enum Error {
    /// A rights string contained something other than `-` or `crud`.
    #[error("invalid access spec `{0}`")]
    InvalidAccessSpec(String),

    /// An authorization pair had no whitespace between pattern and rights.
    #[error("invalid authorization entry `{0}`")]
    InvalidAuthorization(String),

    /// A pattern in an authorization string was not a valid name.
    #[error(transparent)]
    InvalidName(#[from] rxp_name::Error),

    /// The authorization scheme cannot be handled here.
    #[error("unsupported authorization scheme `{0}`")]
    UnsupportedScheme(String),

    /// A bearer token was rejected by the token decoder.
    #[error("token rejected: {0}")]
    Token(String),
}
