use thiserror::Error;

/// Result type alias for resource name operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while building or slicing resource names.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The name violates the level grammar.
    #[error("invalid resource name `{name}`: {reason}")]
    InvalidName {
        /// The offending name as given.
        name: String,
        /// What rule was broken.
        reason: &'static str,
    },

    /// A level range was out of bounds or empty.
    #[error("invalid level range {begin}..{end} for a name of {len} levels")]
    InvalidRange {
        /// First level of the range.
        begin: usize,
        /// One past the last level of the range.
        end: usize,
        /// Number of levels in the name.
        len: usize,
    },

    /// A level index was out of bounds.
    #[error("invalid level index {index} for a name of {len} levels")]
    InvalidIndex {
        /// The requested index.
        index: usize,
        /// Number of levels in the name.
        len: usize,
    },
}
