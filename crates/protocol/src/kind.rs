//! Numeric codes carried in frames.

use std::fmt;

/// Codes below this value are requests; the rest are responses.
pub const FIRST_RESPONSE_CODE: u16 = 200;

/// Response code for a successful, terminal outcome.
pub const SUCCESS_CODE: u16 = 200;

/// Response code for a data notification.
pub const DATA_CODE: u16 = 201;

/// The operation a request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum RequestKind {
    /// Liveness check.
    Ping = 0,
    /// Create a resource that must not exist yet.
    Create = 1,
    /// Replace existing resources.
    Update = 2,
    /// Create or replace.
    Save = 3,
    /// Remove resources.
    Delete = 4,
    /// One-shot read.
    Read = 5,
    /// Follow changes.
    Subscribe = 6,
    /// Read the current state, then follow changes.
    SubscribeStatus = 7,
    /// Stop following one pattern.
    Unsubscribe = 8,
    /// Stop following everything.
    UnsubscribeAll = 9,
}

impl RequestKind {
    /// Every request kind in code order.
    pub const ALL: [Self; 10] = [
        Self::Ping,
        Self::Create,
        Self::Update,
        Self::Save,
        Self::Delete,
        Self::Read,
        Self::Subscribe,
        Self::SubscribeStatus,
        Self::Unsubscribe,
        Self::UnsubscribeAll,
    ];

    /// The wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a wire code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Ping,
            1 => Self::Create,
            2 => Self::Update,
            3 => Self::Save,
            4 => Self::Delete,
            5 => Self::Read,
            6 => Self::Subscribe,
            7 => Self::SubscribeStatus,
            8 => Self::Unsubscribe,
            9 => Self::UnsubscribeAll,
            _ => return None,
        })
    }

    /// False for the two kinds that address no resource.
    #[must_use]
    pub const fn has_resource(self) -> bool {
        !matches!(self, Self::Ping | Self::UnsubscribeAll)
    }

    /// True for kinds whose request carries data.
    #[must_use]
    pub const fn has_data(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Save)
    }

    /// Upper-case protocol name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Save => "SAVE",
            Self::Delete => "DELETE",
            Self::Read => "READ",
            Self::Subscribe => "SUBSCRIBE",
            Self::SubscribeStatus => "SUBSCRIBE_STATUS",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::UnsubscribeAll => "UNSUBSCRIBE_ALL",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error outcomes a backend reports instead of success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// Malformed or unsupported request.
    BadRequest = 400,
    /// The credentials do not allow the operation.
    Forbidden = 401,
    /// Nothing matched.
    NotFound = 402,
    /// Create of an existing resource.
    AlreadyExists = 403,
    /// The backend failed.
    InternalServerError = 500,
    /// A subscription may have missed changes and was dropped.
    OutOfSync = 501,
}

impl Status {
    /// The wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a wire code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            400 => Self::BadRequest,
            401 => Self::Forbidden,
            402 => Self::NotFound,
            403 => Self::AlreadyExists,
            500 => Self::InternalServerError,
            501 => Self::OutOfSync,
            _ => return None,
        })
    }

    /// Upper-case protocol name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::OutOfSync => "OUT_OF_SYNC",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a data notification was sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reason {
    /// Part of a read or initial snapshot.
    Initial = 0,
    /// The resource was created.
    Created = 1,
    /// The resource was updated.
    Updated = 2,
    /// The resource was deleted.
    Deleted = 3,
}

impl Reason {
    /// The wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Initial,
            1 => Self::Created,
            2 => Self::Updated,
            3 => Self::Deleted,
            _ => return None,
        })
    }
}
