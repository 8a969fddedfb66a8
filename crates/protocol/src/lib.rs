//! Binary wire format for the resource exchange protocol.
//!
//! Every frame is a big-endian, length-prefixed message carrying a version,
//! a case-insensitive header and either a request or a response. Request
//! kinds use codes below 200; response codes start at 200.
//!
//! # Example
//!
//! ```
//! use rxp_name::ResourceName;
//! use rxp_protocol::{Message, Request, codec};
//!
//! let message: Message = Request::Read {
//!     resource: ResourceName::parse("sensors/+").unwrap(),
//! }
//! .into();
//!
//! let frame = codec::to_bytes(&message).unwrap();
//! let decoded = codec::decode(frame.slice(codec::SIZE_FIELD_LEN..)).unwrap();
//! assert_eq!(decoded, message);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod error;
pub mod framing;
mod header;
pub mod kind;
pub mod message;

pub use error::{Error, ProtocolError, Result};
pub use framing::{MAX_FRAME_SIZE, MessageCodec};
pub use header::Header;
pub use kind::{Reason, RequestKind, Status};
pub use message::{
    Change, Data, Message, Request, RequestMessage, Response, ResponseBody, ResponseMessage,
    VERSION,
};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
