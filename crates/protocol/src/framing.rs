//! Stream framing for [`Message`]s.

use crate::codec::{self, SIZE_FIELD_LEN};
use crate::error::ProtocolError;
use crate::message::Message;

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Codec for reading and writing length-prefixed messages.
///
/// Protocol violations surface as [`io::ErrorKind::InvalidData`] errors
/// wrapping [`crate::Error`].
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl MessageCodec {
    /// Create a new message codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// The configured frame size limit, excluding the size field.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn too_large(&self, size: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            crate::Error::from(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }),
        )
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < SIZE_FIELD_LEN {
            return Ok(None);
        }

        // Peek at the size without consuming it
        let mut size_field = &buf[..SIZE_FIELD_LEN];
        let size = size_field.get_u32() as usize;

        if size > self.max_frame_size {
            return Err(self.too_large(size));
        }

        let frame_len = SIZE_FIELD_LEN + size;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(SIZE_FIELD_LEN);
        let body = buf.split_to(size).freeze();

        codec::decode(body).map(Some).map_err(io::Error::from)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let start = buf.len();
        codec::encode(&message, buf)?;

        let size = buf.len() - start - SIZE_FIELD_LEN;
        if size > self.max_frame_size {
            buf.truncate(start);
            return Err(self.too_large(size));
        }
        Ok(())
    }
}
