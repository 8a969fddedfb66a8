//! Byte-exact encoding of messages.
//!
//! ```text
//! frame    := u32 size  u32 version  header  u16 kind  payload
//! header   := u32 count (string key, string value){count}
//! string   := u32 len bytes
//! ```
//!
//! All integers are big-endian and `size` counts every byte after itself.

use crate::error::{Error, ProtocolError, Result};
use crate::header::Header;
use crate::kind::{DATA_CODE, FIRST_RESPONSE_CODE, Reason, RequestKind, SUCCESS_CODE, Status};
use crate::message::{
    Change, Data, Message, Request, RequestMessage, Response, ResponseBody, ResponseMessage,
    VERSION,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rxp_name::ResourceName;

/// Size of the leading length field.
pub const SIZE_FIELD_LEN: usize = 4;

/// Appends one complete frame for `message` to `buf`.
///
/// # Errors
///
/// Returns [`Error::InvalidMessage`] if the message cannot be represented,
/// e.g. data on a `PING` response. Nothing is written on error.
pub fn encode(message: &Message, buf: &mut BytesMut) -> Result<()> {
    let start = buf.len();
    let result = encode_frame(message, buf);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

/// Encodes `message` into a fresh buffer.
///
/// # Errors
///
/// Fails like [`encode`].
pub fn to_bytes(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode(message, &mut buf)?;
    Ok(buf.freeze())
}

fn encode_frame(message: &Message, buf: &mut BytesMut) -> Result<()> {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_u32(VERSION);
    put_header(buf, message.header())?;

    match message {
        Message::Request(RequestMessage { request, .. }) => put_request(buf, request)?,
        Message::Response(ResponseMessage { response, .. }) => put_response(buf, response)?,
    }

    let size = buf.len() - start - SIZE_FIELD_LEN;
    let size = u32::try_from(size).map_err(|_| ProtocolError::FrameTooLarge {
        size,
        max: u32::MAX as usize,
    })?;
    buf[start..start + SIZE_FIELD_LEN].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

fn put_header(buf: &mut BytesMut, header: &Header) -> Result<()> {
    put_len(buf, header.len())?;
    for (key, value) in header.iter() {
        put_bytes(buf, key.as_bytes())?;
        put_bytes(buf, value.as_bytes())?;
    }
    Ok(())
}

fn put_request(buf: &mut BytesMut, request: &Request) -> Result<()> {
    buf.put_u16(request.kind().code());
    if let Some(resource) = request.resource() {
        put_bytes(buf, resource.as_str().as_bytes())?;
    }
    if let Some(data) = request.data() {
        put_data(buf, data)?;
    }
    Ok(())
}

fn put_response(buf: &mut BytesMut, response: &Response) -> Result<()> {
    buf.put_u16(response.body.code());
    buf.put_u16(response.request.code());

    if !response.request.has_resource() {
        return match &response.body {
            _ if response.resource.is_some() => {
                Err(Error::InvalidMessage("resource on a resource-less response"))
            }
            ResponseBody::Success { affected: None } | ResponseBody::Error(_) => Ok(()),
            ResponseBody::Success { .. } => {
                Err(Error::InvalidMessage("affected resources on a resource-less response"))
            }
            ResponseBody::Data { .. } => {
                Err(Error::InvalidMessage("data on a resource-less response"))
            }
        };
    }

    let resource = response.resource.as_ref().map_or("", ResourceName::as_str);
    put_bytes(buf, resource.as_bytes())?;

    match &response.body {
        ResponseBody::Success { affected } => put_affected(buf, affected.as_deref())?,
        ResponseBody::Data { change, affected } => {
            buf.put_u8(change.reason().code());
            if let Some(data) = change.data() {
                put_data(buf, data)?;
            }
            put_affected(buf, affected.as_deref())?;
        }
        ResponseBody::Error(_) => {}
    }
    Ok(())
}

fn put_affected(buf: &mut BytesMut, affected: Option<&[ResourceName]>) -> Result<()> {
    if let Some(affected) = affected {
        put_len(buf, affected.len())?;
        for name in affected {
            put_bytes(buf, name.as_str().as_bytes())?;
        }
    }
    Ok(())
}

fn put_data(buf: &mut BytesMut, data: &Data) -> Result<()> {
    put_bytes(buf, data.mime_type.as_bytes())?;
    put_bytes(buf, &data.content)
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    put_len(buf, bytes.len())?;
    buf.put_slice(bytes);
    Ok(())
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    buf.put_u32(len);
    Ok(())
}

/// Decodes one frame body: everything after the size field.
///
/// The whole body must be consumed.
///
/// # Errors
///
/// Returns a [`ProtocolError`] for an unsupported version, unknown codes,
/// truncated fields or trailing bytes, and [`Error::InvalidName`] for a
/// malformed resource.
pub fn decode(body: Bytes) -> Result<Message> {
    let mut reader = Reader(body);

    let version = reader.u32()?;
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version).into());
    }

    let header = reader.header()?;
    let code = reader.u16()?;

    let message = if code < FIRST_RESPONSE_CODE {
        let kind = RequestKind::from_code(code).ok_or(ProtocolError::UnknownKind(code))?;
        Message::Request(RequestMessage {
            header,
            request: reader.request(kind)?,
        })
    } else {
        Message::Response(ResponseMessage {
            header,
            response: reader.response(code)?,
        })
    };

    reader.finish()?;
    Ok(message)
}

struct Reader(Bytes);

impl Reader {
    fn ensure(&self, len: usize) -> Result<()> {
        if self.0.remaining() < len {
            return Err(ProtocolError::Truncated.into());
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.0.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.0.get_u16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.0.get_u32())
    }

    fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.ensure(len)?;
        Ok(self.0.split_to(len))
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    fn resource(&mut self) -> Result<ResourceName> {
        Ok(ResourceName::parse(&self.string()?)?)
    }

    fn optional_resource(&mut self) -> Result<Option<ResourceName>> {
        let name = self.string()?;
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResourceName::parse(&name)?))
    }

    fn data(&mut self) -> Result<Data> {
        let mime_type = self.string()?;
        let content = self.bytes()?;
        Ok(Data { mime_type, content })
    }

    fn header(&mut self) -> Result<Header> {
        let count = self.u32()?;
        let mut header = Header::new();
        for _ in 0..count {
            let key = self.string()?;
            let value = self.string()?;
            header.insert(key, value);
        }
        Ok(header)
    }

    fn affected(&mut self) -> Result<Option<Vec<ResourceName>>> {
        if !self.0.has_remaining() {
            return Ok(None);
        }

        let count = self.u32()?;
        let mut affected = Vec::new();
        for _ in 0..count {
            affected.push(self.resource()?);
        }
        Ok(Some(affected))
    }

    fn request(&mut self, kind: RequestKind) -> Result<Request> {
        let resource = if kind.has_resource() {
            Some(self.resource()?)
        } else {
            None
        };
        let data = if kind.has_data() {
            Some(self.data()?)
        } else {
            None
        };

        Request::from_parts(kind, resource, data)
            .ok_or(Error::InvalidMessage("request is missing a field"))
    }

    fn response(&mut self, code: u16) -> Result<Response> {
        let request_code = self.u16()?;
        let request = RequestKind::from_code(request_code)
            .ok_or(ProtocolError::UnknownKind(request_code))?;

        if !request.has_resource() {
            let body = match code {
                SUCCESS_CODE => ResponseBody::Success { affected: None },
                DATA_CODE => return Err(Error::InvalidMessage("data on a resource-less response")),
                _ => ResponseBody::Error(status(code)?),
            };
            return Ok(Response {
                request,
                resource: None,
                body,
            });
        }

        let resource = self.optional_resource()?;
        let body = match code {
            SUCCESS_CODE => ResponseBody::Success {
                affected: self.affected()?,
            },
            DATA_CODE => {
                let reason_code = self.u8()?;
                let reason = Reason::from_code(reason_code)
                    .ok_or(ProtocolError::UnknownReason(reason_code))?;
                let data = if reason == Reason::Deleted {
                    None
                } else {
                    Some(self.data()?)
                };
                let change = Change::from_parts(reason, data)
                    .ok_or(Error::InvalidMessage("data notification without content"))?;
                ResponseBody::Data {
                    change,
                    affected: self.affected()?,
                }
            }
            _ => ResponseBody::Error(status(code)?),
        };

        Ok(Response {
            request,
            resource,
            body,
        })
    }

    fn finish(self) -> Result<()> {
        match self.0.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes(extra).into()),
        }
    }
}

fn status(code: u16) -> Result<Status> {
    Status::from_code(code).ok_or_else(|| ProtocolError::UnknownKind(code).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn round_trip(message: Message) {
        let bytes = to_bytes(&message).unwrap();
        let decoded = decode(bytes.slice(SIZE_FIELD_LEN..)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_ping_request_layout() {
        let bytes = to_bytes(&Request::Ping.into()).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0, 0, 0, 10, // size
                0, 0, 0, 1, // version
                0, 0, 0, 0, // header count
                0, 0, // PING
            ]
        );
    }

    #[test]
    fn test_create_request_layout() {
        let message = RequestMessage::new(Request::Create {
            resource: name("/a/b"),
            data: Data::new("t", "hi"),
        })
        .with_header(Header::new().with("K", "v"));
        let bytes = to_bytes(&message.into()).unwrap();

        let mut expected = vec![0, 0, 0, 0];
        expected.extend([0, 0, 0, 1]);
        expected.extend([0, 0, 0, 1, 0, 0, 0, 1, b'K', 0, 0, 0, 1, b'v']);
        expected.extend([0, 1]);
        expected.extend([0, 0, 0, 3, b'a', b'/', b'b']);
        expected.extend([0, 0, 0, 1, b't', 0, 0, 0, 2, b'h', b'i']);
        let size = u8::try_from(expected.len() - 4).unwrap();
        expected[3] = size;

        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_data_response_layout() {
        let response = Response::data(
            RequestKind::Subscribe,
            Some(name("a/+")),
            Change::Deleted,
            Some(name("a/b")),
        );
        let bytes = to_bytes(&response.into()).unwrap();

        assert_eq!(
            &bytes[12..],
            &[
                0, 201, // DATA
                0, 6, // SUBSCRIBE
                0, 0, 0, 3, b'a', b'/', b'+', // resource
                3,    // DELETED, no data follows
                0, 0, 0, 1, 0, 0, 0, 3, b'a', b'/', b'b', // affected
            ]
        );
    }

    #[test]
    fn test_request_round_trips() {
        let data = Data::new("", "");
        for request in [
            Request::Ping,
            Request::UnsubscribeAll,
            Request::Create {
                resource: name("a"),
                data: data.clone(),
            },
            Request::Update {
                resource: name("a/+"),
                data: Data::new("text/plain", "x"),
            },
            Request::Save {
                resource: name("a"),
                data,
            },
            Request::Delete {
                resource: name("a/#"),
            },
            Request::Read {
                resource: name("#"),
            },
            Request::Subscribe {
                resource: name("a/b"),
            },
            Request::SubscribeStatus {
                resource: name("+/b"),
            },
            Request::Unsubscribe {
                resource: name("a/b"),
            },
        ] {
            round_trip(
                RequestMessage::new(request)
                    .with_header(Header::new().with("Authorization", "a r"))
                    .into(),
            );
        }
    }

    #[test]
    fn test_response_round_trips() {
        let a = || Some(name("a"));
        let created = Change::Created(Data::new("m", "c"));
        let updated = Change::Updated(Data::new("m", ""));
        for response in [
            Response::success(RequestKind::Ping, None, vec![]),
            Response::success(RequestKind::UnsubscribeAll, None, vec![]),
            Response::error(RequestKind::Ping, None, Status::InternalServerError),
            Response::success(RequestKind::Read, a(), vec![]),
            Response::success(RequestKind::Delete, a(), vec![name("a"), name("b")]),
            Response {
                request: RequestKind::Delete,
                resource: a(),
                body: ResponseBody::Success {
                    affected: Some(vec![]),
                },
            },
            Response::data(RequestKind::Read, a(), Change::Initial(Data::default()), a()),
            Response::data(RequestKind::Subscribe, a(), created, None),
            Response::data(RequestKind::SubscribeStatus, a(), updated, a()),
            Response::data(RequestKind::Subscribe, a(), Change::Deleted, None),
            Response::error(RequestKind::Create, a(), Status::AlreadyExists),
            Response::error(RequestKind::Subscribe, a(), Status::OutOfSync),
            Response::error(RequestKind::Read, None, Status::BadRequest),
        ] {
            round_trip(response.into());
        }
    }

    #[test]
    fn test_unrepresentable_responses() {
        let mut buf = BytesMut::from(&b"keep"[..]);
        let data = Response::data(RequestKind::Ping, None, Change::Deleted, None);
        assert!(matches!(
            encode(&data.into(), &mut buf),
            Err(Error::InvalidMessage(_))
        ));
        assert_eq!(buf.as_ref(), b"keep");

        let resource = Response::success(RequestKind::UnsubscribeAll, Some(name("a")), vec![]);
        assert!(to_bytes(&resource.into()).is_err());
    }

    #[test]
    fn test_decode_errors() {
        let valid = to_bytes(&Request::Read { resource: name("a") }.into()).unwrap();
        let body = valid.slice(SIZE_FIELD_LEN..);

        let mut wrong_version = BytesMut::from(body.as_ref());
        wrong_version[3] = 2;
        assert!(matches!(
            decode(wrong_version.freeze()),
            Err(Error::Protocol(ProtocolError::UnsupportedVersion(2)))
        ));

        assert!(matches!(
            decode(body.slice(..body.len() - 1)),
            Err(Error::Protocol(ProtocolError::Truncated))
        ));

        let mut trailing = BytesMut::from(body.as_ref());
        trailing.put_u8(0);
        assert!(matches!(
            decode(trailing.freeze()),
            Err(Error::Protocol(ProtocolError::TrailingBytes(1)))
        ));

        let mut unknown = BytesMut::new();
        unknown.put_u32(VERSION);
        unknown.put_u32(0);
        unknown.put_u16(42);
        assert!(matches!(
            decode(unknown.freeze()),
            Err(Error::Protocol(ProtocolError::UnknownKind(42)))
        ));

        let mut bad_name = BytesMut::new();
        bad_name.put_u32(VERSION);
        bad_name.put_u32(0);
        bad_name.put_u16(RequestKind::Read.code());
        bad_name.put_u32(4);
        bad_name.put_slice(b"a//b");
        assert!(matches!(decode(bad_name.freeze()), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_unknown_reason() {
        let mut body = BytesMut::new();
        body.put_u32(VERSION);
        body.put_u32(0);
        body.put_u16(DATA_CODE);
        body.put_u16(RequestKind::Read.code());
        body.put_u32(1);
        body.put_u8(b'a');
        body.put_u8(9);
        assert!(matches!(
            decode(body.freeze()),
            Err(Error::Protocol(ProtocolError::UnknownReason(9)))
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics(body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(Bytes::from(body));
        }

        #[test]
        fn decode_survives_corrupted_frames(
            index in 0usize..40,
            value in any::<u8>(),
        ) {
            let frame = to_bytes(&Response::data(
                RequestKind::Subscribe,
                Some(name("a/+")),
                Change::Updated(Data::new("text/plain", "hello")),
                Some(name("a/b")),
            ).into()).unwrap();
            let mut body = BytesMut::from(&frame[SIZE_FIELD_LEN..]);
            let index = index % body.len();
            body[index] = value;
            let _ = decode(body.freeze());
        }
    }
}
