//! Typed requests and responses.

use crate::header::Header;
use crate::kind::{DATA_CODE, Reason, RequestKind, SUCCESS_CODE, Status};

use bytes::Bytes;
use rxp_name::ResourceName;

/// Protocol version written into every frame.
pub const VERSION: u32 = 1;

/// Opaque resource content with its mime type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Data {
    /// Mime type; empty when unknown.
    pub mime_type: String,
    /// Raw content.
    pub content: Bytes,
}

impl Data {
    /// Creates a data value.
    pub fn new(mime_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }
}

/// The change a data notification reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// Current content, from a read or initial snapshot.
    Initial(Data),
    /// New content of a created resource.
    Created(Data),
    /// New content of an updated resource.
    Updated(Data),
    /// The resource is gone.
    Deleted,
}

impl Change {
    /// The reason code for this change.
    #[must_use]
    pub const fn reason(&self) -> Reason {
        match self {
            Self::Initial(_) => Reason::Initial,
            Self::Created(_) => Reason::Created,
            Self::Updated(_) => Reason::Updated,
            Self::Deleted => Reason::Deleted,
        }
    }

    /// The content, unless deleted.
    #[must_use]
    pub const fn data(&self) -> Option<&Data> {
        match self {
            Self::Initial(data) | Self::Created(data) | Self::Updated(data) => Some(data),
            Self::Deleted => None,
        }
    }

    /// Rebuilds a change from its parts.
    ///
    /// Returns `None` if `data` is missing for anything but a deletion.
    #[must_use]
    pub fn from_parts(reason: Reason, data: Option<Data>) -> Option<Self> {
        match (reason, data) {
            (Reason::Deleted, _) => Some(Self::Deleted),
            (Reason::Initial, Some(data)) => Some(Self::Initial(data)),
            (Reason::Created, Some(data)) => Some(Self::Created(data)),
            (Reason::Updated, Some(data)) => Some(Self::Updated(data)),
            (_, None) => None,
        }
    }
}

/// A request with exactly the fields its kind carries.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Request {
    Ping,
    Create {
        resource: ResourceName,
        data: Data,
    },
    Update {
        resource: ResourceName,
        data: Data,
    },
    Save {
        resource: ResourceName,
        data: Data,
    },
    Delete {
        resource: ResourceName,
    },
    Read {
        resource: ResourceName,
    },
    Subscribe {
        resource: ResourceName,
    },
    SubscribeStatus {
        resource: ResourceName,
    },
    Unsubscribe {
        resource: ResourceName,
    },
    UnsubscribeAll,
}

impl Request {
    /// The kind of this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Ping => RequestKind::Ping,
            Self::Create { .. } => RequestKind::Create,
            Self::Update { .. } => RequestKind::Update,
            Self::Save { .. } => RequestKind::Save,
            Self::Delete { .. } => RequestKind::Delete,
            Self::Read { .. } => RequestKind::Read,
            Self::Subscribe { .. } => RequestKind::Subscribe,
            Self::SubscribeStatus { .. } => RequestKind::SubscribeStatus,
            Self::Unsubscribe { .. } => RequestKind::Unsubscribe,
            Self::UnsubscribeAll => RequestKind::UnsubscribeAll,
        }
    }

    /// The addressed resource or pattern.
    #[must_use]
    pub const fn resource(&self) -> Option<&ResourceName> {
        match self {
            Self::Ping | Self::UnsubscribeAll => None,
            Self::Create { resource, .. }
            | Self::Update { resource, .. }
            | Self::Save { resource, .. }
            | Self::Delete { resource }
            | Self::Read { resource }
            | Self::Subscribe { resource }
            | Self::SubscribeStatus { resource }
            | Self::Unsubscribe { resource } => Some(resource),
        }
    }

    /// The carried content, for writes.
    #[must_use]
    pub const fn data(&self) -> Option<&Data> {
        match self {
            Self::Create { data, .. } | Self::Update { data, .. } | Self::Save { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }

    /// Builds a request of `kind` from its parts.
    ///
    /// Returns `None` if a field the kind needs is missing.
    #[must_use]
    pub fn from_parts(
        kind: RequestKind,
        resource: Option<ResourceName>,
        data: Option<Data>,
    ) -> Option<Self> {
        Some(match kind {
            RequestKind::Ping => Self::Ping,
            RequestKind::UnsubscribeAll => Self::UnsubscribeAll,
            RequestKind::Create => Self::Create {
                resource: resource?,
                data: data?,
            },
            RequestKind::Update => Self::Update {
                resource: resource?,
                data: data?,
            },
            RequestKind::Save => Self::Save {
                resource: resource?,
                data: data?,
            },
            RequestKind::Delete => Self::Delete {
                resource: resource?,
            },
            RequestKind::Read => Self::Read {
                resource: resource?,
            },
            RequestKind::Subscribe => Self::Subscribe {
                resource: resource?,
            },
            RequestKind::SubscribeStatus => Self::SubscribeStatus {
                resource: resource?,
            },
            RequestKind::Unsubscribe => Self::Unsubscribe {
                resource: resource?,
            },
        })
    }
}

/// What a response reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseBody {
    /// Terminal success.
    Success {
        /// Resources the operation touched, if reported.
        affected: Option<Vec<ResourceName>>,
    },
    /// A data notification; not terminal.
    Data {
        /// The reported change.
        change: Change,
        /// The concrete resource(s) the data belongs to.
        affected: Option<Vec<ResourceName>>,
    },
    /// Terminal failure.
    Error(Status),
}

impl ResponseBody {
    /// The response code on the wire.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::Success { .. } => SUCCESS_CODE,
            Self::Data { .. } => DATA_CODE,
            Self::Error(status) => status.code(),
        }
    }

    /// False only for data notifications.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data { .. })
    }
}

/// A response to a request of kind `request` on `resource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Kind of the originating request.
    pub request: RequestKind,
    /// Resource of the originating request.
    pub resource: Option<ResourceName>,
    /// The outcome.
    pub body: ResponseBody,
}

impl Response {
    /// A success; an empty `affected` list is omitted.
    #[must_use]
    pub fn success(
        request: RequestKind,
        resource: Option<ResourceName>,
        affected: Vec<ResourceName>,
    ) -> Self {
        Self {
            request,
            resource,
            body: ResponseBody::Success {
                affected: non_empty(affected),
            },
        }
    }

    /// A data notification about `affected`.
    #[must_use]
    pub fn data(
        request: RequestKind,
        resource: Option<ResourceName>,
        change: Change,
        affected: Option<ResourceName>,
    ) -> Self {
        Self {
            request,
            resource,
            body: ResponseBody::Data {
                change,
                affected: affected.map(|name| vec![name]),
            },
        }
    }

    /// A failure.
    #[must_use]
    pub const fn error(
        request: RequestKind,
        resource: Option<ResourceName>,
        status: Status,
    ) -> Self {
        Self {
            request,
            resource,
            body: ResponseBody::Error(status),
        }
    }

    /// The affected resource, when exactly one is reported.
    #[must_use]
    pub fn affected_resource(&self) -> Option<&ResourceName> {
        match &self.body {
            ResponseBody::Success { affected } | ResponseBody::Data { affected, .. } => {
                match affected.as_deref() {
                    Some([single]) => Some(single),
                    _ => None,
                }
            }
            ResponseBody::Error(_) => None,
        }
    }
}

fn non_empty(affected: Vec<ResourceName>) -> Option<Vec<ResourceName>> {
    (!affected.is_empty()).then_some(affected)
}

/// A request with its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMessage {
    /// Header fields.
    pub header: Header,
    /// The request.
    pub request: Request,
}

impl RequestMessage {
    /// Wraps `request` with an empty header.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            header: Header::new(),
            request,
        }
    }

    /// Replaces the header.
    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }
}

/// A response with its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMessage {
    /// Header fields.
    pub header: Header,
    /// The response.
    pub response: Response,
}

impl ResponseMessage {
    /// Wraps `response` with an empty header.
    #[must_use]
    pub fn new(response: Response) -> Self {
        Self {
            header: Header::new(),
            response,
        }
    }
}

/// Any frame payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Client to server.
    Request(RequestMessage),
    /// Server to client.
    Response(ResponseMessage),
}

impl Message {
    /// The header of either kind of message.
    #[must_use]
    pub const fn header(&self) -> &Header {
        match self {
            Self::Request(message) => &message.header,
            Self::Response(message) => &message.header,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(RequestMessage::new(request))
    }
}

impl From<RequestMessage> for Message {
    fn from(message: RequestMessage) -> Self {
        Self::Request(message)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(ResponseMessage::new(response))
    }
}

impl From<ResponseMessage> for Message {
    fn from(message: ResponseMessage) -> Self {
        Self::Response(message)
    }
}
