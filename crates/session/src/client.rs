//! Client side of a session.

use crate::config::ClientConfig;
use crate::connection::{self, Outbound};
use crate::error::Result;

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use rxp_endpoint::{Endpoint, EndpointError, SharedCredentials, SharedObserver, dispatch};
use rxp_name::ResourceName;
use rxp_policy::AUTHORIZATION;
use rxp_protocol::{
    Data, Header, Message, MessageCodec, Request, RequestKind, RequestMessage, Response, Status,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Correlates responses with the request that caused them.
///
/// Only one request per key can be outstanding; a second one takes over the
/// first one's responses.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Originating request kind.
    pub kind: RequestKind,
    /// Originating resource, absent for `PING` and `UNSUBSCRIBE_ALL`.
    pub resource: Option<ResourceName>,
}

impl RequestKey {
    /// The key a request is filed under.
    #[must_use]
    pub fn of_request(request: &Request) -> Self {
        Self {
            kind: request.kind(),
            resource: request.resource().cloned(),
        }
    }

    /// The key a response is delivered to.
    #[must_use]
    pub fn of_response(response: &Response) -> Self {
        Self {
            kind: response.request,
            resource: response.resource.clone(),
        }
    }
}

type Pending = DashMap<RequestKey, SharedObserver>;

/// An [`Endpoint`] backed by a remote server.
///
/// Requests are written in call order; outcomes reach the observer given to
/// each call. Subscriptions stay registered until the server ends them.
/// A request too large for the frame limit is refused with
/// [`EndpointError::Unencodable`] and the connection stays up. When the
/// connection is lost every request still waiting for an outcome fails
/// with `INTERNAL_SERVER_ERROR`.
pub struct Client {
    outbound: Outbound,
    pending: Arc<Pending>,
    closed: CancellationToken,
}

impl Client {
    /// Connects to a server over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    #[instrument(skip(addr, config))]
    pub async fn connect(addr: impl ToSocketAddrs, config: &ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = %stream.peer_addr()?, "connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Runs a session over an already established stream.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn from_stream<S>(stream: S, config: &ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = MessageCodec::new().with_max_frame_size(config.max_frame_size);
        let (frames, sink) = connection::split(stream, codec);
        let (outbound, queued) = Outbound::channel(codec);
        let pending = Arc::new(Pending::new());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            if let Err(err) = connection::write_frames(sink, queued, writer_closed).await {
                warn!("cannot write to server: {err}");
            }
        });
        tokio::spawn(read_frames(frames, Arc::clone(&pending), closed.clone()));

        Self {
            outbound,
            pending,
            closed,
        }
    }

    /// Number of requests still waiting for a terminal response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// True once the connection is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the connection is gone.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Ends the session.
    pub fn close(&self) {
        self.closed.cancel();
    }

    fn submit(
        &self,
        credentials: &SharedCredentials,
        request: Request,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        if self.is_closed() {
            return Err(EndpointError::Closed);
        }

        let key = RequestKey::of_request(&request);
        let authorization = credentials.serialize();
        let mut header = Header::new();
        if !authorization.is_empty() {
            header.insert(AUTHORIZATION, authorization);
        }

        let message = RequestMessage::new(request).with_header(header);
        let frame = self.outbound.encode(message.into()).map_err(|err| {
            debug!(kind = %key.kind, "cannot encode request: {err}");
            EndpointError::Unencodable(err.to_string())
        })?;

        if self.pending.insert(key.clone(), observer).is_some() {
            debug!(kind = %key.kind, "request replaces an outstanding one");
        }

        // Without an entry the reader has already failed this request.
        if self.outbound.queue(frame).is_err() && self.pending.remove(&key).is_some() {
            return Err(EndpointError::Closed);
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_frames<R>(
    mut frames: FramedRead<ReadHalf<R>, MessageCodec>,
    pending: Arc<Pending>,
    closed: CancellationToken,
) where
    R: AsyncRead,
{
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            None => {
                debug!("connection closed by server");
                break;
            }
            Some(Err(err)) => {
                warn!("cannot read from server: {err}");
                break;
            }
            Some(Ok(Message::Response(message))) => deliver(&pending, message.response),
            Some(Ok(Message::Request(_))) => {
                warn!("server sent a request, closing");
                break;
            }
        }
    }

    closed.cancel();
    fail_pending(&pending);
}

fn fail_pending(pending: &Pending) {
    let keys: Vec<RequestKey> = pending.iter().map(|entry| entry.key().clone()).collect();
    for key in keys {
        let Some((RequestKey { kind, resource }, observer)) = pending.remove(&key) else {
            continue;
        };
        if let Err(err) = observer.on_error(kind, resource, Status::InternalServerError) {
            debug!(%kind, "observer gone: {err}");
        }
    }
}

fn deliver(pending: &Pending, response: Response) {
    let key = RequestKey::of_response(&response);
    let observer = if response.body.is_terminal() {
        pending.remove(&key).map(|(_, observer)| observer)
    } else {
        pending.get(&key).map(|entry| Arc::clone(entry.value()))
    };

    let Some(observer) = observer else {
        warn!(kind = %key.kind, "response without pending request");
        return;
    };

    if let Err(err) = dispatch(observer.as_ref(), response) {
        debug!(kind = %key.kind, "observer gone: {err}");
    }
}

impl Endpoint for Client {
    fn create(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Create { resource, data }, observer)
    }

    fn update(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Update { resource, data }, observer)
    }

    fn save(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        data: Data,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Save { resource, data }, observer)
    }

    fn delete(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Delete { resource }, observer)
    }

    fn read(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Read { resource }, observer)
    }

    fn subscribe(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Subscribe { resource }, observer)
    }

    fn subscribe_status(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::SubscribeStatus { resource }, observer)
    }

    fn unsubscribe(
        &self,
        credentials: SharedCredentials,
        resource: ResourceName,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Unsubscribe { resource }, observer)
    }

    fn unsubscribe_all(
        &self,
        credentials: SharedCredentials,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::UnsubscribeAll, observer)
    }

    fn ping(
        &self,
        credentials: SharedCredentials,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, Request::Ping, observer)
    }

    fn execute(
        &self,
        credentials: SharedCredentials,
        request: Request,
        observer: SharedObserver,
    ) -> rxp_endpoint::Result {
        self.submit(&credentials, request, observer)
    }
}
