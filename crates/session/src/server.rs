//! Server side of a session.

use crate::config::ConfigHandle;
use crate::connection::{self, Outbound, SendError};
use crate::error::{Error, Result};

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use rxp_endpoint::{DeliveryError, Endpoint, Observer, ObserverId, SharedObserver};
use rxp_name::ResourceName;
use rxp_policy::{AUTHORIZATION, AccessPolicy, TokenDecoder, resolve_credentials};
use rxp_protocol::{
    Change, Message, MessageCodec, RequestKind, RequestMessage, Response, ResponseMessage, Status,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Accepts connections and hands their requests to an [`Endpoint`].
#[derive(Clone)]
pub struct Server {
    endpoint: Arc<dyn Endpoint>,
    config: ConfigHandle,
    decoder: Option<Arc<dyn TokenDecoder>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a server for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Arc<dyn Endpoint>, config: ConfigHandle) -> Self {
        Self {
            endpoint,
            config,
            decoder: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Accepts `Bearer` tokens, decoding them with `decoder`.
    #[must_use]
    pub fn with_token_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// The configuration handle, for reloading.
    #[must_use]
    pub const fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Stops accepting and ends every open connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.load().listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Binds the configured address and serves it on a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;

        let server = self.clone();
        tokio::spawn(async move {
            if let Err(err) = server.serve(listener).await {
                error!("server stopped: {err}");
            }
        });

        Ok(addr)
    }

    /// Accepts connections from `listener` until [`Self::shutdown`].
    ///
    /// # Errors
    ///
    /// Currently never fails; accept errors are logged and skipped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let limit = Arc::new(Semaphore::new(self.config.load().max_connections));

        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("server shutdown requested");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("failed to accept connection: {err}");
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                warn!(%peer, "max connections reached, rejecting connection");
                continue;
            };

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer).await {
                    warn!(%peer, "connection error: {err}");
                }
                drop(permit);
            });
        }

        Ok(())
    }

    #[instrument(skip(self, stream))]
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!("new connection");
        stream.set_nodelay(true)?;
        self.serve_connection(stream).await
    }

    /// Runs one session over `stream` until the peer disconnects, a frame
    /// fails to decode or the server shuts down.
    ///
    /// When the session ends every subscription it made is released.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or protocol failure.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = MessageCodec::new().with_max_frame_size(self.config.load().max_frame_size);
        let (mut frames, sink) = connection::split(stream, codec);
        let (outbound, queued) = Outbound::channel(codec);
        let closing = self.shutdown.child_token();
        let writer = tokio::spawn(connection::write_frames(sink, queued, closing.clone()));

        let observer = Arc::new(SessionObserver::new(outbound));
        let result = loop {
            let frame = tokio::select! {
                () = closing.cancelled() => break Ok(()),
                frame = frames.next() => frame,
            };

            match frame {
                None => {
                    debug!("connection closed by peer");
                    break Ok(());
                }
                Some(Err(err)) => break Err(Error::Io(err)),
                Some(Ok(Message::Request(request))) => self.handle_request(request, &observer),
                Some(Ok(Message::Response(_))) => break Err(Error::UnexpectedMessage("response")),
            }
        };

        closing.cancel();
        self.release(observer.id());

        match writer.await {
            Ok(Err(err)) if result.is_ok() => Err(err),
            _ => result,
        }
    }

    fn handle_request(&self, message: RequestMessage, observer: &Arc<SessionObserver>) {
        let RequestMessage { header, request } = message;
        let kind = request.kind();
        let resource = request.resource().cloned();

        let config = self.config.load();
        let credentials = match resolve_credentials(
            config.default_credentials.as_deref(),
            header.get(AUTHORIZATION),
            self.decoder.as_deref(),
        ) {
            Ok(credentials) => credentials,
            Err(err) => {
                debug!(%kind, "rejecting credentials: {err}");
                observer.reply(Response::error(kind, resource, credential_status(&err)));
                return;
            }
        };

        let target: SharedObserver = Arc::clone(observer) as SharedObserver;
        if let Err(err) = self.endpoint.execute(Arc::new(credentials), request, target) {
            warn!(%kind, "endpoint refused request: {err}");
            observer.reply(Response::error(kind, resource, Status::InternalServerError));
        }
    }

    /// Drops the subscriptions of a finished session. Their final
    /// notifications go nowhere.
    fn release(&self, id: ObserverId) {
        let (orphan, _) = Outbound::channel(MessageCodec::new());
        let observer = Arc::new(SessionObserver { id, outbound: orphan });
        if let Err(err) = self
            .endpoint
            .unsubscribe_all(Arc::new(AccessPolicy::new()), observer)
        {
            debug!("cannot release subscriptions: {err}");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("bearer_tokens", &self.decoder.is_some())
            .finish_non_exhaustive()
    }
}

/// Malformed grants are the client's fault; refused tokens are a denial.
const fn credential_status(err: &rxp_policy::Error) -> Status {
    match err {
        rxp_policy::Error::InvalidAccessSpec(_)
        | rxp_policy::Error::InvalidAuthorization(_)
        | rxp_policy::Error::InvalidName(_) => Status::BadRequest,
        rxp_policy::Error::UnsupportedScheme(_) | rxp_policy::Error::Token(_) => Status::Forbidden,
    }
}

/// Turns endpoint callbacks into queued response frames for one connection.
struct SessionObserver {
    id: ObserverId,
    outbound: Outbound,
}

impl SessionObserver {
    fn new(outbound: Outbound) -> Self {
        Self {
            id: ObserverId::new(),
            outbound,
        }
    }

    /// Queues `response`. One that cannot be encoded is replaced by an
    /// `INTERNAL_SERVER_ERROR` for the same request, and the connection
    /// carries on.
    fn send(&self, response: Response) -> std::result::Result<(), DeliveryError> {
        let request = response.request;
        let resource = response.resource.clone();

        match self.outbound.send(ResponseMessage::new(response).into()) {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => Err(DeliveryError::Closed),
            Err(SendError::Encode(err)) => {
                warn!(%request, "cannot encode response: {err}");
                self.reply(Response::error(
                    request,
                    resource,
                    Status::InternalServerError,
                ));
                Err(DeliveryError::Unencodable(err.to_string()))
            }
        }
    }

    fn reply(&self, response: Response) {
        if let Err(err) = self.outbound.send(ResponseMessage::new(response).into()) {
            debug!("dropping response: {err}");
        }
    }
}

impl Observer for SessionObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn on_success(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        affected: Vec<ResourceName>,
    ) -> std::result::Result<(), DeliveryError> {
        self.send(Response::success(request, resource, affected))
    }

    fn on_data(
        &self,
        request: RequestKind,
        resource: ResourceName,
        affected: Option<ResourceName>,
        change: Change,
    ) -> std::result::Result<(), DeliveryError> {
        self.send(Response::data(request, Some(resource), change, affected))
    }

    fn on_error(
        &self,
        request: RequestKind,
        resource: Option<ResourceName>,
        status: Status,
    ) -> std::result::Result<(), DeliveryError> {
        self.send(Response::error(request, resource, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use futures::SinkExt;
    use pretty_assertions::assert_eq;
    use rxp_endpoint_memory::{MemoryEndpoint, MemoryEndpointConfig};
    use rxp_policy::StaticTokenDecoder;
    use rxp_protocol::{Data, Header, Request};
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio_util::codec::{FramedRead, FramedWrite};

    struct Peer {
        frames: FramedRead<ReadHalf<DuplexStream>, MessageCodec>,
        sink: FramedWrite<WriteHalf<DuplexStream>, MessageCodec>,
    }

    impl Peer {
        async fn send(&mut self, authorization: Option<&str>, request: Request) {
            let mut header = Header::new();
            if let Some(authorization) = authorization {
                header.insert(AUTHORIZATION, authorization);
            }
            self.sink
                .send(Message::from(RequestMessage::new(request).with_header(header)))
                .await
                .unwrap();
        }

        async fn receive(&mut self) -> Response {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.frames.next())
                .await
                .expect("timed out waiting for a response")
                .expect("connection closed")
                .unwrap();
            match frame {
                Message::Response(message) => message.response,
                Message::Request(message) => panic!("unexpected {message:?}"),
            }
        }
    }

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn server_with(config: ServerConfig) -> (Server, MemoryEndpoint) {
        let endpoint = MemoryEndpoint::start(MemoryEndpointConfig::default()).unwrap();
        let server = Server::new(Arc::new(endpoint.clone()), ConfigHandle::new(config));
        (server, endpoint)
    }

    fn server() -> (Server, MemoryEndpoint) {
        server_with(ServerConfig::default())
    }

    fn connect(server: &Server) -> (Peer, JoinHandle<Result<()>>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let server = server.clone();
        let session = tokio::spawn(async move { server.serve_connection(remote).await });
        let (reader, writer) = tokio::io::split(local);
        let peer = Peer {
            frames: FramedRead::new(reader, MessageCodec::new()),
            sink: FramedWrite::new(writer, MessageCodec::new()),
        };
        (peer, session)
    }

    fn create(resource: &str) -> Request {
        Request::Create {
            resource: name(resource),
            data: Data::new("text/plain", "x"),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let (server, _endpoint) = server();
        let (mut peer, _session) = connect(&server);

        peer.send(None, Request::Ping).await;
        assert_eq!(
            peer.receive().await,
            Response::success(RequestKind::Ping, None, vec![])
        );
    }

    #[tokio::test]
    async fn test_authorization_header_grants_rights() {
        let (server, endpoint) = server();
        let (mut peer, _session) = connect(&server);

        peer.send(None, create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("a/b")), Status::Forbidden)
        );

        peer.send(Some("a/# c"), create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::success(RequestKind::Create, Some(name("a/b")), vec![name("a/b")])
        );
        assert!(endpoint.get(&name("a/b")).is_some());
    }

    #[tokio::test]
    async fn test_malformed_authorization_is_bad_request() {
        let (server, _endpoint) = server();
        let (mut peer, _session) = connect(&server);

        peer.send(Some("a/#"), create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("a/b")), Status::BadRequest)
        );

        peer.send(Some("a/# xyz"), create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("a/b")), Status::BadRequest)
        );
    }

    #[tokio::test]
    async fn test_bearer_tokens() {
        let (server, _endpoint) = server();
        let (mut peer, _session) = connect(&server);

        peer.send(Some("Bearer abc"), create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("a/b")), Status::Forbidden)
        );

        let server = server.with_token_decoder(Arc::new(
            StaticTokenDecoder::new().with_token("abc", "a/# crud", 0),
        ));
        let (mut peer, _session) = connect(&server);

        peer.send(Some("bearer abc"), create("a/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::success(RequestKind::Create, Some(name("a/b")), vec![name("a/b")])
        );

        peer.send(Some("Bearer other"), create("a/c")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("a/c")), Status::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_default_credentials_follow_config() {
        let (server, _endpoint) = server_with(ServerConfig {
            default_credentials: Some("public/# cr".to_owned()),
            ..ServerConfig::default()
        });
        let (mut peer, _session) = connect(&server);

        peer.send(None, create("public/a")).await;
        assert_eq!(
            peer.receive().await,
            Response::success(RequestKind::Create, Some(name("public/a")), vec![name("public/a")])
        );

        server.config().store(ServerConfig::default());
        peer.send(None, create("public/b")).await;
        assert_eq!(
            peer.receive().await,
            Response::error(RequestKind::Create, Some(name("public/b")), Status::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_oversized_response_fails_only_its_request() {
        let (server, endpoint) = server_with(ServerConfig {
            max_frame_size: 256,
            ..ServerConfig::default()
        });
        let (observer, mut created) = rxp_endpoint::ChannelObserver::new();
        endpoint
            .create(
                Arc::new(AccessPolicy::from_authorization("# c").unwrap()),
                name("big"),
                Data::new("text/plain", vec![b'x'; 1024]),
                observer,
            )
            .unwrap();
        assert!(created.recv().await.unwrap().is_terminal());

        let (mut peer, session) = connect(&server);
        peer.send(
            Some("# r"),
            Request::Read {
                resource: name("big"),
            },
        )
        .await;
        assert_eq!(
            peer.receive().await,
            Response::error(
                RequestKind::Read,
                Some(name("big")),
                Status::InternalServerError
            )
        );

        peer.send(None, Request::Ping).await;
        assert_eq!(
            peer.receive().await,
            Response::success(RequestKind::Ping, None, vec![])
        );
        assert!(!session.is_finished());
    }

    #[tokio::test]
    async fn test_response_from_client_ends_session() {
        let (server, _endpoint) = server();
        let (mut peer, session) = connect(&server);

        peer.sink
            .send(Message::from(Response::success(RequestKind::Ping, None, vec![])))
            .await
            .unwrap();

        assert!(matches!(
            session.await.unwrap(),
            Err(Error::UnexpectedMessage("response"))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions() {
        let (server, endpoint) = server();
        let (mut peer, session) = connect(&server);

        peer.send(
            Some("# r"),
            Request::Subscribe {
                resource: name("a/#"),
            },
        )
        .await;
        peer.send(Some("# r"), Request::Ping).await;
        peer.receive().await;
        assert_eq!(endpoint.subscriptions(), 1);

        drop(peer);
        session.await.unwrap().unwrap();

        for _ in 0..100 {
            if endpoint.subscriptions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(endpoint.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_sessions() {
        let (server, _endpoint) = server();
        let (_peer, session) = connect(&server);

        server.shutdown();
        session.await.unwrap().unwrap();
    }

    #[test]
    fn test_credential_errors_map_to_status() {
        assert_eq!(
            credential_status(&rxp_policy::Error::InvalidAuthorization("x".to_owned())),
            Status::BadRequest
        );
        assert_eq!(
            credential_status(&rxp_policy::Error::Token("expired".to_owned())),
            Status::Forbidden
        );
    }
}
