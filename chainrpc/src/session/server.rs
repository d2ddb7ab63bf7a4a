//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The Tokio server session and accept loops.

use super::{Dispatcher, HandlerError, Request, SessionConfig, SessionContext};
use crate::RpcError;
use crate::buffer::ByteBuffer;
use crate::filter::{FilterError, FilterId, FilterRegistry};
use crate::framing::{
    Envelope, FramingError, MessageFilterCache, RemoteErrorCode, RequestHeader, ResponseHeader,
    decode_envelope, encode_error, encode_response,
};
use crate::negotiation::{ControlRequest, ControlResponse, FilterService};
use crate::transport::{
    AsyncClientConnection, AsyncMemoryListener, AsyncRawTransport, AsyncTcpTransport, CancelToken,
    TransportError,
};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[cfg(feature = "observability")]
use tracing::{debug, info, instrument, trace, warn};

/// Serves the requests of one accepted connection.
///
/// The session reads one request at a time. Out-of-band requests negotiate
/// transport filters; every other request goes to the [`Dispatcher`] entry
/// for its target. While a handler runs, ping-back frames are sent at the
/// interval the client asked for, so the client can tell a slow call from a
/// dead server.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterRegistry;
/// use chainrpc::session::{Dispatcher, Response, ServerSession, SessionConfig};
/// use chainrpc::stub::{AsyncClientStub, CallSemantics};
/// use chainrpc::transport::{AsyncClientConnection, AsyncMemoryTransport, WireConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (client, server) = AsyncMemoryTransport::pair("memory://echo");
///
/// let dispatcher = Dispatcher::new()
///     .bind_fn("Echo", |request| async move { Ok(Response::new(request.payload)) });
/// let session = ServerSession::new(
///     Box::new(server),
///     dispatcher,
///     FilterRegistry::with_defaults(),
///     SessionConfig::default(),
/// )
/// .unwrap();
/// tokio::spawn(session.run());
///
/// let connection =
///     AsyncClientConnection::new(Box::new(client), &WireConfig::memory("memory://echo")).unwrap();
/// let stub = AsyncClientStub::new("Echo", connection);
/// let reply = stub.call(0, vec!["hello".into()], CallSemantics::Twoway).await.unwrap();
/// assert_eq!(reply.as_slice(), b"hello");
/// # }
/// ```
pub struct ServerSession {
    connection: AsyncClientConnection,
    dispatcher: Dispatcher,
    filters: FilterService,
    message_filters: MessageFilterCache,
    config: SessionConfig,
    context: SessionContext,
    requests_served: u64,
}

impl ServerSession {
    /// Creates a session over an accepted transport.
    pub fn new(
        transport: Box<dyn AsyncRawTransport>,
        dispatcher: Dispatcher,
        registry: FilterRegistry,
        config: SessionConfig,
    ) -> Result<Self, RpcError> {
        config.validate().map_err(RpcError::invalid_configuration)?;
        let mut connection = AsyncClientConnection::with_wire_filters(
            transport,
            config.transport_type(),
            config.wire_filters()?,
        );
        connection.set_max_message_length(config.max_message_length);
        let filters = FilterService::new(registry.clone())
            .with_supported_protocols(config.supported_protocols.clone());

        Ok(Self {
            connection,
            dispatcher,
            filters,
            message_filters: MessageFilterCache::new(registry)
                .with_max_message_length(config.max_message_length),
            config,
            context: SessionContext::new(),
            requests_served: 0,
        })
    }

    /// The session handle passed to handlers.
    pub fn context(&self) -> SessionContext {
        self.context.clone()
    }

    /// Cancelling the token ends [`run`](Self::run).
    pub fn cancel_token(&self) -> CancelToken {
        self.connection.cancel_token()
    }

    /// Address of the client.
    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }

    /// Ids of the negotiated transport filters.
    pub fn transport_filter_ids(&self) -> Vec<FilterId> {
        self.connection.transport_filter_ids()
    }

    /// Requests handled so far, control requests included.
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Serves requests until the client disconnects, the session idles out,
    /// or the session is cancelled. Errors that leave the connection unusable
    /// end the session with `Err`.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(session = %self.context.id())))]
    pub async fn run(mut self) -> Result<(), RpcError> {
        #[cfg(feature = "observability")]
        debug!(endpoint = %self.endpoint(), "session started");

        let result = self.serve().await;
        self.connection.disconnect().await;

        #[cfg(feature = "observability")]
        match &result {
            Ok(()) => debug!(requests = self.requests_served, "session closed"),
            Err(error) => warn!(%error, requests = self.requests_served, "session failed"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), RpcError> {
        loop {
            let deadline = Instant::now() + self.config.idle_timeout;
            let frame = match self.connection.receive(deadline).await {
                Ok(frame) => frame,
                Err(TransportError::PeerDisconnect) | Err(TransportError::Cancelled) => return Ok(()),
                Err(TransportError::ReadTimeout) => {
                    #[cfg(feature = "observability")]
                    debug!(idle = ?self.config.idle_timeout, "closing idle session");
                    return Ok(());
                }
                Err(error) => return Err(error.into()),
            };

            match self.process(frame).await {
                Ok(()) => self.requests_served += 1,
                Err(RpcError::Cancelled) => return Ok(()),
                Err(error) if error.should_close_transport() => return Err(error),
                Err(_error) => {
                    #[cfg(feature = "observability")]
                    warn!(error = %_error, "request failed");
                }
            }
        }
    }

    async fn process(&mut self, frame: ByteBuffer) -> Result<(), RpcError> {
        let (message, filter_ids) = match self.message_filters.decode(frame) {
            Ok(decoded) => decoded,
            Err(error) => return self.reject(error).await,
        };
        let (header, payload) = match decode_envelope(message) {
            Ok(Envelope::Request(header, payload)) => (header, payload),
            Ok(_) => return self.reject(FramingError::decoding("expected a request")).await,
            Err(error) => return self.reject(error).await,
        };

        #[cfg(feature = "observability")]
        trace!(
            target_name = %header.target,
            method = header.method_id,
            oneway = header.oneway,
            out_of_band = header.out_of_band,
            "request"
        );

        if !self.version_supported(&header) {
            if header.oneway {
                #[cfg(feature = "observability")]
                debug!(
                    runtime_version = header.runtime_version,
                    archive_version = header.archive_version,
                    "dropping oneway request with unsupported version"
                );
                return Ok(());
            }
            let mismatch =
                ResponseHeader::version_mismatch(self.config.runtime_version, self.config.archive_version);
            return self.send(encode_error(&mismatch)?).await;
        }

        if header.out_of_band {
            return self.negotiate(&header).await;
        }
        self.dispatch(header, payload, filter_ids).await
    }

    fn version_supported(&self, header: &RequestHeader) -> bool {
        header.runtime_version <= self.config.runtime_version
            && (self.config.archive_version == 0
                || header.archive_version <= self.config.archive_version)
    }

    /// Answers a frame that could not be decoded. The frame boundaries are
    /// intact, so the session goes on.
    async fn reject(&mut self, error: FramingError) -> Result<(), RpcError> {
        let code = match &error {
            FramingError::PayloadFilterMismatch { .. } => RemoteErrorCode::PayloadFilterMismatch,
            FramingError::Filter(FilterError::UnknownFilter { .. }) => RemoteErrorCode::UnknownFilter,
            _ => RemoteErrorCode::DecodingError,
        };
        #[cfg(feature = "observability")]
        warn!(%error, "rejecting request");
        let header = ResponseHeader::error(code, error.to_string());
        self.send(encode_error(&header)?).await
    }

    /// Handles a transport filter request. The new filters take over after
    /// the response has gone out through the old ones.
    async fn negotiate(&mut self, header: &RequestHeader) -> Result<(), RpcError> {
        let locked = self.context.transport_filters_locked();
        let (response, selection) = match ControlRequest::decode(&header.out_of_band_data) {
            Ok(request) => self.filters.handle(&request, locked),
            Err(error) => (ControlResponse::rejected(&error), None),
        };

        #[cfg(feature = "observability")]
        if selection.is_none() {
            debug!(code = ?response.code(), message = %response.message, "filter request rejected");
        }

        let reply = ResponseHeader {
            out_of_band_data: response.encode()?,
            ..ResponseHeader::ok()
        };
        self.send(encode_response(&reply, Vec::new())?).await?;

        if let Some(selection) = selection {
            #[cfg(feature = "observability")]
            info!(filters = ?selection.filter_ids(), protocol = ?selection.protocol, "transport filters installed");
            self.context.set_transport_protocol(selection.protocol);
            self.connection.set_transport_filters(selection.filters);
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        header: RequestHeader,
        payload: ByteBuffer,
        filter_ids: Vec<FilterId>,
    ) -> Result<(), RpcError> {
        let Some(handler) = self.dispatcher.get(&header.target) else {
            #[cfg(feature = "observability")]
            warn!(target_name = %header.target, "no handler bound");
            if header.oneway {
                return Ok(());
            }
            let error = ResponseHeader::error(
                RemoteErrorCode::UnknownTarget,
                format!("no handler bound to {}", header.target),
            );
            return self.send(encode_error(&error)?).await;
        };

        let ping_back = self.ping_back_interval(&header);
        let request = Request {
            target: header.target,
            method_id: header.method_id,
            oneway: header.oneway,
            runtime_version: header.runtime_version,
            archive_version: header.archive_version,
            user_data: header.user_data,
            payload,
            session: self.context.clone(),
        };

        let cancel = self.connection.cancel_token();
        let mut call = handler.handle(request);
        let result = match ping_back {
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                result = &mut call => result,
            },
            Some(interval) => {
                let start = tokio::time::Instant::now() + interval;
                let mut ticker = tokio::time::interval_at(start, interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                        result = &mut call => break result,
                        _ = ticker.tick() => self.send_ping_back(interval, &filter_ids).await?,
                    }
                }
            }
        };

        if header.oneway {
            #[cfg(feature = "observability")]
            if let Err(error) = &result {
                debug!(%error, "oneway call failed");
            }
            return Ok(());
        }

        let (reply, payload) = match result {
            Ok(response) => (
                ResponseHeader {
                    user_data: response.user_data,
                    ..ResponseHeader::ok()
                },
                response.payload,
            ),
            Err(HandlerError::Exception { message }) => (ResponseHeader::exception(message), Vec::new()),
            Err(HandlerError::Remote { code, message }) => (ResponseHeader::error(code, message), Vec::new()),
        };
        let buffers = encode_response(&reply, payload)?;
        let buffers = self.message_filters.encode(buffers, &filter_ids)?;
        self.send(buffers).await
    }

    /// Ping-backs only go to twoway callers that asked for them, and never
    /// over HTTP where each request gets exactly one response.
    fn ping_back_interval(&self, header: &RequestHeader) -> Option<Duration> {
        let wanted = !header.oneway
            && header.ping_back_interval_ms > 0
            && self.config.enable_ping_back
            && !self.connection.transport_type().is_http();
        wanted.then(|| Duration::from_millis(header.ping_back_interval_ms.into()))
    }

    async fn send_ping_back(
        &mut self,
        interval: Duration,
        filter_ids: &[FilterId],
    ) -> Result<(), RpcError> {
        #[cfg(feature = "observability")]
        trace!(?interval, "ping-back");
        let interval_ms = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        let buffers = encode_response(&ResponseHeader::ping_back(interval_ms), Vec::new())?;
        let buffers = self.message_filters.encode(buffers, filter_ids)?;
        self.send(buffers).await
    }

    async fn send(&mut self, buffers: Vec<ByteBuffer>) -> Result<(), RpcError> {
        let deadline = Instant::now() + self.config.write_timeout;
        self.connection.send(buffers, deadline).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.context.id())
            .field("endpoint", &self.endpoint())
            .field("transport_filters", &self.transport_filter_ids())
            .field("requests_served", &self.requests_served)
            .finish()
    }
}

/// Accepts connections and runs a [`ServerSession`] task for each.
///
/// # Examples
///
/// ```rust,no_run
/// use chainrpc::filter::FilterRegistry;
/// use chainrpc::session::{Dispatcher, Response, Server, SessionConfig};
/// use chainrpc::transport::CancelToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = Dispatcher::new()
///     .bind_fn("Echo", |request| async move { Ok(Response::new(request.payload)) });
/// let server = Server::new(dispatcher, FilterRegistry::with_defaults(), SessionConfig::default());
///
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:50001").await?;
/// server.serve_tcp(listener, CancelToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    dispatcher: Dispatcher,
    registry: FilterRegistry,
    config: SessionConfig,
}

impl Server {
    /// Creates a server routing requests through `dispatcher`.
    pub fn new(dispatcher: Dispatcher, registry: FilterRegistry, config: SessionConfig) -> Self {
        Self {
            dispatcher,
            registry,
            config,
        }
    }

    /// The shared handler table.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Creates a session for an accepted transport.
    pub fn session(&self, transport: Box<dyn AsyncRawTransport>) -> Result<ServerSession, RpcError> {
        ServerSession::new(
            transport,
            self.dispatcher.clone(),
            self.registry.clone(),
            self.config.clone(),
        )
    }

    /// Serves TCP connections until `shutdown` is cancelled.
    #[cfg_attr(feature = "observability", instrument(skip_all))]
    pub async fn serve_tcp(&self, listener: TcpListener, shutdown: CancelToken) -> Result<(), RpcError> {
        self.config.validate().map_err(RpcError::invalid_configuration)?;
        #[cfg(feature = "observability")]
        if let Ok(address) = listener.local_addr() {
            info!(%address, "listening");
        }

        let mut sessions = SessionSet::default();
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, _peer) = match accepted {
                Ok(accepted) => accepted,
                Err(_error) => {
                    #[cfg(feature = "observability")]
                    warn!(error = %_error, "accept failed");
                    continue;
                }
            };
            #[cfg(feature = "observability")]
            debug!(peer = %_peer, "accepted connection");
            let transport = match AsyncTcpTransport::from_stream(stream) {
                Ok(transport) => transport,
                Err(_error) => {
                    #[cfg(feature = "observability")]
                    warn!(error = %_error, "accepted socket unusable");
                    continue;
                }
            };
            self.admit(&mut sessions, Box::new(transport));
        }
        sessions.shutdown().await;
        Ok(())
    }

    /// Serves in-process connections until every client handle is gone or
    /// `shutdown` is cancelled.
    pub async fn serve_memory(
        &self,
        mut listener: AsyncMemoryListener,
        shutdown: CancelToken,
    ) -> Result<(), RpcError> {
        self.config.validate().map_err(RpcError::invalid_configuration)?;
        let mut sessions = SessionSet::default();
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let Some(transport) = accepted else { break };
            self.admit(&mut sessions, Box::new(transport));
        }
        sessions.shutdown().await;
        Ok(())
    }

    /// Starts a session for one accepted transport. A connection that
    /// cannot get a session is dropped and the listener carries on.
    fn admit(&self, sessions: &mut SessionSet, transport: Box<dyn AsyncRawTransport>) {
        match self.session(transport) {
            Ok(session) => sessions.spawn(session),
            Err(_error) => {
                #[cfg(feature = "observability")]
                warn!(error = %_error, "could not start session");
            }
        }
    }
}

#[derive(Default)]
struct SessionSet {
    running: Vec<(CancelToken, JoinHandle<Result<(), RpcError>>)>,
}

impl SessionSet {
    fn spawn(&mut self, session: ServerSession) {
        self.running.retain(|(_, task)| !task.is_finished());
        let cancel = session.cancel_token();
        self.running.push((cancel, tokio::spawn(session.run())));
    }

    async fn shutdown(self) {
        for (cancel, _) in &self.running {
            cancel.cancel();
        }
        for (_, task) in self.running {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(_error)) => {
                    #[cfg(feature = "observability")]
                    debug!(error = %_error, "session ended with error");
                }
                Err(_error) => {
                    #[cfg(feature = "observability")]
                    warn!(error = %_error, "session task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::copy_buffers;
    use crate::framing::{ResponseKind, encode_message, encode_request};
    use crate::negotiation::NegotiationError;
    use crate::session::Response;
    use crate::transport::{AsyncMemoryTransport, TransportType, WireConfig};

    const WAIT: Duration = Duration::from_secs(2);

    fn echo() -> Dispatcher {
        Dispatcher::new().bind_fn("Echo", |request: Request| async move {
            match request.method_id {
                0 => Ok(Response::new(request.payload)),
                1 => {
                    tokio::time::sleep(Duration::from_millis(120)).await;
                    Ok(Response::new("slow"))
                }
                2 => {
                    request.session.lock_transport_filters();
                    Ok(Response::default().with_user_data(b"locked".to_vec()))
                }
                _ => Err(HandlerError::exception("boom")),
            }
        })
    }

    fn start(config: SessionConfig) -> (AsyncClientConnection, JoinHandle<Result<(), RpcError>>) {
        let (client, server) = AsyncMemoryTransport::pair("memory://session");
        let session = ServerSession::new(
            Box::new(server),
            echo(),
            FilterRegistry::with_defaults(),
            config,
        )
        .unwrap();
        let task = tokio::spawn(session.run());
        let connection =
            AsyncClientConnection::new(Box::new(client), &WireConfig::memory("memory://session")).unwrap();
        (connection, task)
    }

    async fn call(connection: &mut AsyncClientConnection, header: &RequestHeader, body: &str) -> Envelope {
        let frame = encode_request(header, vec![ByteBuffer::from(body)]).unwrap();
        let deadline = Instant::now() + WAIT;
        connection.send(frame, deadline).await.unwrap();
        decode_envelope(connection.receive(deadline).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_echo_and_exception() {
        let (mut connection, task) = start(SessionConfig::default());

        match call(&mut connection, &RequestHeader::new("Echo", 0), "hello").await {
            Envelope::Response(header, payload) => {
                assert_eq!(header.kind, ResponseKind::Ok);
                assert_eq!(payload.as_slice(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }

        match call(&mut connection, &RequestHeader::new("Echo", 9), "").await {
            Envelope::Response(header, _) => {
                assert_eq!(header.kind, ResponseKind::Exception);
                assert_eq!(header.message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        connection.disconnect().await;
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let (mut connection, _task) = start(SessionConfig::default());
        match call(&mut connection, &RequestHeader::new("Missing", 0), "x").await {
            Envelope::Error(header) => assert_eq!(header.error_code, RemoteErrorCode::UnknownTarget),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut connection, _task) =
            start(SessionConfig::default().with_runtime_version(8).with_archive_version(3));

        let header = RequestHeader {
            runtime_version: 12,
            ..RequestHeader::new("Echo", 0)
        };
        match call(&mut connection, &header, "x").await {
            Envelope::Error(header) => {
                assert_eq!(header.error_code, RemoteErrorCode::VersionMismatch);
                assert_eq!((header.arg0, header.arg1), (8, 3));
            }
            other => panic!("unexpected {other:?}"),
        }

        // A oneway request with a bad version is dropped; the next twoway
        // request is answered normally.
        let oneway = RequestHeader {
            runtime_version: 12,
            oneway: true,
            ..RequestHeader::new("Echo", 0)
        };
        let frame = encode_request(&oneway, vec![ByteBuffer::from("x")]).unwrap();
        connection.send(frame, Instant::now() + WAIT).await.unwrap();

        let header = RequestHeader {
            runtime_version: 8,
            archive_version: 3,
            ..RequestHeader::new("Echo", 0)
        };
        assert!(matches!(call(&mut connection, &header, "ok").await, Envelope::Response(..)));
    }

    #[tokio::test]
    async fn test_message_filters_mirrored() {
        let (mut connection, _task) = start(SessionConfig::default());
        let registry = FilterRegistry::with_defaults();
        let mut chain = registry.create_chain(&[FilterId::Xor]).unwrap();

        let request = encode_request(&RequestHeader::new("Echo", 0), vec![ByteBuffer::from("secret")]).unwrap();
        let filtered = encode_message(request, &mut chain).unwrap();
        let deadline = Instant::now() + WAIT;
        connection.send(filtered, deadline).await.unwrap();

        let frame = connection.receive(deadline).await.unwrap();
        let mut cache = MessageFilterCache::new(registry);
        let (message, ids) = cache.decode(frame).unwrap();
        assert_eq!(ids, vec![FilterId::Xor]);
        match decode_envelope(message).unwrap() {
            Envelope::Response(_, payload) => assert_eq!(payload.as_slice(), b"secret"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "compression")]
    #[tokio::test]
    async fn test_decompressed_length_bounded_by_config() {
        let (mut connection, _task) = start(SessionConfig::default().with_max_message_length(4096));
        let mut zlib = FilterRegistry::with_defaults()
            .create_chain(&[FilterId::ZlibStateless])
            .unwrap();

        let request =
            encode_request(&RequestHeader::new("Echo", 0), vec![ByteBuffer::zeroed(64 * 1024)]).unwrap();
        let filtered = encode_message(request, &mut zlib).unwrap();
        let deadline = Instant::now() + WAIT;
        connection.send(filtered, deadline).await.unwrap();
        match decode_envelope(connection.receive(deadline).await.unwrap()).unwrap() {
            Envelope::Error(header) => assert_eq!(header.error_code, RemoteErrorCode::DecodingError),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            call(&mut connection, &RequestHeader::new("Echo", 0), "still up").await,
            Envelope::Response(..)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_frame_answered() {
        let (mut connection, _task) = start(SessionConfig::default());
        let deadline = Instant::now() + WAIT;
        connection.send(vec![ByteBuffer::from(&[1u8, 99, 0][..])], deadline).await.unwrap();
        match decode_envelope(connection.receive(deadline).await.unwrap()).unwrap() {
            Envelope::Error(header) => assert_eq!(header.error_code, RemoteErrorCode::DecodingError),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            call(&mut connection, &RequestHeader::new("Echo", 0), "still up").await,
            Envelope::Response(..)
        ));
    }

    #[tokio::test]
    async fn test_ping_backs_while_handler_runs() {
        let (mut connection, _task) = start(SessionConfig::default());
        let header = RequestHeader {
            ping_back_interval_ms: 40,
            ..RequestHeader::new("Echo", 1)
        };
        let frame = encode_request(&header, vec![ByteBuffer::from("x")]).unwrap();
        let deadline = Instant::now() + WAIT;
        connection.send(frame, deadline).await.unwrap();

        let mut ping_backs = 0;
        loop {
            match decode_envelope(connection.receive(deadline).await.unwrap()).unwrap() {
                Envelope::Response(header, _) if header.is_ping_back() => ping_backs += 1,
                Envelope::Response(_, payload) => {
                    assert_eq!(payload.as_slice(), b"slow");
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(ping_backs >= 1);
    }

    #[tokio::test]
    async fn test_filter_negotiation_and_lock() {
        let (mut connection, _task) = start(SessionConfig::default());

        let control = |ids: &[FilterId]| RequestHeader {
            out_of_band: true,
            out_of_band_data: ControlRequest::request_transport_filters(ids).encode().unwrap(),
            ..RequestHeader::new("Echo", 0)
        };

        let header = control(&[FilterId::Xor]);
        match call(&mut connection, &header, "").await {
            Envelope::Response(reply, _) => {
                assert!(ControlResponse::decode(&reply.out_of_band_data).unwrap().into_result().is_ok());
            }
            other => panic!("unexpected {other:?}"),
        }
        let registry = FilterRegistry::with_defaults();
        connection.set_transport_filters(registry.create_filters(&[FilterId::Xor]).unwrap());

        match call(&mut connection, &RequestHeader::new("Echo", 2), "").await {
            Envelope::Response(reply, _) => assert_eq!(reply.user_data, b"locked"),
            other => panic!("unexpected {other:?}"),
        }

        let header = control(&[]);
        match call(&mut connection, &header, "").await {
            Envelope::Response(reply, _) => {
                let result = ControlResponse::decode(&reply.out_of_band_data).unwrap().into_result();
                assert!(matches!(result, Err(NegotiationError::Rejected { code: RemoteErrorCode::FiltersLocked, .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(connection.transport_filter_ids(), vec![FilterId::Xor]);
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let (client, server) = AsyncMemoryTransport::pair("memory://cancel");
        let session =
            ServerSession::new(Box::new(server), echo(), FilterRegistry::new(), SessionConfig::default())
                .unwrap();
        let cancel = session.cancel_token();
        let task = tokio::spawn(session.run());
        cancel.cancel();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
        drop(client);
    }

    #[tokio::test]
    async fn test_serve_memory() {
        let (client, listener) = AsyncMemoryTransport::listen("memory://listener");
        let server = Server::new(echo(), FilterRegistry::with_defaults(), SessionConfig::default());
        let shutdown = CancelToken::new();
        let serving = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve_memory(listener, shutdown).await })
        };

        let mut connection =
            AsyncClientConnection::new(Box::new(client), &WireConfig::memory("memory://listener")).unwrap();
        connection.connect(Instant::now() + WAIT).await.unwrap();
        assert_eq!(connection.transport_type(), TransportType::Memory);
        match call(&mut connection, &RequestHeader::new("Echo", 0), "via listener").await {
            Envelope::Response(_, payload) => {
                assert_eq!(copy_buffers(&[payload]), b"via listener");
            }
            other => panic!("unexpected {other:?}"),
        }

        shutdown.cancel();
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_serve_memory_survives_panicking_session() {
        let dispatcher = Dispatcher::new().bind_fn("Echo", |request: Request| async move {
            if request.method_id == 9 {
                panic!("handler failure");
            }
            Ok(Response::new(request.payload))
        });
        let (client, listener) = AsyncMemoryTransport::listen("memory://panics");
        let server = Server::new(dispatcher, FilterRegistry::with_defaults(), SessionConfig::default());
        let shutdown = CancelToken::new();
        let serving = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve_memory(listener, shutdown).await })
        };

        let wire = WireConfig::memory("memory://panics");
        let deadline = Instant::now() + WAIT;
        let mut doomed = AsyncClientConnection::new(Box::new(client.new_client()), &wire).unwrap();
        doomed.connect(deadline).await.unwrap();
        let frame = encode_request(&RequestHeader::new("Echo", 9), vec![ByteBuffer::from("boom")]).unwrap();
        doomed.send(frame, deadline).await.unwrap();
        assert!(doomed.receive(deadline).await.is_err());

        let mut healthy = AsyncClientConnection::new(Box::new(client), &wire).unwrap();
        healthy.connect(deadline).await.unwrap();
        match call(&mut healthy, &RequestHeader::new("Echo", 0), "still serving").await {
            Envelope::Response(_, payload) => assert_eq!(copy_buffers(&[payload]), b"still serving"),
            other => panic!("unexpected {other:?}"),
        }

        shutdown.cancel();
        assert!(serving.await.unwrap().is_ok());
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn test_serve_tcp_keeps_listening_when_sessions_fail() {
        use crate::filter::{HttpSessionRegistry, TlsFilterConfig};

        let tls = TlsFilterConfig::client_with_roots(rustls::RootCertStore::empty(), "localhost").unwrap();
        let config = SessionConfig::default().with_https(HttpSessionRegistry::new(), tls);
        let server = Server::new(echo(), FilterRegistry::with_defaults(), config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = CancelToken::new();
        let serving = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve_tcp(listener, shutdown).await })
        };

        for _ in 0..3 {
            let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
            let mut byte = [0u8; 1];
            let read = tokio::time::timeout(WAIT, tokio::io::AsyncReadExt::read(&mut stream, &mut byte))
                .await
                .unwrap();
            assert!(matches!(read, Ok(0) | Err(_)));
        }
        assert!(!serving.is_finished());

        shutdown.cancel();
        assert!(serving.await.unwrap().is_ok());
    }
}
