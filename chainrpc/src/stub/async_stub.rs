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

//! The Tokio client stub.

use super::machine::{
    CallMachine, PingBackMonitor, Reply, control_result, decode_reply, downgrade_versions,
    encode_call, encode_control,
};
use super::{CallPhase, CallSemantics, CancelHandle, Deadline, StubConfig};
use crate::buffer::ByteBuffer;
use crate::filter::{Filter, FilterChain, FilterId, FilterRegistry};
use crate::framing::ResponseHeader;
use crate::negotiation::{ControlRequest, TransportProtocol, transport_filter_ids};
use crate::transport::{AsyncClientConnection, CancelToken, TransportError};
use crate::{CallError, RpcError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[cfg(feature = "observability")]
use tracing::{debug, instrument, trace, warn};

struct Inner {
    target: String,
    config: StubConfig,
    connection: AsyncClientConnection,
    registry: FilterRegistry,
    message_filters: FilterChain,
    custom_filters: Vec<FilterId>,
    connected_once: bool,
    machine: CallMachine,
    ping_back_count: u32,
    last_ping_back: Option<Instant>,
    request_user_data: Vec<u8>,
    response_user_data: Vec<u8>,
}

/// Drives calls over an [`AsyncClientConnection`].
///
/// The stub is a cheap handle; clones share one connection. Only one
/// operation runs at a time: a call holds the stub until it completes, so
/// concurrent calls queue up behind it. [`cancel`](Self::cancel) does not
/// wait for the lock and interrupts the running call at once.
///
/// Batching is only available on the blocking [`ClientStub`](super::ClientStub).
///
/// # Examples
///
/// ```rust,no_run
/// use chainrpc::buffer::ByteBuffer;
/// use chainrpc::stub::{AsyncClientStub, CallSemantics};
/// use chainrpc::transport::{AsyncClientConnection, AsyncTcpTransport, WireConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let wire = WireConfig::tcp("127.0.0.1", 50001);
/// let transport = AsyncTcpTransport::new(wire.connect_address());
/// let connection = AsyncClientConnection::new(Box::new(transport), &wire)?;
/// let stub = AsyncClientStub::new("Echo", connection);
///
/// let reply = stub.call(1, vec![ByteBuffer::from("hello")], CallSemantics::Twoway).await?;
///
/// let handle = stub.call_with_callback(1, vec![ByteBuffer::from("again")], CallSemantics::Twoway, |result| {
///     println!("completed: {:?}", result.map(|reply| reply.len()));
/// });
/// handle.await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncClientStub {
    inner: Arc<Mutex<Inner>>,
    cancel: CancelToken,
    endpoint: Arc<str>,
}

impl AsyncClientStub {
    /// Creates a stub calling `target` with the default configuration and
    /// filter registry.
    pub fn new(target: impl Into<String>, connection: AsyncClientConnection) -> Self {
        Self::from_parts(
            target.into(),
            connection,
            StubConfig::default(),
            FilterRegistry::with_defaults(),
            FilterChain::new(),
        )
    }

    /// Creates a stub with an explicit configuration.
    pub fn with_config(
        target: impl Into<String>,
        connection: AsyncClientConnection,
        config: StubConfig,
        registry: FilterRegistry,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let message_filters = registry
            .create_chain(&config.message_filters)?
            .with_max_message_length(connection.max_message_length());
        Ok(Self::from_parts(
            target.into(),
            connection,
            config,
            registry,
            message_filters,
        ))
    }

    fn from_parts(
        target: String,
        connection: AsyncClientConnection,
        config: StubConfig,
        registry: FilterRegistry,
        message_filters: FilterChain,
    ) -> Self {
        let cancel = connection.cancel_token();
        let endpoint = Arc::from(connection.endpoint());
        let inner = Inner {
            target,
            config,
            connection,
            registry,
            message_filters,
            custom_filters: Vec::new(),
            connected_once: false,
            machine: CallMachine::default(),
            ping_back_count: 0,
            last_ping_back: None,
            request_user_data: Vec::new(),
            response_user_data: Vec::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            cancel,
            endpoint,
        }
    }

    /// Address of the server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A handle cancelling calls from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.cancel.clone())
    }

    /// Cancels the running call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A copy of the current configuration.
    pub async fn config(&self) -> StubConfig {
        self.inner.lock().await.config.clone()
    }

    /// Returns `true` while connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connection.is_connected()
    }

    /// Phase of the current or last call.
    pub async fn phase(&self) -> CallPhase {
        self.inner.lock().await.machine.phase()
    }

    /// Ids of the installed transport filters.
    pub async fn transport_filter_ids(&self) -> Vec<FilterId> {
        self.inner.lock().await.connection.transport_filter_ids()
    }

    /// Changes the transport protocol. A change disconnects.
    pub async fn set_transport_protocol(&self, protocol: TransportProtocol) {
        let mut inner = self.inner.lock().await;
        if inner.config.transport_protocol != protocol {
            inner.config.transport_protocol = protocol;
            inner.custom_filters.clear();
            inner.connection.disconnect().await;
        }
    }

    /// Enables or disables compression. A change disconnects.
    pub async fn set_enable_compression(&self, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if inner.config.enable_compression != enabled {
            inner.config.enable_compression = enabled;
            inner.custom_filters.clear();
            inner.connection.disconnect().await;
        }
    }

    /// Sets the user data sent with the following requests.
    pub async fn set_request_user_data(&self, data: impl Into<Vec<u8>>) {
        self.inner.lock().await.request_user_data = data.into();
    }

    /// User data of the last response.
    pub async fn response_user_data(&self) -> Vec<u8> {
        self.inner.lock().await.response_user_data.clone()
    }

    /// Ping-backs received since the stub was created.
    pub async fn ping_back_count(&self) -> u32 {
        self.inner.lock().await.ping_back_count
    }

    /// When the last ping-back arrived.
    pub async fn last_ping_back(&self) -> Option<Instant> {
        self.inner.lock().await.last_ping_back
    }

    /// Closes the connection.
    pub async fn disconnect(&self) {
        self.inner.lock().await.connection.disconnect().await;
    }

    /// Connects and negotiates transport filters without making a call.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(endpoint = %self.endpoint)))]
    pub async fn connect(&self) -> Result<(), CallError> {
        let mut inner = self.inner.lock().await;
        inner.begin();
        let deadline = Deadline::after(inner.config.call_timeout);
        let result = inner.prepare(deadline, true).await;
        inner.finish(result).await
    }

    /// Asks the server to install `filters` and installs them locally once
    /// it agrees.
    #[cfg_attr(feature = "observability", instrument(skip_all, fields(endpoint = %self.endpoint)))]
    pub async fn request_transport_filters(&self, filters: Vec<Box<dyn Filter>>) -> Result<(), CallError> {
        let mut inner = self.inner.lock().await;
        inner.begin();
        let deadline = Deadline::after(inner.config.call_timeout);
        let ids: Vec<FilterId> = filters.iter().map(|f| f.filter_id()).collect();
        let result = match inner.ensure_connected(deadline, true).await {
            Ok(()) => inner.negotiate(filters, deadline).await,
            Err(error) => Err(error),
        };
        if result.is_ok() {
            inner.config.transport_protocol = TransportProtocol::Clear;
            inner.config.enable_compression = false;
            inner.custom_filters = ids;
        }
        inner.finish(result).await
    }

    /// Removes the transport filters on both sides.
    pub async fn clear_transport_filters(&self) -> Result<(), CallError> {
        self.request_transport_filters(Vec::new()).await
    }

    /// Makes a call. Oneway calls return an empty buffer.
    #[cfg_attr(
        feature = "observability",
        instrument(skip(self, payload), fields(endpoint = %self.endpoint))
    )]
    pub async fn call(
        &self,
        method_id: u32,
        payload: Vec<ByteBuffer>,
        semantics: CallSemantics,
    ) -> Result<ByteBuffer, CallError> {
        let mut inner = self.inner.lock().await;
        inner.begin();
        let deadline = Deadline::after(inner.config.call_timeout);
        let result = inner
            .run_call(method_id, payload, semantics == CallSemantics::Oneway, deadline)
            .await;
        inner.finish(result).await
    }

    /// Makes a call on a spawned task and hands the result to `callback`.
    /// Must be called from within a Tokio runtime.
    pub fn call_with_callback<F>(
        &self,
        method_id: u32,
        payload: Vec<ByteBuffer>,
        semantics: CallSemantics,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<ByteBuffer, CallError>) + Send + 'static,
    {
        let stub = self.clone();
        tokio::spawn(async move {
            let result = stub.call(method_id, payload, semantics).await;
            callback(result);
        })
    }
}

impl std::fmt::Debug for AsyncClientStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClientStub")
            .field("endpoint", &self.endpoint)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn begin(&mut self) {
        self.connection.cancel_token().reset();
        self.machine.begin();
    }

    async fn finish<T>(&mut self, result: Result<T, RpcError>) -> Result<T, CallError> {
        match result {
            Ok(value) => {
                self.machine.enter(CallPhase::Done);
                Ok(value)
            }
            Err(error) => {
                let phase = self.machine.phase();
                if error.should_close_transport() {
                    self.connection.disconnect().await;
                }
                self.machine.enter(CallPhase::Error);
                Err(CallError::new(self.connection.endpoint(), phase, error))
            }
        }
    }

    async fn run_call(
        &mut self,
        method_id: u32,
        payload: Vec<ByteBuffer>,
        oneway: bool,
        deadline: Deadline,
    ) -> Result<ByteBuffer, RpcError> {
        if oneway && self.connection.transport_type().is_http() {
            return Err(RpcError::OnewayOverHttp);
        }
        loop {
            match self.attempt(method_id, payload.clone(), oneway, deadline).await {
                Err(RpcError::VersionMismatch {
                    server_runtime_version,
                    server_archive_version,
                }) if self.config.auto_versioning && self.machine.retries_used() == 0 => {
                    #[cfg(feature = "observability")]
                    warn!(
                        server_runtime_version,
                        server_archive_version, "version mismatch, retrying with lower versions"
                    );
                    downgrade_versions(&mut self.config, server_runtime_version, server_archive_version)?;
                    self.machine.retry();
                }
                result => return result,
            }
        }
    }

    async fn attempt(
        &mut self,
        method_id: u32,
        payload: Vec<ByteBuffer>,
        oneway: bool,
        deadline: Deadline,
    ) -> Result<ByteBuffer, RpcError> {
        let request = encode_call(
            &self.config,
            &self.target,
            method_id,
            oneway,
            &self.request_user_data,
            payload,
            &mut self.message_filters,
        )?;

        self.prepare(deadline, false).await?;
        self.machine.enter(CallPhase::Sending);
        self.connection.send(request, deadline.instant()).await?;
        if oneway {
            return Ok(ByteBuffer::new());
        }

        self.machine.enter(CallPhase::Receiving);
        let (header, payload) = self.receive_response(deadline, false).await?;
        self.response_user_data = header.user_data;
        Ok(payload)
    }

    async fn ensure_connected(&mut self, deadline: Deadline, explicit: bool) -> Result<(), RpcError> {
        if self.connection.is_connected() {
            return Ok(());
        }
        if self.connected_once && !explicit && !self.config.auto_reconnect {
            return Err(TransportError::NotConnected.into());
        }
        self.machine.enter(CallPhase::Connecting);
        self.connection
            .connect(deadline.capped(self.config.connect_timeout))
            .await?;
        self.connected_once = true;
        Ok(())
    }

    async fn prepare(&mut self, deadline: Deadline, explicit: bool) -> Result<(), RpcError> {
        self.ensure_connected(deadline, explicit).await?;
        let mut desired =
            transport_filter_ids(self.config.transport_protocol, self.config.enable_compression);
        if desired.is_empty() {
            desired = self.custom_filters.clone();
        }
        if self.connection.transport_filter_ids() != desired {
            let filters = self.registry.create_filters(&desired)?;
            self.negotiate(filters, deadline).await?;
        }
        Ok(())
    }

    async fn negotiate(&mut self, filters: Vec<Box<dyn Filter>>, deadline: Deadline) -> Result<(), RpcError> {
        self.machine.enter(CallPhase::NegotiatingFilters);
        let ids: Vec<FilterId> = filters.iter().map(|f| f.filter_id()).collect();
        let request = encode_control(
            &self.config,
            &self.target,
            &ControlRequest::request_transport_filters(&ids),
        )?;
        self.connection.send(request, deadline.instant()).await?;
        let (header, _) = self.receive_response(deadline, true).await?;
        control_result(&header)?;

        #[cfg(feature = "observability")]
        debug!(filters = ?ids, "transport filters installed");
        self.connection.set_transport_filters(filters);
        Ok(())
    }

    async fn receive_response(
        &mut self,
        deadline: Deadline,
        control: bool,
    ) -> Result<(ResponseHeader, ByteBuffer), RpcError> {
        let mut control_filters = FilterChain::new();
        let mut monitor = PingBackMonitor::new(self.config.ping_back_interval);
        loop {
            if deadline.is_expired() {
                return Err(TransportError::ReadTimeout.into());
            }
            monitor.check()?;

            let wake = monitor
                .deadline()
                .map_or(deadline.instant(), |ping_back| ping_back.min(deadline.instant()));
            match self.connection.receive(wake).await {
                Ok(frame) => {
                    let filters = if control {
                        &mut control_filters
                    } else {
                        &mut self.message_filters
                    };
                    match decode_reply(frame, filters)? {
                        Reply::Response(header, payload) => return Ok((header, payload)),
                        Reply::PingBack => {
                            let now = Instant::now();
                            monitor.record(now);
                            self.ping_back_count += 1;
                            self.last_ping_back = Some(now);
                            #[cfg(feature = "observability")]
                            trace!(count = self.ping_back_count, "ping-back");
                        }
                    }
                }
                Err(TransportError::ReadTimeout) => {}
                Err(error) => return Err(error.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{Envelope, decode_envelope, encode_response};
    use crate::transport::{AsyncMemoryTransport, WireConfig};
    use std::time::Duration;

    fn stub_pair(config: StubConfig) -> (AsyncClientStub, AsyncClientConnection) {
        let (client, server) = AsyncMemoryTransport::pair("memory://async-stub");
        let wire = WireConfig::memory("memory://async-stub");
        let client = AsyncClientConnection::new(Box::new(client), &wire).unwrap();
        let server = AsyncClientConnection::new(Box::new(server), &wire).unwrap();
        let stub =
            AsyncClientStub::with_config("Echo", client, config, FilterRegistry::with_defaults()).unwrap();
        (stub, server)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[tokio::test]
    async fn test_call_with_callback() {
        let (stub, mut server) = stub_pair(StubConfig::default());
        tokio::spawn(async move {
            let frame = server.receive(soon()).await.unwrap();
            let Envelope::Request(_, payload) = decode_envelope(frame).unwrap() else {
                panic!("expected a request");
            };
            let reply = encode_response(&ResponseHeader::ok(), vec![payload]).unwrap();
            server.send(reply, soon()).await.unwrap();
            server
        });

        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = stub.call_with_callback(4, vec![ByteBuffer::from("echo")], CallSemantics::Twoway, move |result| {
            let _ = tx.send(result.map(|reply| reply.to_vec()));
        });
        task.await.unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), b"echo");
        assert_eq!(stub.phase().await, CallPhase::Done);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_call() {
        let (stub, _server) = stub_pair(StubConfig::default());
        let handle = stub.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let error = stub
            .call(1, vec![ByteBuffer::from("x")], CallSemantics::Twoway)
            .await
            .unwrap_err();
        assert!(matches!(error.error(), RpcError::Cancelled));
        assert!(!stub.is_connected().await);
    }

    #[tokio::test]
    async fn test_ping_back_timeout() {
        let config = StubConfig::default().with_ping_back_interval(Duration::from_millis(20));
        let (stub, _server) = stub_pair(config);
        let error = stub
            .call(1, vec![ByteBuffer::from("x")], CallSemantics::Twoway)
            .await
            .unwrap_err();
        assert!(matches!(error.error(), RpcError::PingBackTimeout { .. }));
        assert_eq!(error.phase(), CallPhase::Receiving);
    }
}
