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

//! The blocking client stub.

use super::batch::Batch;
use super::machine::{
    CallMachine, PingBackMonitor, Reply, control_result, decode_reply, downgrade_versions,
    encode_call, encode_control,
};
use super::progress::ProgressTracker;
use super::{CallPhase, CallSemantics, CancelHandle, ClientProgress, Deadline, StubConfig};
use crate::buffer::ByteBuffer;
use crate::filter::{Filter, FilterChain, FilterId, FilterRegistry};
use crate::framing::ResponseHeader;
use crate::negotiation::{ControlRequest, TransportProtocol, transport_filter_ids};
use crate::transport::{ClientConnection, TransportError};
use crate::{CallError, RpcError};
use std::time::{Duration, Instant};

#[cfg(feature = "observability")]
use tracing::{debug, instrument, trace, warn};

/// Drives calls over a [`ClientConnection`], blocking the calling thread.
///
/// A call runs through the phases of [`CallPhase`] against one deadline
/// computed from [`StubConfig::call_timeout`]. Any error that leaves the
/// connection unusable disconnects it before the error is returned; the
/// next call reconnects when [`StubConfig::auto_reconnect`] is set.
///
/// # Examples
///
/// ```rust,no_run
/// use chainrpc::buffer::ByteBuffer;
/// use chainrpc::stub::{CallSemantics, ClientStub};
/// use chainrpc::transport::{ClientConnection, TcpTransport, WireConfig};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let wire = WireConfig::tcp("127.0.0.1", 50001);
/// let transport = TcpTransport::new(wire.connect_address());
/// let connection = ClientConnection::new(Box::new(transport), &wire)?;
/// let mut stub = ClientStub::new("Echo", connection);
///
/// let reply = stub.call(1, vec![ByteBuffer::from("hello")], CallSemantics::Twoway)?;
/// println!("{} bytes back", reply.len());
/// # Ok(())
/// # }
/// ```
pub struct ClientStub {
    target: String,
    config: StubConfig,
    connection: ClientConnection,
    registry: FilterRegistry,
    message_filters: FilterChain,
    custom_filters: Vec<FilterId>,
    connected_once: bool,
    machine: CallMachine,
    batch: Batch,
    progress: ProgressTracker,
    ping_back_count: u32,
    last_ping_back: Option<Instant>,
    request_user_data: Vec<u8>,
    response_user_data: Vec<u8>,
}

impl ClientStub {
    /// Creates a stub calling `target` with the default configuration and
    /// filter registry.
    pub fn new(target: impl Into<String>, connection: ClientConnection) -> Self {
        let config = StubConfig::default();
        Self {
            target: target.into(),
            batch: Batch::new(config.max_batch_message_length),
            config,
            connection,
            registry: FilterRegistry::with_defaults(),
            message_filters: FilterChain::new(),
            custom_filters: Vec::new(),
            connected_once: false,
            machine: CallMachine::default(),
            progress: ProgressTracker::default(),
            ping_back_count: 0,
            last_ping_back: None,
            request_user_data: Vec::new(),
            response_user_data: Vec::new(),
        }
    }

    /// Creates a stub with an explicit configuration. Transport and message
    /// filters are built through `registry`.
    pub fn with_config(
        target: impl Into<String>,
        connection: ClientConnection,
        config: StubConfig,
        registry: FilterRegistry,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let message_filters = registry
            .create_chain(&config.message_filters)?
            .with_max_message_length(connection.max_message_length());
        let mut stub = Self::new(target, connection);
        stub.batch.set_max_length(config.max_batch_message_length);
        stub.config = config;
        stub.registry = registry;
        stub.message_filters = message_filters;
        Ok(stub)
    }

    /// Name of the remote object.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current configuration, including versions lowered by a mismatch
    /// retry.
    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    /// The underlying connection.
    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    /// Address of the server.
    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }

    /// Returns `true` while connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Phase of the current or last call.
    pub fn phase(&self) -> CallPhase {
        self.machine.phase()
    }

    /// Ids of the installed transport filters.
    pub fn transport_filter_ids(&self) -> Vec<FilterId> {
        self.connection.transport_filter_ids()
    }

    /// Ids of the message filters.
    pub fn message_filter_ids(&self) -> Vec<FilterId> {
        self.message_filters.filter_ids()
    }

    /// Sets the total call timeout.
    pub fn set_call_timeout(&mut self, timeout: Duration) {
        self.config.call_timeout = timeout;
    }

    /// Sets the connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.config.connect_timeout = timeout;
    }

    /// Enables or disables automatic reconnection.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.config.auto_reconnect = enabled;
    }

    /// Enables or disables the version mismatch retry.
    pub fn set_auto_versioning(&mut self, enabled: bool) {
        self.config.auto_versioning = enabled;
    }

    /// Sets the ping-back interval requested from the server.
    pub fn set_ping_back_interval(&mut self, interval: Duration) {
        self.config.ping_back_interval = interval;
    }

    /// Sets the runtime version.
    pub fn set_runtime_version(&mut self, version: u32) {
        self.config.runtime_version = version;
    }

    /// Sets the archive version.
    pub fn set_archive_version(&mut self, version: u32) {
        self.config.archive_version = version;
    }

    /// Changes the transport protocol. A change disconnects; the next call
    /// negotiates the new filters.
    pub fn set_transport_protocol(&mut self, protocol: TransportProtocol) {
        if self.config.transport_protocol != protocol {
            self.config.transport_protocol = protocol;
            self.custom_filters.clear();
            self.connection.disconnect();
        }
    }

    /// Enables or disables compression. A change disconnects.
    pub fn set_enable_compression(&mut self, enabled: bool) {
        if self.config.enable_compression != enabled {
            self.config.enable_compression = enabled;
            self.custom_filters.clear();
            self.connection.disconnect();
        }
    }

    /// Replaces the message filters.
    pub fn set_message_filters(&mut self, ids: Vec<FilterId>) -> Result<(), RpcError> {
        self.message_filters = self
            .registry
            .create_chain(&ids)?
            .with_max_message_length(self.connection.max_message_length());
        self.config.message_filters = ids;
        Ok(())
    }

    /// Installs or removes the progress callback.
    pub fn set_progress(&mut self, progress: Option<ClientProgress>) {
        self.progress.set(progress);
    }

    /// The progress callback.
    pub fn progress(&self) -> Option<&ClientProgress> {
        self.progress.progress()
    }

    /// User data sent with the following requests.
    pub fn request_user_data(&self) -> &[u8] {
        &self.request_user_data
    }

    /// Sets the user data sent with the following requests.
    pub fn set_request_user_data(&mut self, data: impl Into<Vec<u8>>) {
        self.request_user_data = data.into();
    }

    /// User data of the last response.
    pub fn response_user_data(&self) -> &[u8] {
        &self.response_user_data
    }

    /// Ping-backs received since the stub was created.
    pub fn ping_back_count(&self) -> u32 {
        self.ping_back_count
    }

    /// When the last ping-back arrived.
    pub fn last_ping_back(&self) -> Option<Instant> {
        self.last_ping_back
    }

    /// A handle cancelling calls from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.connection.cancel_token())
    }

    /// Cancels the current call.
    pub fn cancel(&self) {
        self.connection.cancel();
    }

    /// Closes the connection.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// Starts collecting oneway calls. While batching, every call is sent
    /// oneway.
    pub fn enable_batching(&mut self) {
        self.batch.enable();
    }

    /// Stops batching, flushing the pending calls first when `flush` is set.
    pub fn disable_batching(&mut self, flush: bool) -> Result<(), CallError> {
        if flush {
            self.flush_batch(Duration::ZERO)?;
        }
        self.batch.disable();
        Ok(())
    }

    /// Returns `true` while batching.
    pub fn is_batching(&self) -> bool {
        self.batch.is_enabled()
    }

    /// Batches sent since batching was enabled.
    pub fn batches_sent(&self) -> u32 {
        self.batch.batches_sent()
    }

    /// Calls waiting in the current batch.
    pub fn messages_in_current_batch(&self) -> u32 {
        self.batch.message_count()
    }

    /// Batch size that triggers a flush.
    pub fn max_batch_message_length(&self) -> usize {
        self.batch.max_length()
    }

    /// Changes the batch size that triggers a flush. Zero means unlimited.
    pub fn set_max_batch_message_length(&mut self, length: usize) {
        self.config.max_batch_message_length = length;
        self.batch.set_max_length(length);
    }

    /// Sends the pending batch. A zero `timeout` uses the call timeout.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(endpoint = %self.endpoint())))]
    pub fn flush_batch(&mut self, timeout: Duration) -> Result<(), CallError> {
        let timeout = if timeout.is_zero() {
            self.config.call_timeout
        } else {
            timeout
        };
        self.begin();
        let result = self.flush_pending(Deadline::after(timeout));
        self.finish(result)
    }

    /// Connects and negotiates transport filters without making a call.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(endpoint = %self.endpoint())))]
    pub fn connect(&mut self) -> Result<(), CallError> {
        self.begin();
        let deadline = Deadline::after(self.config.call_timeout);
        let result = self.prepare(deadline, true);
        self.finish(result)
    }

    /// Asks the server to install `filters` and installs them locally once
    /// it agrees. The filters are requested again after a reconnect.
    #[cfg_attr(feature = "observability", instrument(skip_all, fields(endpoint = %self.endpoint())))]
    pub fn request_transport_filters(&mut self, filters: Vec<Box<dyn Filter>>) -> Result<(), CallError> {
        self.begin();
        let deadline = Deadline::after(self.config.call_timeout);
        let ids: Vec<FilterId> = filters.iter().map(|f| f.filter_id()).collect();
        let result = self
            .ensure_connected(deadline, true)
            .and_then(|()| self.negotiate(filters, deadline));
        if result.is_ok() {
            self.config.transport_protocol = TransportProtocol::Clear;
            self.config.enable_compression = false;
            self.custom_filters = ids;
        }
        self.finish(result)
    }

    /// Removes the transport filters on both sides.
    pub fn clear_transport_filters(&mut self) -> Result<(), CallError> {
        self.request_transport_filters(Vec::new())
    }

    /// Makes a call. Oneway calls and batched calls return an empty buffer.
    #[cfg_attr(
        feature = "observability",
        instrument(skip(self, payload), fields(endpoint = %self.endpoint(), target = %self.target))
    )]
    pub fn call(
        &mut self,
        method_id: u32,
        payload: Vec<ByteBuffer>,
        semantics: CallSemantics,
    ) -> Result<ByteBuffer, CallError> {
        self.begin();
        let deadline = Deadline::after(self.config.call_timeout);
        let oneway = semantics == CallSemantics::Oneway || self.batch.is_enabled();
        let result = self.run_call(method_id, payload, oneway, deadline);
        self.finish(result)
    }

    fn begin(&mut self) {
        self.connection.cancel_token().reset();
        self.machine.begin();
        self.progress.start();
    }

    fn enter(&mut self, phase: CallPhase) -> Result<(), RpcError> {
        self.machine.enter(phase);
        self.progress.on_phase(phase)
    }

    fn finish<T>(&mut self, result: Result<T, RpcError>) -> Result<T, CallError> {
        match result {
            Ok(value) => {
                self.machine.enter(CallPhase::Done);
                Ok(value)
            }
            Err(error) => {
                let phase = self.machine.phase();
                if error.should_close_transport() {
                    self.connection.disconnect();
                }
                self.machine.enter(CallPhase::Error);
                Err(CallError::new(self.connection.endpoint(), phase, error))
            }
        }
    }

    fn run_call(
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
            match self.attempt(method_id, payload.clone(), oneway, deadline) {
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

    fn attempt(
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

        if self.batch.is_enabled() {
            self.enter(CallPhase::Batching)?;
            self.append_to_batch(request, deadline)?;
            return Ok(ByteBuffer::new());
        }

        self.prepare(deadline, false)?;
        self.enter(CallPhase::Sending)?;
        self.connection.send(request, deadline.instant())?;
        if oneway {
            return Ok(ByteBuffer::new());
        }

        self.enter(CallPhase::Receiving)?;
        let (header, payload) = self.receive_response(deadline, false)?;
        self.response_user_data = header.user_data;
        Ok(payload)
    }

    fn ensure_connected(&mut self, deadline: Deadline, explicit: bool) -> Result<(), RpcError> {
        if self.connection.is_connected() {
            return Ok(());
        }
        if self.connected_once && !explicit && !self.config.auto_reconnect {
            return Err(TransportError::NotConnected.into());
        }
        self.enter(CallPhase::Connecting)?;
        self.connection
            .connect(deadline.capped(self.config.connect_timeout))?;
        self.connected_once = true;
        Ok(())
    }

    fn desired_transport_filters(&self) -> Vec<FilterId> {
        let ids = transport_filter_ids(self.config.transport_protocol, self.config.enable_compression);
        if ids.is_empty() {
            self.custom_filters.clone()
        } else {
            ids
        }
    }

    fn prepare(&mut self, deadline: Deadline, explicit: bool) -> Result<(), RpcError> {
        self.ensure_connected(deadline, explicit)?;
        let desired = self.desired_transport_filters();
        if self.connection.transport_filter_ids() != desired {
            let filters = self.registry.create_filters(&desired)?;
            self.negotiate(filters, deadline)?;
        }
        Ok(())
    }

    fn negotiate(&mut self, filters: Vec<Box<dyn Filter>>, deadline: Deadline) -> Result<(), RpcError> {
        self.enter(CallPhase::NegotiatingFilters)?;
        let ids: Vec<FilterId> = filters.iter().map(|f| f.filter_id()).collect();
        let request = encode_control(
            &self.config,
            &self.target,
            &ControlRequest::request_transport_filters(&ids),
        )?;
        self.connection.send(request, deadline.instant())?;
        let (header, _) = self.receive_response(deadline, true)?;
        control_result(&header)?;

        #[cfg(feature = "observability")]
        debug!(filters = ?ids, "transport filters installed");
        self.connection.set_transport_filters(filters);
        Ok(())
    }

    fn receive_response(
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

            let mut wake = deadline.instant();
            if let Some(ping_back) = monitor.deadline() {
                wake = wake.min(ping_back);
            }
            if let Some(tick) = self.progress.next_wake() {
                wake = wake.min(tick);
            }

            match self.connection.receive(wake) {
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
            self.progress.poll(self.machine.phase())?;
        }
    }

    fn append_to_batch(&mut self, mut request: Vec<ByteBuffer>, deadline: Deadline) -> Result<(), RpcError> {
        let length = Batch::frame(&mut request)?;
        if self.batch.needs_flush(length) {
            self.flush_pending(deadline)?;
            self.enter(CallPhase::Batching)?;
        }
        self.batch.append(&request);
        Ok(())
    }

    fn flush_pending(&mut self, deadline: Deadline) -> Result<(), RpcError> {
        let Some(pending) = self.batch.pending() else {
            return Ok(());
        };
        self.prepare(deadline, false)?;
        self.enter(CallPhase::Sending)?;
        self.connection.send_framed(vec![pending], deadline.instant())?;

        #[cfg(feature = "observability")]
        debug!(
            messages = self.batch.message_count(),
            bytes = self.batch.len(),
            "batch flushed"
        );
        self.batch.flushed();
        Ok(())
    }
}

impl std::fmt::Debug for ClientStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStub")
            .field("target", &self.target)
            .field("connection", &self.connection)
            .field("phase", &self.machine.phase())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::copy_buffers;
    use crate::framing::{Envelope, decode_envelope, encode_response};
    use crate::transport::{MemoryTransport, WireConfig};

    fn stub_pair(config: StubConfig) -> (ClientStub, ClientConnection) {
        let (client, server) = MemoryTransport::pair("memory://stub");
        let wire = WireConfig::memory("memory://stub");
        let client = ClientConnection::new(Box::new(client), &wire).unwrap();
        let server = ClientConnection::new(Box::new(server), &wire).unwrap();
        let stub = ClientStub::with_config("Echo", client, config, FilterRegistry::with_defaults()).unwrap();
        (stub, server)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    fn respond(server: &mut ClientConnection, header: &ResponseHeader, body: &str) {
        let frame = encode_response(header, vec![ByteBuffer::from(body)]).unwrap();
        server.send(frame, soon()).unwrap();
    }

    #[test]
    fn test_twoway_call() {
        let (mut stub, mut server) = stub_pair(StubConfig::default());
        stub.set_request_user_data(b"in".to_vec());
        let handle = std::thread::spawn(move || {
            let frame = server.receive(soon()).unwrap();
            let Envelope::Request(header, payload) = decode_envelope(frame).unwrap() else {
                panic!("expected a request");
            };
            assert_eq!(header.user_data, b"in");
            assert_eq!(payload.as_slice(), b"ping");
            let response = ResponseHeader {
                user_data: b"out".to_vec(),
                ..ResponseHeader::ok()
            };
            respond(&mut server, &response, "pong");
            server
        });

        let reply = stub
            .call(1, vec![ByteBuffer::from("ping")], CallSemantics::Twoway)
            .unwrap();
        assert_eq!(reply.as_slice(), b"pong");
        assert_eq!(stub.response_user_data(), b"out");
        assert_eq!(stub.phase(), CallPhase::Done);
        handle.join().unwrap();
    }

    #[test]
    fn test_remote_error_keeps_connection() {
        let (mut stub, mut server) = stub_pair(StubConfig::default());
        let handle = std::thread::spawn(move || {
            server.receive(soon()).unwrap();
            respond(&mut server, &ResponseHeader::exception("handler failed"), "");
            server
        });

        let error = stub
            .call(1, vec![ByteBuffer::from("x")], CallSemantics::Twoway)
            .unwrap_err();
        assert_eq!(error.phase(), CallPhase::Receiving);
        assert!(matches!(error.error(), RpcError::Remote { .. }));
        assert!(stub.is_connected());
        handle.join().unwrap();
    }

    #[test]
    fn test_read_timeout_disconnects() {
        let config = StubConfig::default().with_call_timeout(Duration::from_millis(50));
        let (mut stub, _server) = stub_pair(config);
        let error = stub
            .call(1, vec![ByteBuffer::from("x")], CallSemantics::Twoway)
            .unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(error.phase(), CallPhase::Receiving);
        assert!(!stub.is_connected());
    }

    #[test]
    fn test_oneway_returns_after_send() {
        let (mut stub, mut server) = stub_pair(StubConfig::default());
        let reply = stub
            .call(1, vec![ByteBuffer::from("fire")], CallSemantics::Oneway)
            .unwrap();
        assert!(reply.is_empty());

        let Envelope::Request(header, _) = decode_envelope(server.receive(soon()).unwrap()).unwrap() else {
            panic!("expected a request");
        };
        assert!(header.oneway);
    }

    #[test]
    fn test_batching_flushes_before_limit() {
        let config = StubConfig::default().with_max_batch_message_length(200);
        let (mut stub, mut server) = stub_pair(config);
        stub.enable_batching();

        let body = "x".repeat(60);
        let mut calls = 0;
        while stub.batches_sent() == 0 {
            stub.call(1, vec![ByteBuffer::from(body.as_str())], CallSemantics::Twoway)
                .unwrap();
            calls += 1;
            assert!(calls < 10);
        }
        assert_eq!(stub.messages_in_current_batch(), 1);

        for _ in 0..calls - 1 {
            let Envelope::Request(header, payload) = decode_envelope(server.receive(soon()).unwrap()).unwrap() else {
                panic!("expected a request");
            };
            assert!(header.oneway);
            assert_eq!(payload.len(), 60);
        }

        stub.disable_batching(true).unwrap();
        assert!(decode_envelope(server.receive(soon()).unwrap()).is_ok());
        assert!(!stub.is_batching());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let (mut stub, _server) = stub_pair(StubConfig::default());
        let cancel = stub.cancel_handle();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        let error = stub
            .call(1, vec![ByteBuffer::from("x")], CallSemantics::Twoway)
            .unwrap_err();
        assert!(matches!(error.error(), RpcError::Cancelled));
        assert!(!stub.is_connected());
    }

    #[test]
    fn test_explicit_transport_filters() {
        let (mut stub, mut server) = stub_pair(StubConfig::default());
        let handle = std::thread::spawn(move || {
            let frame = server.receive(soon()).unwrap();
            let Envelope::Request(header, _) = decode_envelope(frame).unwrap() else {
                panic!("expected a request");
            };
            assert!(header.out_of_band);
            let request = ControlRequest::decode(&header.out_of_band_data).unwrap();
            assert_eq!(request, ControlRequest::request_transport_filters(&[FilterId::Xor]));

            let response = ResponseHeader {
                out_of_band_data: crate::negotiation::ControlResponse::accepted().encode().unwrap(),
                ..ResponseHeader::ok()
            };
            let frame = encode_response(&response, Vec::new()).unwrap();
            server.send(frame, soon()).unwrap();
            server.set_transport_filters(vec![Box::new(crate::filter::XorFilter::new(
                crate::filter::XorFilter::DEFAULT_KEY,
            ))]);

            server.receive(soon()).unwrap();
            respond(&mut server, &ResponseHeader::ok(), "filtered");
            server
        });

        let xor = FilterRegistry::with_defaults().create_filter(FilterId::Xor).unwrap();
        stub.request_transport_filters(vec![xor]).unwrap();
        assert_eq!(stub.transport_filter_ids(), vec![FilterId::Xor]);

        let reply = stub
            .call(2, vec![ByteBuffer::from("data")], CallSemantics::Twoway)
            .unwrap();
        assert_eq!(copy_buffers(&[reply]), b"filtered");
        handle.join().unwrap();
    }
}
