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

//! Client connections: frames and filter chains on top of a raw transport.
//!
//! A connection's chain holds two groups of filters. Transport filters
//! (compression, encryption) sit nearest the application and change when
//! the client negotiates new ones. Wire filters (HTTP framing, TLS for
//! HTTPS, proxy tunnel) sit nearest the socket and stay for the life of
//! the connection.
//!
//! [`ChainDriver`] holds the chain and the frame assembler and turns chain
//! events into wire requests. The blocking [`ClientConnection`], the
//! asynchronous [`AsyncClientConnection`](super::AsyncClientConnection) and
//! the server session are three outer loops around it.

use super::{CancelToken, RawTransport, TransportError, TransportType, WireConfig};
use crate::buffer::{ByteBuffer, slice_buffers, total_length};
use crate::filter::{
    ChainEvent, DEFAULT_MAX_MESSAGE_LENGTH, Filter, FilterChain, FilterError, FilterId,
};
use crate::framing::{FrameAssembler, FramingError, encode_length_prefix};
use std::time::{Duration, Instant};

#[cfg(feature = "observability")]
use tracing::{debug, instrument, trace};

/// Largest single read handed to a raw transport.
pub(crate) const MAX_WIRE_READ: usize = 64 * 1024;

/// Longest a blocking wait runs before cancellation is checked again.
pub(crate) const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time left until `deadline`, or `None` once it has passed.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
}

/// What a [`ChainDriver`] needs next, or what it finished.
#[derive(Debug)]
pub(crate) enum Progress {
    /// Read up to this many bytes and report them with
    /// [`ChainDriver::wire_read`].
    WireRead(usize),
    /// Write these bytes and report the count with
    /// [`ChainDriver::wire_written`].
    WireWrite(Vec<ByteBuffer>),
    /// A complete frame body arrived.
    Frame(ByteBuffer),
    /// The send finished; this many bytes including prefixes left.
    Sent(usize),
}

#[derive(Debug)]
enum Operation {
    Idle,
    Send {
        buffers: Vec<ByteBuffer>,
        total: usize,
        consumed: usize,
    },
    Receive,
}

fn stalled() -> TransportError {
    TransportError::Filter(FilterError::Stalled {
        operation: "connection",
    })
}

/// A filter chain driven against an outer I/O loop.
#[derive(Debug)]
pub(crate) struct ChainDriver {
    chain: FilterChain,
    transport_filter_count: usize,
    assembler: FrameAssembler,
    operation: Operation,
    outstanding_read: Option<usize>,
    max_message_length: usize,
}

impl ChainDriver {
    pub(crate) fn new(wire_filters: Vec<Box<dyn Filter>>, max_message_length: usize) -> Self {
        Self {
            chain: FilterChain::connect_filters(wire_filters)
                .with_max_message_length(max_message_length),
            transport_filter_count: 0,
            assembler: FrameAssembler::new(max_message_length),
            operation: Operation::Idle,
            outstanding_read: None,
            max_message_length,
        }
    }

    pub(crate) fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub(crate) fn set_max_message_length(&mut self, max_message_length: usize) {
        self.max_message_length = max_message_length;
        self.assembler.set_max_frame_length(max_message_length);
        let filters = std::mem::take(&mut self.chain).into_filters();
        self.chain = FilterChain::connect_filters(filters).with_max_message_length(max_message_length);
    }

    pub(crate) fn transport_filter_ids(&self) -> Vec<FilterId> {
        let mut ids = self.chain.filter_ids();
        ids.truncate(self.transport_filter_count);
        ids
    }

    /// Returns `true` between the start of an operation and its completion,
    /// including after a timed-out read that can still be resumed.
    pub(crate) fn is_busy(&self) -> bool {
        !matches!(self.operation, Operation::Idle)
    }

    /// Replaces the transport filters, keeping the wire filters and their
    /// state.
    pub(crate) fn set_transport_filters(&mut self, mut filters: Vec<Box<dyn Filter>>) {
        let mut all = std::mem::take(&mut self.chain).into_filters();
        let wire = all.split_off(self.transport_filter_count);
        for filter in &mut filters {
            filter.reset_state();
        }
        self.transport_filter_count = filters.len();
        filters.extend(wire);
        self.chain = FilterChain::connect_filters(filters).with_max_message_length(self.max_message_length);
    }

    /// Prepares for a new connection: transport filters are dropped, wire
    /// filters reset, and buffered input discarded.
    pub(crate) fn reset(&mut self) {
        let mut all = std::mem::take(&mut self.chain).into_filters();
        let mut wire = all.split_off(self.transport_filter_count);
        for filter in &mut wire {
            filter.reset_state();
        }
        self.transport_filter_count = 0;
        self.chain = FilterChain::connect_filters(wire).with_max_message_length(self.max_message_length);
        self.assembler.reset();
        self.operation = Operation::Idle;
        self.outstanding_read = None;
    }

    /// Starts sending one message. Unless `framed` is set, a length prefix is
    /// added first; framed input already consists of prefixed messages.
    pub(crate) fn begin_send(
        &mut self,
        mut buffers: Vec<ByteBuffer>,
        framed: bool,
    ) -> Result<Progress, TransportError> {
        if self.is_busy() {
            return Err(FilterError::ConcurrentOperation.into());
        }
        let length = total_length(&buffers);
        if length == 0 {
            return Err(FramingError::InvalidFrameLength {
                length,
                max: self.max_message_length,
            }
            .into());
        }
        if length > self.max_message_length {
            return Err(TransportError::MessageTooLarge {
                length,
                max: self.max_message_length,
            });
        }
        if !framed {
            encode_length_prefix(&mut buffers)?;
        }

        let total = total_length(&buffers);
        self.operation = Operation::Send {
            buffers: buffers.clone(),
            total,
            consumed: 0,
        };
        let event = self.chain.write(buffers);
        self.advance(event)
    }

    /// Starts or resumes receiving one frame.
    pub(crate) fn begin_receive(&mut self) -> Result<Progress, TransportError> {
        match self.operation {
            Operation::Idle => {}
            Operation::Receive => {
                return self.outstanding_read.map(Progress::WireRead).ok_or_else(stalled);
            }
            Operation::Send { .. } => return Err(FilterError::ConcurrentOperation.into()),
        }

        if let Some(frame) = self.assembler.next_frame()? {
            return Ok(Progress::Frame(frame));
        }
        self.operation = Operation::Receive;
        let event = self.chain.read(ByteBuffer::new(), self.assembler.bytes_wanted());
        self.advance(event)
    }

    /// Reports bytes read for the last [`Progress::WireRead`].
    pub(crate) fn wire_read(&mut self, bytes: ByteBuffer) -> Result<Progress, TransportError> {
        self.outstanding_read = None;
        if bytes.is_empty() {
            return Err(TransportError::PeerDisconnect);
        }
        let event = self.chain.on_wire_read_completed(bytes);
        self.advance(event)
    }

    /// Reports bytes written for the last [`Progress::WireWrite`].
    pub(crate) fn wire_written(&mut self, bytes: usize) -> Result<Progress, TransportError> {
        let event = self.chain.on_wire_write_completed(bytes);
        self.advance(event)
    }

    fn advance(
        &mut self,
        event: Result<Option<ChainEvent>, FilterError>,
    ) -> Result<Progress, TransportError> {
        let mut event = event?;
        loop {
            event = match event {
                Some(ChainEvent::WireRead {
                    bytes_requested, ..
                }) => {
                    self.outstanding_read = Some(bytes_requested);
                    return Ok(Progress::WireRead(bytes_requested));
                }
                Some(ChainEvent::WireWrite { buffers }) => return Ok(Progress::WireWrite(buffers)),
                Some(ChainEvent::ReadCompleted(buffer)) => {
                    if buffer.is_empty() {
                        self.operation = Operation::Idle;
                        return Err(TransportError::PeerDisconnect);
                    }
                    self.assembler.push(&buffer);
                    if let Some(frame) = self.assembler.next_frame()? {
                        self.operation = Operation::Idle;
                        return Ok(Progress::Frame(frame));
                    }
                    self.chain
                        .read(ByteBuffer::new(), self.assembler.bytes_wanted())?
                }
                Some(ChainEvent::WriteCompleted(written)) => {
                    let Operation::Send {
                        buffers,
                        total,
                        consumed,
                    } = &mut self.operation
                    else {
                        return Err(stalled());
                    };
                    if written == 0 {
                        return Err(stalled());
                    }
                    *consumed += written;
                    if *consumed >= *total {
                        let total = *total;
                        self.operation = Operation::Idle;
                        return Ok(Progress::Sent(total));
                    }
                    let rest = slice_buffers(buffers, *consumed, None);
                    self.chain.write(rest)?
                }
                None => return Err(stalled()),
            };
        }
    }
}

/// A blocking client connection.
///
/// Every operation takes an absolute deadline. Waits are cut into slices of
/// at most 100 ms so a [`cancel`](Self::cancel) from another thread is seen
/// promptly.
///
/// # Examples
///
/// ```rust
/// use chainrpc::buffer::ByteBuffer;
/// use chainrpc::transport::{ClientConnection, MemoryTransport, WireConfig};
/// use std::time::{Duration, Instant};
///
/// let (client, server) = MemoryTransport::pair("memory://doc");
/// let wire = WireConfig::memory("memory://doc");
/// let mut sender = ClientConnection::new(Box::new(client), &wire).unwrap();
/// let mut receiver = ClientConnection::new(Box::new(server), &wire).unwrap();
///
/// let deadline = Instant::now() + Duration::from_secs(1);
/// sender.send(vec![ByteBuffer::from("hello")], deadline).unwrap();
/// let frame = receiver.receive(deadline).unwrap();
/// assert_eq!(frame.as_slice(), b"hello");
/// ```
pub struct ClientConnection {
    transport: Box<dyn RawTransport>,
    transport_type: TransportType,
    driver: ChainDriver,
    cancel: CancelToken,
}

impl ClientConnection {
    /// Creates a connection over `transport` with the wire filters `wire`
    /// calls for.
    pub fn new(transport: Box<dyn RawTransport>, wire: &WireConfig) -> Result<Self, FilterError> {
        Ok(Self::with_wire_filters(
            transport,
            wire.transport_type,
            wire.client_filters()?,
        ))
    }

    /// Creates a connection with explicit wire filters.
    pub fn with_wire_filters(
        transport: Box<dyn RawTransport>,
        transport_type: TransportType,
        wire_filters: Vec<Box<dyn Filter>>,
    ) -> Self {
        Self {
            transport,
            transport_type,
            driver: ChainDriver::new(wire_filters, DEFAULT_MAX_MESSAGE_LENGTH),
            cancel: CancelToken::new(),
        }
    }

    /// Changes the largest frame accepted or sent.
    pub fn set_max_message_length(&mut self, max_message_length: usize) {
        self.driver.set_max_message_length(max_message_length);
    }

    /// Largest frame accepted or sent.
    pub fn max_message_length(&self) -> usize {
        self.driver.max_message_length()
    }

    /// Address of the remote endpoint.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Kind of connection.
    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    /// Returns `true` while the raw transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// The token [`cancel`](Self::cancel) sets. Clones may be moved to other
    /// threads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Makes the operation in progress fail with
    /// [`TransportError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Ids of the installed transport filters.
    pub fn transport_filter_ids(&self) -> Vec<FilterId> {
        self.driver.transport_filter_ids()
    }

    /// Installs new transport filters.
    pub fn set_transport_filters(&mut self, filters: Vec<Box<dyn Filter>>) {
        #[cfg(feature = "observability")]
        {
            let ids: Vec<FilterId> = filters.iter().map(|f| f.filter_id()).collect();
            debug!(filters = ?ids, "installing transport filters");
        }
        self.driver.set_transport_filters(filters);
    }

    /// Connects if not already connected. A new connection starts without
    /// transport filters.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(endpoint = %self.endpoint())))]
    pub fn connect(&mut self, deadline: Instant) -> Result<(), TransportError> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let timeout = remaining(deadline).ok_or_else(|| TransportError::ConnectTimeout {
            address: self.endpoint().to_string(),
            timeout: Duration::ZERO,
        })?;
        self.driver.reset();
        self.transport.connect(timeout)
    }

    /// Closes the connection and drops the transport filters.
    pub fn disconnect(&mut self) {
        #[cfg(feature = "observability")]
        {
            if self.transport.is_connected() {
                debug!(endpoint = %self.endpoint(), "disconnecting");
            }
        }
        self.transport.close();
        self.driver.reset();
    }

    /// Sends one message, adding its length prefix.
    pub fn send(&mut self, buffers: Vec<ByteBuffer>, deadline: Instant) -> Result<usize, TransportError> {
        let progress = self.driver.begin_send(buffers, false)?;
        self.finish_send(progress, deadline)
    }

    /// Sends bytes that already consist of length-prefixed messages.
    pub fn send_framed(
        &mut self,
        buffers: Vec<ByteBuffer>,
        deadline: Instant,
    ) -> Result<usize, TransportError> {
        let progress = self.driver.begin_send(buffers, true)?;
        self.finish_send(progress, deadline)
    }

    fn finish_send(&mut self, progress: Progress, deadline: Instant) -> Result<usize, TransportError> {
        match self.drive(progress, deadline)? {
            Progress::Sent(n) => Ok(n),
            _ => Err(stalled()),
        }
    }

    /// Receives one frame body.
    ///
    /// A [`TransportError::ReadTimeout`] leaves the read outstanding: the
    /// next call resumes it without losing bytes.
    pub fn receive(&mut self, deadline: Instant) -> Result<ByteBuffer, TransportError> {
        let progress = self.driver.begin_receive()?;
        match self.drive(progress, deadline)? {
            Progress::Frame(frame) => Ok(frame),
            _ => Err(stalled()),
        }
    }

    fn drive(&mut self, mut progress: Progress, deadline: Instant) -> Result<Progress, TransportError> {
        loop {
            progress = match progress {
                Progress::WireRead(bytes_requested) => {
                    let bytes = self.read_wire(bytes_requested, deadline)?;
                    self.driver.wire_read(bytes)?
                }
                Progress::WireWrite(buffers) => {
                    let written = self.write_wire(&buffers, deadline)?;
                    self.driver.wire_written(written)?
                }
                done => return Ok(done),
            };
        }
    }

    fn check_cancelled(&self) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }

    fn read_wire(&mut self, bytes_requested: usize, deadline: Instant) -> Result<ByteBuffer, TransportError> {
        let mut buf = vec![0u8; bytes_requested.clamp(1, MAX_WIRE_READ)];
        loop {
            self.check_cancelled()?;
            let timeout = remaining(deadline).ok_or(TransportError::ReadTimeout)?;
            match self.transport.read(&mut buf, timeout.min(CANCEL_POLL_INTERVAL)) {
                Ok(0) => return Err(TransportError::PeerDisconnect),
                Ok(n) => {
                    #[cfg(feature = "observability")]
                    trace!(bytes = n, "wire read");
                    buf.truncate(n);
                    return Ok(ByteBuffer::from_vec(buf));
                }
                Err(TransportError::ReadTimeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn write_wire(&mut self, buffers: &[ByteBuffer], deadline: Instant) -> Result<usize, TransportError> {
        let mut total = 0;
        for buffer in buffers {
            let mut offset = 0;
            while offset < buffer.len() {
                self.check_cancelled()?;
                let timeout = remaining(deadline).ok_or(TransportError::WriteTimeout)?;
                match self
                    .transport
                    .write(&buffer[offset..], timeout.min(CANCEL_POLL_INTERVAL))
                {
                    Ok(0) => return Err(TransportError::PeerDisconnect),
                    Ok(n) => offset += n,
                    Err(TransportError::WriteTimeout) => continue,
                    Err(e) => return Err(e),
                }
            }
            total += buffer.len();
        }
        #[cfg(feature = "observability")]
        trace!(bytes = total, "wire write");
        Ok(total)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("endpoint", &self.endpoint())
            .field("transport_type", &self.transport_type)
            .field("connected", &self.is_connected())
            .field("transport_filters", &self.transport_filter_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{IdentityFilter, XorFilter};
    use crate::transport::MemoryTransport;

    fn pair() -> (ClientConnection, ClientConnection) {
        let (a, b) = MemoryTransport::pair("memory://test");
        let wire = WireConfig::memory("memory://test");
        (
            ClientConnection::new(Box::new(a), &wire).unwrap(),
            ClientConnection::new(Box::new(b), &wire).unwrap(),
        )
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[test]
    fn test_frames_are_length_prefixed() {
        let (mut raw, peer) = MemoryTransport::pair("memory://raw");
        let mut conn = ClientConnection::new(Box::new(peer), &WireConfig::memory("m")).unwrap();
        conn.send(vec![ByteBuffer::from("hello")], soon()).unwrap();

        let mut buf = [0u8; 9];
        let mut read = 0;
        while read < buf.len() {
            read += raw.read(&mut buf[read..], Duration::from_secs(1)).unwrap();
        }
        assert_eq!(&buf, b"\x05\x00\x00\x00hello");
    }

    #[test]
    fn test_back_to_back_frames() {
        let (mut a, mut b) = pair();
        a.send(vec![ByteBuffer::from("one")], soon()).unwrap();
        a.send(vec![ByteBuffer::from("two")], soon()).unwrap();
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"one");
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"two");
    }

    #[test]
    fn test_framed_send_carries_several_messages() {
        let (mut a, mut b) = pair();
        let batch = ByteBuffer::from(&b"\x01\x00\x00\x00a\x02\x00\x00\x00bc"[..]);
        assert_eq!(a.send_framed(vec![batch], soon()).unwrap(), 11);
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"a");
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"bc");
    }

    #[test]
    fn test_transport_filters_apply_both_ways() {
        let (mut a, mut b) = pair();
        a.set_transport_filters(vec![Box::new(XorFilter::new(0x5A))]);
        b.set_transport_filters(vec![Box::new(XorFilter::new(0x5A))]);
        assert_eq!(a.transport_filter_ids(), vec![FilterId::Xor]);

        a.send(vec![ByteBuffer::from("secret")], soon()).unwrap();
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"secret");
    }

    #[test]
    fn test_read_timeout_resumes() {
        let (mut a, mut b) = pair();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(matches!(b.receive(deadline), Err(TransportError::ReadTimeout)));

        a.send(vec![ByteBuffer::from("late")], soon()).unwrap();
        assert_eq!(b.receive(soon()).unwrap().as_slice(), b"late");
    }

    #[test]
    fn test_peer_disconnect() {
        let (mut a, mut b) = pair();
        a.disconnect();
        assert!(matches!(b.receive(soon()), Err(TransportError::PeerDisconnect)));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let (mut a, _b) = pair();
        a.set_max_message_length(4);
        assert!(matches!(
            a.send(vec![ByteBuffer::from("too long")], soon()),
            Err(TransportError::MessageTooLarge { length: 8, max: 4 })
        ));
    }

    #[test]
    fn test_cancel_interrupts_receive() {
        let (_a, mut b) = pair();
        let token = b.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        let started = Instant::now();
        assert!(matches!(b.receive(soon()), Err(TransportError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn test_disconnect_drops_transport_filters() {
        let (listener_client, listener) = MemoryTransport::listen("memory://reconnect");
        let mut conn =
            ClientConnection::new(Box::new(listener_client), &WireConfig::memory("m")).unwrap();
        conn.connect(soon()).unwrap();
        let _server = listener.accept(Duration::from_secs(1)).unwrap();
        conn.set_transport_filters(vec![Box::new(IdentityFilter::new())]);
        assert_eq!(conn.transport_filter_ids().len(), 1);

        conn.disconnect();
        assert!(conn.transport_filter_ids().is_empty());
        conn.connect(soon()).unwrap();
        assert!(conn.is_connected());
    }
}
