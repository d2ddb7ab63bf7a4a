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

//! The asynchronous client connection.

use super::connection::{ChainDriver, MAX_WIRE_READ, Progress, remaining};
use super::{AsyncRawTransport, CancelToken, TransportError, TransportType, WireConfig};
use crate::buffer::ByteBuffer;
use crate::filter::{DEFAULT_MAX_MESSAGE_LENGTH, Filter, FilterError, FilterId};
use std::time::{Duration, Instant};

#[cfg(feature = "observability")]
use tracing::{debug, instrument, trace};

fn stalled() -> TransportError {
    TransportError::Filter(FilterError::Stalled {
        operation: "connection",
    })
}

/// A Tokio client connection.
///
/// Mirrors [`ClientConnection`](super::ClientConnection) with the same chain
/// logic. Waits race against the connection's [`CancelToken`], so a cancel
/// takes effect immediately.
///
/// # Examples
///
/// ```rust
/// use chainrpc::buffer::ByteBuffer;
/// use chainrpc::transport::{AsyncClientConnection, AsyncMemoryTransport, WireConfig};
/// use std::time::{Duration, Instant};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (a, b) = AsyncMemoryTransport::pair("memory://doc");
/// let wire = WireConfig::memory("memory://doc");
/// let mut sender = AsyncClientConnection::new(Box::new(a), &wire).unwrap();
/// let mut receiver = AsyncClientConnection::new(Box::new(b), &wire).unwrap();
///
/// let deadline = Instant::now() + Duration::from_secs(1);
/// sender.send(vec![ByteBuffer::from("hello")], deadline).await.unwrap();
/// assert_eq!(receiver.receive(deadline).await.unwrap().as_slice(), b"hello");
/// # }
/// ```
pub struct AsyncClientConnection {
    transport: Box<dyn AsyncRawTransport>,
    transport_type: TransportType,
    driver: ChainDriver,
    cancel: CancelToken,
}

impl AsyncClientConnection {
    /// Creates a connection over `transport` with the wire filters `wire`
    /// calls for.
    pub fn new(
        transport: Box<dyn AsyncRawTransport>,
        wire: &WireConfig,
    ) -> Result<Self, FilterError> {
        Ok(Self::with_wire_filters(
            transport,
            wire.transport_type,
            wire.client_filters()?,
        ))
    }

    /// Creates a connection with explicit wire filters.
    pub fn with_wire_filters(
        transport: Box<dyn AsyncRawTransport>,
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

    /// The token [`cancel`](Self::cancel) sets.
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
        self.driver.set_transport_filters(filters);
    }

    /// Connects if not already connected.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(endpoint = %self.endpoint())))]
    pub async fn connect(&mut self, deadline: Instant) -> Result<(), TransportError> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let address = self.endpoint().to_string();
        let timeout = remaining(deadline).ok_or_else(|| TransportError::ConnectTimeout {
            address: address.clone(),
            timeout: Duration::ZERO,
        })?;
        self.driver.reset();

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.connect()) => {
                result.map_err(|_| TransportError::ConnectTimeout { address, timeout })?
            }
        }
    }

    /// Closes the connection and drops the transport filters.
    pub async fn disconnect(&mut self) {
        #[cfg(feature = "observability")]
        {
            if self.transport.is_connected() {
                debug!(endpoint = %self.endpoint(), "disconnecting");
            }
        }
        self.transport.close().await;
        self.driver.reset();
    }

    /// Sends one message, adding its length prefix.
    pub async fn send(
        &mut self,
        buffers: Vec<ByteBuffer>,
        deadline: Instant,
    ) -> Result<usize, TransportError> {
        let progress = self.driver.begin_send(buffers, false)?;
        match self.drive(progress, deadline).await? {
            Progress::Sent(n) => Ok(n),
            _ => Err(stalled()),
        }
    }

    /// Sends bytes that already consist of length-prefixed messages.
    pub async fn send_framed(
        &mut self,
        buffers: Vec<ByteBuffer>,
        deadline: Instant,
    ) -> Result<usize, TransportError> {
        let progress = self.driver.begin_send(buffers, true)?;
        match self.drive(progress, deadline).await? {
            Progress::Sent(n) => Ok(n),
            _ => Err(stalled()),
        }
    }

    /// Receives one frame body. A timed-out receive can be resumed.
    pub async fn receive(&mut self, deadline: Instant) -> Result<ByteBuffer, TransportError> {
        let progress = self.driver.begin_receive()?;
        match self.drive(progress, deadline).await? {
            Progress::Frame(frame) => Ok(frame),
            _ => Err(stalled()),
        }
    }

    async fn drive(
        &mut self,
        mut progress: Progress,
        deadline: Instant,
    ) -> Result<Progress, TransportError> {
        loop {
            progress = match progress {
                Progress::WireRead(bytes_requested) => {
                    let bytes = self.read_wire(bytes_requested, deadline).await?;
                    self.driver.wire_read(bytes)?
                }
                Progress::WireWrite(buffers) => {
                    let written = self.write_wire(&buffers, deadline).await?;
                    self.driver.wire_written(written)?
                }
                done => return Ok(done),
            };
        }
    }

    async fn read_wire(
        &mut self,
        bytes_requested: usize,
        deadline: Instant,
    ) -> Result<ByteBuffer, TransportError> {
        let mut buf = vec![0u8; bytes_requested.clamp(1, MAX_WIRE_READ)];
        let timeout = remaining(deadline).ok_or(TransportError::ReadTimeout)?;
        let cancel = self.cancel.clone();
        let n = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.read(&mut buf)) => {
                result.map_err(|_| TransportError::ReadTimeout)??
            }
        };
        if n == 0 {
            return Err(TransportError::PeerDisconnect);
        }
        #[cfg(feature = "observability")]
        trace!(bytes = n, "wire read");
        buf.truncate(n);
        Ok(ByteBuffer::from_vec(buf))
    }

    async fn write_wire(
        &mut self,
        buffers: &[ByteBuffer],
        deadline: Instant,
    ) -> Result<usize, TransportError> {
        let cancel = self.cancel.clone();
        let transport = &mut self.transport;
        let write_all = async {
            let mut total = 0;
            for buffer in buffers {
                let mut offset = 0;
                while offset < buffer.len() {
                    match transport.write(&buffer[offset..]).await? {
                        0 => return Err(TransportError::PeerDisconnect),
                        n => offset += n,
                    }
                }
                total += buffer.len();
            }
            Ok(total)
        };

        let timeout = remaining(deadline).ok_or(TransportError::WriteTimeout)?;
        let total = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, write_all) => {
                result.map_err(|_| TransportError::WriteTimeout)??
            }
        };
        #[cfg(feature = "observability")]
        trace!(bytes = total, "wire write");
        Ok(total)
    }
}

impl std::fmt::Debug for AsyncClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClientConnection")
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
    use crate::filter::XorFilter;
    use crate::transport::AsyncMemoryTransport;

    fn pair() -> (AsyncClientConnection, AsyncClientConnection) {
        let (a, b) = AsyncMemoryTransport::pair("memory://async");
        let wire = WireConfig::memory("memory://async");
        (
            AsyncClientConnection::new(Box::new(a), &wire).unwrap(),
            AsyncClientConnection::new(Box::new(b), &wire).unwrap(),
        )
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[tokio::test]
    async fn test_round_trip_with_filters() {
        let (mut a, mut b) = pair();
        a.set_transport_filters(vec![Box::new(XorFilter::new(3))]);
        b.set_transport_filters(vec![Box::new(XorFilter::new(3))]);

        a.send(vec![ByteBuffer::from("first")], soon()).await.unwrap();
        a.send(vec![ByteBuffer::from("second")], soon()).await.unwrap();
        assert_eq!(b.receive(soon()).await.unwrap().as_slice(), b"first");
        assert_eq!(b.receive(soon()).await.unwrap().as_slice(), b"second");
    }

    #[tokio::test]
    async fn test_receive_timeout_then_resume() {
        let (mut a, mut b) = pair();
        let short = Instant::now() + Duration::from_millis(20);
        assert!(matches!(b.receive(short).await, Err(TransportError::ReadTimeout)));

        a.send(vec![ByteBuffer::from("late")], soon()).await.unwrap();
        assert_eq!(b.receive(soon()).await.unwrap().as_slice(), b"late");
    }

    #[tokio::test]
    async fn test_cancel_wakes_receive() {
        let (_a, mut b) = pair();
        let token = b.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        assert!(matches!(b.receive(soon()).await, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_peer_disconnect() {
        let (mut a, mut b) = pair();
        a.disconnect().await;
        assert!(matches!(b.receive(soon()).await, Err(TransportError::PeerDisconnect)));
    }
}
