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

//! In-memory transports for tests and benchmarks.
//!
//! Both flavors come either as a connected pair or as a client plus a
//! listener. The listener form lets a client disconnect and connect again,
//! which the stub does after errors and filter changes.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::transport::{MemoryTransport, RawTransport};
//! use std::time::Duration;
//!
//! let (mut client, listener) = MemoryTransport::listen("memory://echo");
//! client.connect(Duration::from_secs(1)).unwrap();
//! let mut server = listener.accept(Duration::from_secs(1)).unwrap();
//!
//! client.write(b"hello", Duration::from_secs(1)).unwrap();
//! let mut buf = [0u8; 5];
//! assert_eq!(server.read(&mut buf, Duration::from_secs(1)).unwrap(), 5);
//! assert_eq!(&buf, b"hello");
//! ```

use super::{AsyncRawTransport, RawTransport, TransportError};
use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

#[cfg(feature = "observability")]
use tracing::debug;

/// Capacity of each direction of an asynchronous memory connection.
const ASYNC_BUFFER_SIZE: usize = 64 * 1024;

fn refused(endpoint: &str) -> TransportError {
    TransportError::ConnectFailed {
        address: endpoint.to_string(),
        source: io::Error::new(io::ErrorKind::ConnectionRefused, "no memory listener"),
    }
}

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of a blocking memory connection.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

#[derive(Debug)]
struct Duplex {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

fn duplex_pair() -> (Duplex, Duplex) {
    let a_to_b = Arc::new(Pipe::default());
    let b_to_a = Arc::new(Pipe::default());
    (
        Duplex {
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
        },
        Duplex {
            inbound: a_to_b,
            outbound: b_to_a,
        },
    )
}

/// Blocking in-memory transport.
#[derive(Debug)]
pub struct MemoryTransport {
    endpoint: String,
    connector: Option<mpsc::Sender<MemoryTransport>>,
    duplex: Option<Duplex>,
}

impl MemoryTransport {
    /// Creates two transports connected to each other. Neither can
    /// reconnect once closed.
    pub fn pair(endpoint: impl Into<String>) -> (Self, Self) {
        let endpoint = endpoint.into();
        let (a, b) = duplex_pair();
        (
            Self {
                endpoint: endpoint.clone(),
                connector: None,
                duplex: Some(a),
            },
            Self {
                endpoint,
                connector: None,
                duplex: Some(b),
            },
        )
    }

    /// Creates an unconnected client and the listener it connects to.
    pub fn listen(endpoint: impl Into<String>) -> (Self, MemoryListener) {
        let endpoint = endpoint.into();
        let (tx, rx) = mpsc::channel();
        (
            Self {
                endpoint: endpoint.clone(),
                connector: Some(tx),
                duplex: None,
            },
            MemoryListener {
                endpoint,
                incoming: rx,
            },
        )
    }

    fn duplex(&self) -> Result<&Duplex, TransportError> {
        self.duplex.as_ref().ok_or(TransportError::NotConnected)
    }
}

impl RawTransport for MemoryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        if self.duplex.is_some() {
            return Ok(());
        }
        let connector = self.connector.as_ref().ok_or_else(|| refused(&self.endpoint))?;
        let (client, server) = duplex_pair();
        connector
            .send(MemoryTransport {
                endpoint: self.endpoint.clone(),
                connector: None,
                duplex: Some(server),
            })
            .map_err(|_| refused(&self.endpoint))?;

        #[cfg(feature = "observability")]
        debug!(endpoint = %self.endpoint, "memory connection established");

        self.duplex = Some(client);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let pipe = &self.duplex()?.inbound;
        let deadline = Instant::now() + timeout;
        let mut state = pipe.state.lock();
        while state.data.is_empty() && !state.closed {
            if pipe.ready.wait_until(&mut state, deadline).timed_out()
                && state.data.is_empty()
                && !state.closed
            {
                return Err(TransportError::ReadTimeout);
            }
        }

        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        let pipe = &self.duplex()?.outbound;
        {
            let mut state = pipe.state.lock();
            if state.closed {
                return Err(TransportError::PeerDisconnect);
            }
            state.data.extend(buf);
        }
        pipe.ready.notify_all();
        Ok(buf.len())
    }

    fn close(&mut self) {
        if let Some(duplex) = self.duplex.take() {
            duplex.inbound.close();
            duplex.outbound.close();
        }
    }

    fn is_connected(&self) -> bool {
        self.duplex.is_some()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accepts blocking memory connections.
#[derive(Debug)]
pub struct MemoryListener {
    endpoint: String,
    incoming: mpsc::Receiver<MemoryTransport>,
}

impl MemoryListener {
    /// Name clients connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Waits up to `timeout` for the next connection.
    pub fn accept(&self, timeout: Duration) -> Result<MemoryTransport, TransportError> {
        self.incoming.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => TransportError::ReadTimeout,
            mpsc::RecvTimeoutError::Disconnected => TransportError::NotConnected,
        })
    }
}

/// Asynchronous in-memory transport over a Tokio duplex stream.
#[derive(Debug)]
pub struct AsyncMemoryTransport {
    endpoint: String,
    connector: Option<tokio::sync::mpsc::UnboundedSender<AsyncMemoryTransport>>,
    stream: Option<DuplexStream>,
}

impl AsyncMemoryTransport {
    /// Creates two transports connected to each other.
    pub fn pair(endpoint: impl Into<String>) -> (Self, Self) {
        let endpoint = endpoint.into();
        let (a, b) = tokio::io::duplex(ASYNC_BUFFER_SIZE);
        (
            Self {
                endpoint: endpoint.clone(),
                connector: None,
                stream: Some(a),
            },
            Self {
                endpoint,
                connector: None,
                stream: Some(b),
            },
        )
    }

    /// Creates an unconnected client and the listener it connects to.
    pub fn listen(endpoint: impl Into<String>) -> (Self, AsyncMemoryListener) {
        let endpoint = endpoint.into();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                endpoint: endpoint.clone(),
                connector: Some(tx),
                stream: None,
            },
            AsyncMemoryListener {
                endpoint,
                incoming: rx,
            },
        )
    }

    /// Creates another unconnected client for the same listener. A
    /// transport from [`pair`](Self::pair) yields one that refuses to
    /// connect.
    pub fn new_client(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            connector: self.connector.clone(),
            stream: None,
        }
    }
}

#[async_trait]
impl AsyncRawTransport for AsyncMemoryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let connector = self.connector.as_ref().ok_or_else(|| refused(&self.endpoint))?;
        let (client, server) = tokio::io::duplex(ASYNC_BUFFER_SIZE);
        connector
            .send(AsyncMemoryTransport {
                endpoint: self.endpoint.clone(),
                connector: None,
                stream: Some(server),
            })
            .map_err(|_| refused(&self.endpoint))?;

        #[cfg(feature = "observability")]
        debug!(endpoint = %self.endpoint, "memory connection established");

        self.stream = Some(client);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(stream.write(buf).await?)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Accepts asynchronous memory connections.
#[derive(Debug)]
pub struct AsyncMemoryListener {
    endpoint: String,
    incoming: tokio::sync::mpsc::UnboundedReceiver<AsyncMemoryTransport>,
}

impl AsyncMemoryListener {
    /// Name clients connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Waits for the next connection. Returns `None` once every client
    /// handle is gone.
    pub async fn accept(&mut self) -> Option<AsyncMemoryTransport> {
        self.incoming.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_round_trip() {
        let (mut a, mut b) = MemoryTransport::pair("memory://pair");
        a.write(b"abc", Duration::from_secs(1)).unwrap();
        a.write(b"def", Duration::from_secs(1)).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf, Duration::from_secs(1)).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(b.read(&mut buf, Duration::from_secs(1)).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_read_timeout() {
        let (_a, mut b) = MemoryTransport::pair("memory://idle");
        let mut buf = [0u8; 1];
        let started = Instant::now();
        assert!(matches!(
            b.read(&mut buf, Duration::from_millis(20)),
            Err(TransportError::ReadTimeout)
        ));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_is_seen_by_peer() {
        let (mut a, mut b) = MemoryTransport::pair("memory://close");
        a.write(b"x", Duration::from_secs(1)).unwrap();
        a.close();

        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf, Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(b.read(&mut buf, Duration::from_secs(1)).unwrap(), 0);
        assert!(matches!(
            b.write(b"y", Duration::from_secs(1)),
            Err(TransportError::PeerDisconnect)
        ));
    }

    #[test]
    fn test_reader_wakes_on_write() {
        let (mut a, mut b) = MemoryTransport::pair("memory://wake");
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 2];
            let n = b.read(&mut buf, Duration::from_secs(5)).unwrap();
            buf[..n].to_vec()
        });
        std::thread::sleep(Duration::from_millis(10));
        a.write(b"hi", Duration::from_secs(1)).unwrap();
        assert_eq!(reader.join().unwrap(), b"hi");
    }

    #[test]
    fn test_reconnect_through_listener() {
        let (mut client, listener) = MemoryTransport::listen("memory://again");
        client.connect(Duration::from_secs(1)).unwrap();
        let first = listener.accept(Duration::from_secs(1)).unwrap();
        client.close();
        drop(first);

        client.connect(Duration::from_secs(1)).unwrap();
        assert!(listener.accept(Duration::from_secs(1)).is_ok());

        drop(listener);
        client.close();
        assert!(client.connect(Duration::from_secs(1)).unwrap_err().is_connect_error());
    }

    #[tokio::test]
    async fn test_async_listener() {
        let (mut client, mut listener) = AsyncMemoryTransport::listen("memory://async");
        client.connect().await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        client.close().await;
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_async_new_client_reaches_listener() {
        let (client, mut listener) = AsyncMemoryTransport::listen("memory://many");
        let mut second = client.new_client();
        assert!(!second.is_connected());
        second.connect().await.unwrap();
        assert!(listener.accept().await.is_some());

        let (paired, _) = AsyncMemoryTransport::pair("memory://paired");
        assert!(paired.new_client().connect().await.is_err());
    }
}
