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

//! TCP transports.
//!
//! [`TcpTransport`] is the blocking flavor built on `std::net::TcpStream`
//! with per-operation socket timeouts. [`AsyncTcpTransport`] wraps a Tokio
//! `TcpStream`; servers create it from accepted streams with
//! [`AsyncTcpTransport::from_stream`].

use super::{AsyncRawTransport, RawTransport, TransportError};
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[cfg(feature = "observability")]
use tracing::{debug, info, instrument};

/// Socket timeouts of zero mean "block forever", so waits are clamped to
/// this floor.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Blocking TCP client transport.
///
/// # Examples
///
/// ```rust,no_run
/// use chainrpc::transport::{RawTransport, TcpTransport};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transport = TcpTransport::new("127.0.0.1:50001");
/// transport.connect(Duration::from_secs(2))?;
/// transport.write(b"ping", Duration::from_secs(1))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Creates an unconnected transport for `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let address = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        Ok(Self {
            address,
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl RawTransport for TcpTransport {
    fn endpoint(&self) -> &str {
        &self.address
    }

    #[cfg_attr(feature = "observability", instrument(skip(self), fields(address = %self.address)))]
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let connect_failed = |source| TransportError::ConnectFailed {
            address: self.address.clone(),
            source,
        };
        let addr = self
            .address
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout.max(MIN_SOCKET_TIMEOUT))
            .map_err(|e| {
                if is_timeout(&e) {
                    TransportError::ConnectTimeout {
                        address: self.address.clone(),
                        timeout,
                    }
                } else {
                    connect_failed(e)
                }
            })?;
        stream.set_nodelay(true)?;

        #[cfg(feature = "observability")]
        info!("TCP connection established");

        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {
                Err(TransportError::ReadTimeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let stream = self.stream()?;
        stream.set_write_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))?;
        match stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Err(TransportError::WriteTimeout),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            #[cfg(feature = "observability")]
            debug!(address = %self.address, "closing TCP connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Tokio TCP transport.
///
/// # Examples
///
/// ```rust,no_run
/// use chainrpc::transport::{AsyncRawTransport, AsyncTcpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
/// let (stream, _) = listener.accept().await?;
/// let mut server_side = AsyncTcpTransport::from_stream(stream)?;
/// server_side.write(b"hello").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncTcpTransport {
    address: String,
    stream: Option<tokio::net::TcpStream>,
}

impl AsyncTcpTransport {
    /// Creates an unconnected transport for `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    /// Wraps an already connected stream, typically one just accepted.
    pub fn from_stream(stream: tokio::net::TcpStream) -> io::Result<Self> {
        let address = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        Ok(Self {
            address,
            stream: Some(stream),
        })
    }
}

#[async_trait]
impl AsyncRawTransport for AsyncTcpTransport {
    fn endpoint(&self) -> &str {
        &self.address
    }

    #[cfg_attr(feature = "observability", instrument(skip(self), fields(address = %self.address)))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|source| TransportError::ConnectFailed {
                address: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        #[cfg(feature = "observability")]
        info!("TCP connection established");

        self.stream = Some(stream);
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
            #[cfg(feature = "observability")]
            debug!(address = %self.address, "closing TCP connection");
            let _ = stream.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
