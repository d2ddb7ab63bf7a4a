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

//! Raw byte transports.
//!
//! A raw transport moves bytes and nothing else: no framing, no filters.
//! [`ClientConnection`](super::ClientConnection) and
//! [`AsyncClientConnection`](super::AsyncClientConnection) layer frames and
//! filter chains on top.

use super::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// A blocking byte transport whose every operation is bounded by a timeout.
///
/// # Contract
///
/// - `read` returns `Ok(0)` only when the peer closed the connection, and
///   [`TransportError::ReadTimeout`] when nothing arrived in time.
/// - `write` may write fewer bytes than offered.
/// - `connect` on a connected transport is a no-op.
pub trait RawTransport: Send {
    /// Address or name of the remote endpoint.
    fn endpoint(&self) -> &str;

    /// Opens the connection.
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Reads up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Writes some prefix of `buf`, returning its length.
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Closes the connection. Closing a closed transport does nothing.
    fn close(&mut self);

    /// Returns `true` while a connection is open.
    fn is_connected(&self) -> bool;
}

/// The asynchronous counterpart of [`RawTransport`].
///
/// Timeouts are applied by the caller. `read` must be cancel safe: dropping
/// its future before completion loses no bytes.
#[async_trait]
pub trait AsyncRawTransport: Send {
    /// Address or name of the remote endpoint.
    fn endpoint(&self) -> &str;

    /// Opens the connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Reads up to `buf.len()` bytes; `Ok(0)` means the peer closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes some prefix of `buf`, returning its length.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Closes the connection.
    async fn close(&mut self);

    /// Returns `true` while a connection is open.
    fn is_connected(&self) -> bool;
}

impl<T: RawTransport + ?Sized> RawTransport for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).connect(timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read(buf, timeout)
    }

    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).write(buf, timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

#[async_trait]
impl<T: AsyncRawTransport + ?Sized> AsyncRawTransport for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        (**self).write(buf).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
