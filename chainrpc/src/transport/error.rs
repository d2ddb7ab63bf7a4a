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

//! Transport layer error types.
//!
//! Connect failures, I/O timeouts and peer disconnects are separate variants
//! because callers react to them differently: a refused connect can be
//! retried against another endpoint, a timed-out read cannot be resumed
//! once the call is abandoned.
//!
//! Filter and framing errors raised while a connection drives its chain are
//! carried here too, so every failure of a live connection surfaces as one
//! type.

use crate::filter::FilterError;
use crate::framing::FramingError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by raw transports and client connections.
///
/// # Examples
///
/// ```rust
/// use chainrpc::transport::TransportError;
/// use std::io;
///
/// let error = TransportError::ConnectFailed {
///     address: "127.0.0.1:50001".to_string(),
///     source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
/// };
/// assert!(error.is_recoverable());
/// assert!(error.is_connect_error());
/// ```
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was not established within the connect timeout.
    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout {
        /// The address being connected to
        address: String,
        /// Time allowed for the attempt
        timeout: Duration,
    },

    /// The connection attempt failed.
    #[error("failed to connect to {address}: {source}")]
    ConnectFailed {
        /// The address that failed to connect
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// No data arrived before the read deadline.
    #[error("read timed out")]
    ReadTimeout,

    /// The write did not finish before its deadline.
    #[error("write timed out")]
    WriteTimeout,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    PeerDisconnect,

    /// A frame exceeded the maximum message length.
    #[error("message of {length} bytes exceeds the maximum of {max}")]
    MessageTooLarge {
        /// Length of the frame
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// The operation was cancelled from another thread or task.
    #[error("operation cancelled")]
    Cancelled,

    /// The transport has no open connection.
    #[error("transport is not connected")]
    NotConnected,

    /// An unexpected I/O error occurred.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A filter of the connection's chain failed.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// A received frame was malformed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}

impl TransportError {
    /// Returns `true` if repeating the call on a fresh connection may
    /// succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::ConnectTimeout { .. }
            | TransportError::ConnectFailed { .. }
            | TransportError::ReadTimeout
            | TransportError::WriteTimeout
            | TransportError::PeerDisconnect
            | TransportError::NotConnected => true,

            TransportError::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),

            TransportError::MessageTooLarge { .. }
            | TransportError::Cancelled
            | TransportError::Filter(_)
            | TransportError::Framing(_) => false,
        }
    }

    /// Returns `true` if the connection must be closed. Only failures that
    /// happen before a connection exists leave nothing to close.
    pub fn should_close_transport(&self) -> bool {
        !matches!(
            self,
            TransportError::ConnectTimeout { .. }
                | TransportError::ConnectFailed { .. }
                | TransportError::NotConnected
        )
    }

    /// Returns `true` for failures to reach the peer at all.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout { .. } | TransportError::ConnectFailed { .. }
        )
    }

    /// Returns `true` for the three timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout { .. }
                | TransportError::ReadTimeout
                | TransportError::WriteTimeout
        )
    }

    /// Underlying OS error code, when there is one.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            TransportError::ConnectFailed { source, .. } | TransportError::Io { source } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn connect_failed(address: impl Into<String>) -> Self {
        TransportError::ConnectFailed {
            address: address.into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::PeerDisconnect,
            _ => TransportError::Io { source: error },
        }
    }
}
