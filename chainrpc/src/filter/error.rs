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

//! Filter layer error types.
//!
//! Filter errors come from a stage of the byte pipeline: malformed HTTP
//! framing, a failed encryption handshake, corrupt compressed data, or a
//! driver that could not push a whole message through a chain. Every filter
//! error leaves the chain in an unknown state, so the owning connection is
//! torn down rather than resumed mid-stream.

use super::FilterId;
use thiserror::Error;

/// Errors raised by filters and by the drivers that run filter chains.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterError;
///
/// let error = FilterError::HttpSessionIndexMismatch { expected: 3, actual: 5 };
/// assert!(error.should_close_transport());
/// assert!(!error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum FilterError {
    /// The peer sent something that is not a well-formed HTTP message.
    #[error("invalid HTTP message: {reason}")]
    InvalidHttpMessage {
        /// What was wrong with the message
        reason: String,
    },

    /// An HTTP response carried a status other than 200.
    #[error("unexpected HTTP response status: {status_line}")]
    HttpResponseStatus {
        /// The response line as received
        status_line: String,
    },

    /// An HTTP request or response arrived out of order.
    #[error("HTTP session index mismatch: expected {expected}, got {actual}")]
    HttpSessionIndexMismatch {
        /// The index that should have arrived
        expected: u32,
        /// The index that did arrive
        actual: u32,
    },

    /// An HTTP response belongs to a different session than the request.
    #[error("HTTP session id mismatch: expected {expected}, got {actual}")]
    HttpSessionIdMismatch {
        /// Session id sent with the request
        expected: String,
        /// Session id returned with the response
        actual: String,
    },

    /// The server side of an HTTP tunnel reported an error through the
    /// `X-RCFError` header.
    #[error("HTTP tunnel error reported by server: {message}")]
    HttpTunnel {
        /// Message carried by the header
        message: String,
    },

    /// An HTTP proxy refused the `CONNECT` request.
    #[error("HTTP proxy CONNECT failed: {reply}")]
    HttpConnectFailed {
        /// First line of the proxy's reply, or a description of the failure
        reply: String,
    },

    /// An encryption or authentication handshake failed.
    #[error("{filter} handshake failed: {reason}")]
    FilterHandshakeFailed {
        /// Filter that failed
        filter: FilterId,
        /// Description of the failure
        reason: String,
    },

    /// No filter is registered for the requested id.
    #[error("unknown filter id {id}")]
    UnknownFilter {
        /// The unrecognised id
        id: FilterId,
    },

    /// Certificate or key material for a filter could not be loaded.
    #[error("invalid filter configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the problem
        reason: String,
    },

    /// Compressed data could not be inflated or deflated.
    #[error("compression error: {reason}")]
    Compression {
        /// Description of the failure
        reason: String,
    },

    /// A message exceeded the configured maximum length.
    #[error("message of {length} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Declared or observed length
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// A driver moved fewer (or more) bytes through the chain than expected.
    #[error("short transfer: expected {expected} bytes, transferred {actual}")]
    ShortTransfer {
        /// Bytes that should have been transferred
        expected: usize,
        /// Bytes actually transferred
        actual: usize,
    },

    /// A driver stopped receiving completions from the chain.
    #[error("filter chain stalled during {operation}")]
    Stalled {
        /// The operation that made no progress
        operation: &'static str,
    },

    /// A filter tried to start a second wire operation while one was still
    /// outstanding.
    #[error("filter issued concurrent wire operations")]
    ConcurrentOperation,
}

impl FilterError {
    /// Filter errors are not recoverable on the same connection, except for
    /// an unknown id, which is rejected before any chain is installed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FilterError::UnknownFilter { .. })
    }

    /// Returns `true` if the connection carrying the chain must be closed.
    pub fn should_close_transport(&self) -> bool {
        !matches!(self, FilterError::UnknownFilter { .. })
    }

    /// Returns `true` for errors caused by bad HTTP framing.
    pub fn is_http_error(&self) -> bool {
        matches!(
            self,
            FilterError::InvalidHttpMessage { .. }
                | FilterError::HttpResponseStatus { .. }
                | FilterError::HttpSessionIndexMismatch { .. }
                | FilterError::HttpSessionIdMismatch { .. }
                | FilterError::HttpTunnel { .. }
                | FilterError::HttpConnectFailed { .. }
        )
    }
}
