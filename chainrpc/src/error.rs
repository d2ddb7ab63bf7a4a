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

//! Top-level error types for chainrpc.
//!
//! Every layer owns its error enum:
//!
//! 1. **Transport**: connecting and moving bytes ([`TransportError`])
//! 2. **Filter**: the stages of a filter chain ([`FilterError`])
//! 3. **Framing**: headers and envelopes ([`FramingError`])
//! 4. **Negotiation**: agreeing on transport filters ([`NegotiationError`])
//!
//! [`RpcError`] composes them and adds the errors of the call itself.
//! A failed call is reported as a [`CallError`], which also names the
//! endpoint and the [`CallPhase`] the call was in, so "could not reach the
//! peer" ([`CallPhase::Connecting`]) is told apart from "the peer answered
//! with an error" and "timed out waiting".
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::{CallError, CallPhase, RpcError};
//! use chainrpc::transport::TransportError;
//!
//! let error = CallError::new(
//!     "127.0.0.1:50001",
//!     CallPhase::Receiving,
//!     RpcError::from(TransportError::ReadTimeout),
//! );
//! assert!(error.is_timeout());
//! assert!(!error.is_connect_failure());
//! assert_eq!(
//!     error.to_string(),
//!     "call to 127.0.0.1:50001 failed while receiving: transport error: read timed out"
//! );
//! ```

use crate::filter::FilterError;
use crate::framing::{FramingError, RemoteErrorCode};
use crate::negotiation::NegotiationError;
use crate::stub::CallPhase;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors of a remote call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connecting or moving bytes failed.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A filter failed outside of a transport operation.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// A message could not be framed or unframed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport filter negotiation failed.
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// The server does not support the requested versions. Handled by the
    /// stub once per call when auto versioning is on.
    #[error(
        "version mismatch: server supports runtime version {server_runtime_version}, archive version {server_archive_version}"
    )]
    VersionMismatch {
        /// Highest runtime version of the server
        server_runtime_version: u32,
        /// Highest archive version of the server, zero if unrestricted
        server_archive_version: u32,
    },

    /// A downgrade would go below the oldest supported runtime version.
    #[error("runtime version {version} is not supported (minimum {minimum})")]
    UnsupportedRuntimeVersion {
        /// The version that would have been used
        version: u32,
        /// Oldest supported version
        minimum: u32,
    },

    /// No ping-back arrived within three intervals.
    #[error("no ping-back received within 3 x {interval:?}")]
    PingBackTimeout {
        /// The configured ping-back interval
        interval: Duration,
    },

    /// The server answered with an error.
    #[error("remote error ({code:?}): {message}")]
    Remote {
        /// Code reported by the server
        code: RemoteErrorCode,
        /// Server's description
        message: String,
    },

    /// The call was cancelled.
    #[error("call cancelled")]
    Cancelled,

    /// Oneway calls need a persistent connection, which HTTP does not
    /// provide.
    #[error("oneway calls are not supported over HTTP")]
    OnewayOverHttp,

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong
        reason: String,
    },
}

impl RpcError {
    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        RpcError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Returns `true` for transport errors.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    /// Returns `true` for read, write, connect and ping-back timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::Transport(e) => e.is_timeout(),
            RpcError::PingBackTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if repeating the call may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            RpcError::Transport(e) => e.is_recoverable(),
            RpcError::PingBackTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the connection cannot be used after this error.
    #[must_use]
    pub fn should_close_transport(&self) -> bool {
        match self {
            RpcError::Transport(e) => e.should_close_transport(),
            RpcError::Filter(e) => e.should_close_transport(),
            RpcError::Framing(e) => e.should_close_transport(),
            RpcError::PingBackTimeout { .. } | RpcError::Cancelled => true,
            RpcError::Negotiation(NegotiationError::InvalidMessage { .. }) => true,
            _ => false,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => RpcError::Cancelled,
            other => RpcError::Transport(other),
        }
    }
}

/// A failed call with its context.
#[derive(Debug, Error)]
#[error("call to {endpoint} failed while {phase}: {source}")]
pub struct CallError {
    endpoint: String,
    phase: CallPhase,
    #[source]
    source: RpcError,
}

impl CallError {
    /// Wraps `source`.
    pub fn new(endpoint: impl Into<String>, phase: CallPhase, source: RpcError) -> Self {
        Self {
            endpoint: endpoint.into(),
            phase,
            source,
        }
    }

    /// Endpoint of the call.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Phase the call failed in.
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// The underlying error.
    pub fn error(&self) -> &RpcError {
        &self.source
    }

    /// Unwraps the underlying error.
    pub fn into_error(self) -> RpcError {
        self.source
    }

    /// Returns `true` if the peer could not be reached.
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        self.phase == CallPhase::Connecting
            || matches!(&self.source, RpcError::Transport(e) if e.is_connect_error())
    }

    /// Returns `true` if the call ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }

    /// OS error code of the underlying I/O failure, if any.
    pub fn os_error(&self) -> Option<i32> {
        match &self.source {
            RpcError::Transport(e) => e.os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_transport_maps_to_cancelled() {
        assert!(matches!(
            RpcError::from(TransportError::Cancelled),
            RpcError::Cancelled
        ));
    }

    #[test]
    fn test_timeouts() {
        assert!(RpcError::from(TransportError::ReadTimeout).is_timeout());
        assert!(RpcError::PingBackTimeout {
            interval: Duration::from_secs(1)
        }
        .is_timeout());
        assert!(!RpcError::OnewayOverHttp.is_timeout());
    }

    #[test]
    fn test_connect_failure() {
        let error = CallError::new(
            "127.0.0.1:1",
            CallPhase::Connecting,
            TransportError::connect_failed("127.0.0.1:1").into(),
        );
        assert!(error.is_connect_failure());

        let error = CallError::new(
            "127.0.0.1:1",
            CallPhase::Receiving,
            RpcError::Remote {
                code: RemoteErrorCode::Application,
                message: "boom".into(),
            },
        );
        assert!(!error.is_connect_failure());
        assert!(!error.error().should_close_transport());
    }

    #[test]
    fn test_version_mismatch_display() {
        let error = RpcError::VersionMismatch {
            server_runtime_version: 8,
            server_archive_version: 0,
        };
        assert_eq!(
            error.to_string(),
            "version mismatch: server supports runtime version 8, archive version 0"
        );
    }
}
