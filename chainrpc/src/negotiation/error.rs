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

//! Negotiation error types.

use crate::filter::FilterId;
use crate::framing::RemoteErrorCode;
use thiserror::Error;

/// Errors raised while agreeing on transport filters.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// A requested filter has no factory.
    #[error("unknown filter {id}")]
    UnknownFilter {
        /// The unknown id
        id: FilterId,
    },

    /// The requested filter sequence maps to a protocol the server does
    /// not accept.
    #[error("unsupported transport protocol {protocol}")]
    UnsupportedTransportProtocol {
        /// Protocol name, `unspecified` when the sequence matched none
        protocol: String,
    },

    /// The session's transport filters may not be changed.
    #[error("transport filters are locked")]
    FiltersLocked,

    /// A control message could not be encoded or decoded.
    #[error("invalid control message: {source}")]
    InvalidMessage {
        /// The serde_json failure
        #[source]
        source: serde_json::Error,
    },

    /// The peer refused the request.
    #[error("peer rejected filter request ({code:?}): {message}")]
    Rejected {
        /// Code the peer answered with
        code: RemoteErrorCode,
        /// The peer's description
        message: String,
    },
}

impl NegotiationError {
    /// Code sent to the peer for this error.
    pub fn remote_code(&self) -> RemoteErrorCode {
        match self {
            NegotiationError::UnknownFilter { .. } => RemoteErrorCode::UnknownFilter,
            NegotiationError::UnsupportedTransportProtocol { .. } => {
                RemoteErrorCode::UnsupportedTransportProtocol
            }
            NegotiationError::FiltersLocked => RemoteErrorCode::FiltersLocked,
            NegotiationError::InvalidMessage { .. } => RemoteErrorCode::DecodingError,
            NegotiationError::Rejected { code, .. } => *code,
        }
    }
}

impl From<serde_json::Error> for NegotiationError {
    fn from(source: serde_json::Error) -> Self {
        NegotiationError::InvalidMessage { source }
    }
}
