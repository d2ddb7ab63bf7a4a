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

//! Control messages exchanged out of band.

use super::NegotiationError;
use crate::filter::FilterId;
use crate::framing::RemoteErrorCode;
use serde::{Deserialize, Serialize};

/// Body of an out-of-band control request.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterId;
/// use chainrpc::negotiation::ControlRequest;
///
/// let request = ControlRequest::request_transport_filters(&[FilterId::ZlibStateful]);
/// let bytes = request.encode().unwrap();
/// assert_eq!(
///     std::str::from_utf8(&bytes).unwrap(),
///     r#"{"type":"request_transport_filters","filter_ids":[4]}"#
/// );
/// assert_eq!(ControlRequest::decode(&bytes).unwrap(), request);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Asks the server to install these transport filters, outermost first.
    RequestTransportFilters {
        /// Wire ids of the filters
        filter_ids: Vec<u8>,
    },
}

impl ControlRequest {
    /// A filter request for `ids`.
    pub fn request_transport_filters(ids: &[FilterId]) -> Self {
        ControlRequest::RequestTransportFilters {
            filter_ids: ids.iter().map(|&id| u8::from(id)).collect(),
        }
    }

    /// Serializes the request.
    pub fn encode(&self) -> Result<Vec<u8>, NegotiationError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a request.
    pub fn decode(bytes: &[u8]) -> Result<Self, NegotiationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of the answer to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Numeric [`RemoteErrorCode`], zero on success.
    pub error_code: u32,
    /// Description of a failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Opaque handshake continuation tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<Vec<u8>>,
}

impl ControlResponse {
    /// A successful answer.
    pub fn accepted() -> Self {
        Self {
            error_code: 0,
            message: String::new(),
            tokens: Vec::new(),
        }
    }

    /// An answer refusing the request.
    pub fn rejected(error: &NegotiationError) -> Self {
        Self {
            error_code: error.remote_code().into(),
            message: error.to_string(),
            tokens: Vec::new(),
        }
    }

    /// The error code as a [`RemoteErrorCode`].
    pub fn code(&self) -> RemoteErrorCode {
        RemoteErrorCode::from(self.error_code)
    }

    /// Converts a refusal into a [`NegotiationError::Rejected`].
    pub fn into_result(self) -> Result<Self, NegotiationError> {
        match self.code() {
            RemoteErrorCode::None => Ok(self),
            code => Err(NegotiationError::Rejected {
                code,
                message: self.message,
            }),
        }
    }

    /// Serializes the response.
    pub fn encode(&self) -> Result<Vec<u8>, NegotiationError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a response.
    pub fn decode(bytes: &[u8]) -> Result<Self, NegotiationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_response_is_compact() {
        let bytes = ControlResponse::accepted().encode().unwrap();
        assert_eq!(bytes, br#"{"error_code":0}"#);
        assert!(ControlResponse::decode(&bytes).unwrap().into_result().is_ok());
    }

    #[test]
    fn test_rejection_carries_code() {
        let response = ControlResponse::rejected(&NegotiationError::FiltersLocked);
        let decoded = ControlResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.code(), RemoteErrorCode::FiltersLocked);
        assert!(matches!(
            decoded.into_result(),
            Err(NegotiationError::Rejected {
                code: RemoteErrorCode::FiltersLocked,
                ..
            })
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            ControlRequest::decode(b"{\"type\":\"reboot\"}"),
            Err(NegotiationError::InvalidMessage { .. })
        ));
    }
}
