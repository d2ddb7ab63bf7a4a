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

//! Framing layer error types.

use crate::filter::{FilterError, FilterId};
use thiserror::Error;

/// Errors raised while framing or unframing a message.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterId;
/// use chainrpc::framing::FramingError;
///
/// let error = FramingError::PayloadFilterMismatch {
///     expected: vec![],
///     actual: vec![FilterId::ZlibStateless],
/// };
/// assert!(error.is_protocol_error());
/// ```
#[derive(Debug, Error)]
pub enum FramingError {
    /// The filters named in a filtered-payload header differ from the
    /// receiver's message filters.
    #[error("payload filter mismatch: receiver uses {expected:?}, message used {actual:?}")]
    PayloadFilterMismatch {
        /// Filters configured on the receiving side
        expected: Vec<FilterId>,
        /// Filters the sender applied
        actual: Vec<FilterId>,
    },

    /// A header or envelope could not be decoded.
    #[error("decoding error: {reason}")]
    DecodingError {
        /// What was wrong with the bytes
        reason: String,
    },

    /// A header carried a version this build cannot read.
    #[error("unsupported header version {version}")]
    UnsupportedHeaderVersion {
        /// The version found
        version: u8,
    },

    /// A length prefix announced an empty or oversized frame.
    #[error("invalid frame length {length} (maximum {max})")]
    InvalidFrameLength {
        /// Announced length
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// A filtered-payload header announced an unfiltered message longer
    /// than the receiver accepts.
    #[error("unfiltered message length {length} exceeds maximum {max}")]
    UnfilteredLengthTooLarge {
        /// Length named in the header
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// A message filter failed.
    #[error("message filter error: {0}")]
    Filter(#[from] FilterError),
}

impl FramingError {
    pub(crate) fn decoding(reason: impl Into<String>) -> Self {
        FramingError::DecodingError {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the peer sent bytes this side cannot interpret.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, FramingError::Filter(e) if !e.is_http_error())
    }

    /// Framing errors leave the byte stream out of sync; the transport
    /// cannot be reused.
    pub fn should_close_transport(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = FramingError::InvalidFrameLength {
            length: 0,
            max: 1024,
        };
        assert_eq!(error.to_string(), "invalid frame length 0 (maximum 1024)");
    }

    #[test]
    fn test_filter_errors_convert() {
        let error: FramingError = FilterError::ShortTransfer {
            expected: 10,
            actual: 4,
        }
        .into();
        assert!(matches!(error, FramingError::Filter(_)));
        assert!(!error.is_protocol_error());
        assert!(error.should_close_transport());
    }
}
