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

//! The call state machine and the request/response logic both stubs share.

use super::{MIN_RUNTIME_VERSION, StubConfig};
use crate::RpcError;
use crate::buffer::ByteBuffer;
use crate::filter::FilterChain;
use crate::framing::{
    Envelope, FramingError, MessageDescriptor, RemoteErrorCode, RequestHeader, ResponseHeader,
    ResponseKind, decode_envelope, decode_message, encode_message, encode_request,
};
use crate::negotiation::{ControlRequest, ControlResponse};
use crate::transport::CancelToken;
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "observability")]
use tracing::debug;

/// Phase of a call.
///
/// ```text
/// Idle -> Connecting -> NegotiatingFilters -> Sending -> Receiving -> Done
///                                                \-> Batching (oneway, batched)
/// any non-terminal phase -> Error
/// ```
///
/// Connecting and NegotiatingFilters are skipped when the connection is up
/// and its transport filters already match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    /// No call in progress.
    Idle,
    /// Establishing the connection.
    Connecting,
    /// Agreeing on transport filters.
    NegotiatingFilters,
    /// Writing the request.
    Sending,
    /// Waiting for the response.
    Receiving,
    /// Adding a oneway request to the batch.
    Batching,
    /// The call succeeded.
    Done,
    /// The call failed.
    Error,
}

impl CallPhase {
    /// Returns `true` for `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallPhase::Done | CallPhase::Error)
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Connecting => "connecting",
            CallPhase::NegotiatingFilters => "negotiating filters",
            CallPhase::Sending => "sending",
            CallPhase::Receiving => "receiving",
            CallPhase::Batching => "batching",
            CallPhase::Done => "done",
            CallPhase::Error => "failed",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cancels the calls of a stub from any thread.
///
/// Cancelling interrupts the transport operation in progress, which then
/// fails with [`RpcError::Cancelled`]. Each new call clears the flag, so a
/// cancel issued between calls has no effect.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancelToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Cancels the current call.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if the current call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Phase and retry bookkeeping of the current call.
#[derive(Debug)]
pub(crate) struct CallMachine {
    phase: CallPhase,
    retries_used: u32,
}

impl Default for CallMachine {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            retries_used: 0,
        }
    }
}

impl CallMachine {
    pub(crate) fn begin(&mut self) {
        self.phase = CallPhase::Idle;
        self.retries_used = 0;
    }

    pub(crate) fn phase(&self) -> CallPhase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: CallPhase) {
        #[cfg(feature = "observability")]
        {
            if phase != self.phase {
                debug!(from = %self.phase, to = %phase, "call phase");
            }
        }
        self.phase = phase;
    }

    pub(crate) fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub(crate) fn retry(&mut self) {
        self.retries_used += 1;
    }
}

/// Tracks ping-backs while a response is awaited.
#[derive(Debug)]
pub(crate) struct PingBackMonitor {
    interval: Duration,
    receive_start: Instant,
    last: Option<Instant>,
}

impl PingBackMonitor {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            receive_start: Instant::now(),
            last: None,
        }
    }

    /// Time by which the next ping-back must arrive.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if self.interval.is_zero() {
            return None;
        }
        let since = self.last.map_or(self.receive_start, |last| last.max(self.receive_start));
        Some(since + self.interval * 3)
    }

    pub(crate) fn check(&self) -> Result<(), RpcError> {
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Err(RpcError::PingBackTimeout {
                interval: self.interval,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn record(&mut self, at: Instant) {
        self.last = Some(at);
    }
}

/// A decoded frame received while waiting for a response.
#[derive(Debug)]
pub(crate) enum Reply {
    PingBack,
    Response(ResponseHeader, ByteBuffer),
}

/// Encodes a call request through the stub's message filters.
pub(crate) fn encode_call(
    config: &StubConfig,
    target: &str,
    method_id: u32,
    oneway: bool,
    user_data: &[u8],
    payload: Vec<ByteBuffer>,
    message_filters: &mut FilterChain,
) -> Result<Vec<ByteBuffer>, RpcError> {
    let header = RequestHeader {
        runtime_version: config.runtime_version,
        archive_version: config.archive_version,
        oneway,
        ping_back_interval_ms: if oneway { 0 } else { config.ping_back_interval_ms() },
        user_data: user_data.to_vec(),
        ..RequestHeader::new(target, method_id)
    };
    let request = encode_request(&header, payload)?;
    Ok(encode_message(request, message_filters)?)
}

/// Encodes an out-of-band control request. Control requests never pass
/// through message filters.
pub(crate) fn encode_control(
    config: &StubConfig,
    target: &str,
    request: &ControlRequest,
) -> Result<Vec<ByteBuffer>, RpcError> {
    let header = RequestHeader {
        runtime_version: config.runtime_version,
        archive_version: config.archive_version,
        out_of_band: true,
        out_of_band_data: request.encode()?,
        ..RequestHeader::new(target, 0)
    };
    Ok(encode_request(&header, Vec::new())?)
}

/// Decodes a frame received in answer to a request. Error responses become
/// `Err`. Error frames are accepted without message filters since the
/// server sends them when it could not decode the request.
pub(crate) fn decode_reply(frame: ByteBuffer, message_filters: &mut FilterChain) -> Result<Reply, RpcError> {
    let frame = if frame.first() == Some(&(MessageDescriptor::Error as u8)) {
        frame
    } else {
        decode_message(frame, message_filters)?
    };
    match decode_envelope(frame)? {
        Envelope::Response(header, _) if header.is_ping_back() => Ok(Reply::PingBack),
        Envelope::Response(header, payload) => match header.kind {
            ResponseKind::Ok => Ok(Reply::Response(header, payload)),
            _ => Err(response_error(header)),
        },
        Envelope::Error(header) => Err(response_error(header)),
        Envelope::Request(..) => Err(FramingError::DecodingError {
            reason: "received a request while waiting for a response".into(),
        }
        .into()),
    }
}

fn response_error(header: ResponseHeader) -> RpcError {
    match header.error_code {
        RemoteErrorCode::VersionMismatch => RpcError::VersionMismatch {
            server_runtime_version: header.arg0,
            server_archive_version: header.arg1,
        },
        code => RpcError::Remote {
            code,
            message: header.message,
        },
    }
}

/// Checks the answer to a control request.
pub(crate) fn control_result(header: &ResponseHeader) -> Result<(), RpcError> {
    ControlResponse::decode(&header.out_of_band_data)?.into_result()?;
    Ok(())
}

/// Lowers the configured versions to what the server supports.
pub(crate) fn downgrade_versions(
    config: &mut StubConfig,
    server_runtime_version: u32,
    server_archive_version: u32,
) -> Result<(), RpcError> {
    let runtime_version = config.runtime_version.min(server_runtime_version);
    if runtime_version < MIN_RUNTIME_VERSION {
        return Err(RpcError::UnsupportedRuntimeVersion {
            version: runtime_version,
            minimum: MIN_RUNTIME_VERSION,
        });
    }
    config.runtime_version = runtime_version;
    if server_archive_version != 0 {
        config.archive_version = config.archive_version.min(server_archive_version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::copy_buffers;
    use crate::filter::{FilterId, FilterRegistry};
    use crate::framing::{MessageFilterCache, encode_error, encode_response};

    fn frame(buffers: Vec<ByteBuffer>) -> ByteBuffer {
        ByteBuffer::from(copy_buffers(&buffers))
    }

    #[test]
    fn test_downgrade() {
        let mut config = StubConfig::default().with_archive_version(5);
        downgrade_versions(&mut config, 8, 0).unwrap();
        assert_eq!(config.runtime_version, 8);
        assert_eq!(config.archive_version, 5);

        downgrade_versions(&mut config, 10, 3).unwrap();
        assert_eq!(config.runtime_version, 8);
        assert_eq!(config.archive_version, 3);

        assert!(matches!(
            downgrade_versions(&mut config, 1, 0),
            Err(RpcError::UnsupportedRuntimeVersion { version: 1, minimum: 2 })
        ));
        assert_eq!(config.runtime_version, 8);
    }

    #[test]
    fn test_ping_back_deadline() {
        let mut monitor = PingBackMonitor::new(Duration::ZERO);
        assert!(monitor.deadline().is_none());
        assert!(monitor.check().is_ok());

        monitor = PingBackMonitor::new(Duration::from_millis(100));
        let first = monitor.deadline().unwrap();
        monitor.record(Instant::now() + Duration::from_millis(50));
        assert!(monitor.deadline().unwrap() > first);

        let expired = PingBackMonitor::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(expired.check(), Err(RpcError::PingBackTimeout { .. })));
    }

    #[test]
    fn test_call_through_message_filters() {
        let registry = FilterRegistry::with_defaults();
        let mut filters = registry.create_chain(&[FilterId::Xor]).unwrap();
        let config = StubConfig::default();
        let request = encode_call(
            &config,
            "Echo",
            7,
            false,
            b"token",
            vec![ByteBuffer::from("args")],
            &mut filters,
        )
        .unwrap();

        let mut cache = MessageFilterCache::new(registry);
        let (message, ids) = cache.decode(frame(request)).unwrap();
        assert_eq!(ids, vec![FilterId::Xor]);
        match decode_envelope(message).unwrap() {
            Envelope::Request(header, payload) => {
                assert_eq!(header.target, "Echo");
                assert_eq!(header.method_id, 7);
                assert_eq!(header.user_data, b"token");
                assert_eq!(header.runtime_version, config.runtime_version);
                assert_eq!(payload.as_slice(), b"args");
            }
            other => panic!("unexpected {other:?}"),
        }

        let response = cache
            .encode(
                encode_response(&ResponseHeader::ok(), vec![ByteBuffer::from("result")]).unwrap(),
                &ids,
            )
            .unwrap();
        match decode_reply(frame(response), &mut filters).unwrap() {
            Reply::Response(_, payload) => assert_eq!(payload.as_slice(), b"result"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_replies() {
        let mut filters = FilterChain::new();
        let mismatch = encode_response(&ResponseHeader::version_mismatch(9, 2), Vec::new()).unwrap();
        assert!(matches!(
            decode_reply(frame(mismatch), &mut filters),
            Err(RpcError::VersionMismatch {
                server_runtime_version: 9,
                server_archive_version: 2
            })
        ));

        let ping = encode_response(&ResponseHeader::ping_back(500), Vec::new()).unwrap();
        assert!(matches!(decode_reply(frame(ping), &mut filters), Ok(Reply::PingBack)));

        let mut xor = FilterRegistry::with_defaults().create_chain(&[FilterId::Xor]).unwrap();
        let error = encode_error(&ResponseHeader::error(RemoteErrorCode::DecodingError, "bad")).unwrap();
        assert!(matches!(
            decode_reply(frame(error), &mut xor),
            Err(RpcError::Remote {
                code: RemoteErrorCode::DecodingError,
                ..
            })
        ));
    }

    #[test]
    fn test_control_result() {
        let accepted = ResponseHeader {
            out_of_band_data: ControlResponse::accepted().encode().unwrap(),
            ..ResponseHeader::ok()
        };
        assert!(control_result(&accepted).is_ok());

        let rejected = ResponseHeader {
            out_of_band_data: br#"{"error_code":4,"message":"unknown filter ntlm"}"#.to_vec(),
            ..ResponseHeader::ok()
        };
        assert!(matches!(
            control_result(&rejected),
            Err(RpcError::Negotiation(_))
        ));
    }
}
