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

//! Request and response envelopes.
//!
//! Every frame starts with a one-byte [`MessageDescriptor`]. Requests and
//! responses carry a small binary header in front of the opaque payload
//! produced by the serialization layer. All integers are little-endian.
//!
//! ```text
//! Request:  descriptor(1) version(1) runtime(4) archive(4) flags(1)
//!           ping_back_ms(4) target(2 + n) method(4) user_data(4 + n)
//!           out_of_band(4 + n) payload...
//! Response: descriptor(2) version(1) kind(1) error_code(4) arg0(4) arg1(4)
//!           message(4 + n) user_data(4 + n) out_of_band(4 + n) payload...
//! Error:    descriptor(0) followed by the response fields, no payload
//! ```

use super::{FramingError, LENGTH_PREFIX_SIZE};
use crate::buffer::ByteBuffer;

/// Layout version of the request and response headers.
pub const ENVELOPE_VERSION: u8 = 1;

const FLAG_ONEWAY: u8 = 0x01;
const FLAG_OUT_OF_BAND: u8 = 0x02;

/// First byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageDescriptor {
    /// The server could not process a request.
    Error = 0,
    /// A call request.
    Request = 1,
    /// A call response or a ping-back marker.
    Response = 2,
    /// A message run through message filters.
    FilteredPayload = 3,
}

impl MessageDescriptor {
    /// Reads a descriptor byte.
    pub fn from_u8(value: u8) -> Result<Self, FramingError> {
        match value {
            0 => Ok(MessageDescriptor::Error),
            1 => Ok(MessageDescriptor::Request),
            2 => Ok(MessageDescriptor::Response),
            3 => Ok(MessageDescriptor::FilteredPayload),
            other => Err(FramingError::decoding(format!(
                "unknown message descriptor {other}"
            ))),
        }
    }
}

/// Error codes a server reports to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// No error.
    None,
    /// The request used a newer runtime or archive version than the
    /// server supports. `arg0`/`arg1` carry the server's versions.
    VersionMismatch,
    /// Liveness marker sent while a call runs. `arg0` carries the interval
    /// in milliseconds.
    PingBack,
    /// No handler is bound to the requested target.
    UnknownTarget,
    /// A negotiation request named a filter the server cannot build.
    UnknownFilter,
    /// A negotiation request named a filter sequence the server refuses.
    UnsupportedTransportProtocol,
    /// The server's transport filters may not be changed.
    FiltersLocked,
    /// The request could not be decoded.
    DecodingError,
    /// The request's message filters did not match.
    PayloadFilterMismatch,
    /// The handler failed; see the response message.
    Application,
    /// Any code this build does not know.
    Other(u32),
}

impl From<u32> for RemoteErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => RemoteErrorCode::None,
            1 => RemoteErrorCode::VersionMismatch,
            2 => RemoteErrorCode::PingBack,
            3 => RemoteErrorCode::UnknownTarget,
            4 => RemoteErrorCode::UnknownFilter,
            5 => RemoteErrorCode::UnsupportedTransportProtocol,
            6 => RemoteErrorCode::FiltersLocked,
            7 => RemoteErrorCode::DecodingError,
            8 => RemoteErrorCode::PayloadFilterMismatch,
            9 => RemoteErrorCode::Application,
            other => RemoteErrorCode::Other(other),
        }
    }
}

impl From<RemoteErrorCode> for u32 {
    fn from(code: RemoteErrorCode) -> Self {
        match code {
            RemoteErrorCode::None => 0,
            RemoteErrorCode::VersionMismatch => 1,
            RemoteErrorCode::PingBack => 2,
            RemoteErrorCode::UnknownTarget => 3,
            RemoteErrorCode::UnknownFilter => 4,
            RemoteErrorCode::UnsupportedTransportProtocol => 5,
            RemoteErrorCode::FiltersLocked => 6,
            RemoteErrorCode::DecodingError => 7,
            RemoteErrorCode::PayloadFilterMismatch => 8,
            RemoteErrorCode::Application => 9,
            RemoteErrorCode::Other(other) => other,
        }
    }
}

/// Header of a call request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    /// Runtime version the client speaks.
    pub runtime_version: u32,
    /// Archive (serialization) version the client speaks.
    pub archive_version: u32,
    /// No response is expected.
    pub oneway: bool,
    /// Control request handled by the runtime instead of a handler.
    pub out_of_band: bool,
    /// Ping-back interval the client asks for, 0 for none.
    pub ping_back_interval_ms: u32,
    /// Name of the server object.
    pub target: String,
    /// Method index on the target.
    pub method_id: u32,
    /// Opaque bytes passed to the handler.
    pub user_data: Vec<u8>,
    /// Control request body when `out_of_band` is set.
    pub out_of_band_data: Vec<u8>,
}

impl RequestHeader {
    /// Creates a twoway request header for `target` and `method_id`.
    pub fn new(target: impl Into<String>, method_id: u32) -> Self {
        Self {
            target: target.into(),
            method_id,
            ..Self::default()
        }
    }

    /// Encodes the header.
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        let mut out = Vec::with_capacity(32 + self.target.len() + self.user_data.len());
        out.push(MessageDescriptor::Request as u8);
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.runtime_version.to_le_bytes());
        out.extend_from_slice(&self.archive_version.to_le_bytes());
        let mut flags = 0;
        if self.oneway {
            flags |= FLAG_ONEWAY;
        }
        if self.out_of_band {
            flags |= FLAG_OUT_OF_BAND;
        }
        out.push(flags);
        out.extend_from_slice(&self.ping_back_interval_ms.to_le_bytes());
        let target_len = u16::try_from(self.target.len())
            .map_err(|_| FramingError::decoding("target name longer than 65535 bytes"))?;
        out.extend_from_slice(&target_len.to_le_bytes());
        out.extend_from_slice(self.target.as_bytes());
        out.extend_from_slice(&self.method_id.to_le_bytes());
        put_bytes(&mut out, &self.user_data)?;
        put_bytes(&mut out, &self.out_of_band_data)?;
        Ok(out)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, FramingError> {
        let runtime_version = reader.u32()?;
        let archive_version = reader.u32()?;
        let flags = reader.u8()?;
        let ping_back_interval_ms = reader.u32()?;
        let target_len = reader.u16()? as usize;
        let target = String::from_utf8(reader.take(target_len)?.to_vec())
            .map_err(|_| FramingError::decoding("target name is not UTF-8"))?;
        Ok(Self {
            runtime_version,
            archive_version,
            oneway: flags & FLAG_ONEWAY != 0,
            out_of_band: flags & FLAG_OUT_OF_BAND != 0,
            ping_back_interval_ms,
            target,
            method_id: reader.u32()?,
            user_data: reader.bytes()?,
            out_of_band_data: reader.bytes()?,
        })
    }
}

/// Outcome reported by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    /// The call succeeded; the payload holds the result.
    #[default]
    Ok,
    /// The runtime rejected the call; see the error code.
    Error,
    /// The handler failed; see the message.
    Exception,
}

impl ResponseKind {
    fn from_u8(value: u8) -> Result<Self, FramingError> {
        match value {
            0 => Ok(ResponseKind::Ok),
            1 => Ok(ResponseKind::Error),
            2 => Ok(ResponseKind::Exception),
            other => Err(FramingError::decoding(format!("unknown response kind {other}"))),
        }
    }
}

/// Header of a call response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Outcome of the call.
    pub kind: ResponseKind,
    /// Error code when `kind` is not `Ok`.
    pub error_code: RemoteErrorCode,
    /// First error argument.
    pub arg0: u32,
    /// Second error argument.
    pub arg1: u32,
    /// Error or exception text.
    pub message: String,
    /// Opaque bytes returned by the handler.
    pub user_data: Vec<u8>,
    /// Control response body.
    pub out_of_band_data: Vec<u8>,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            kind: ResponseKind::Ok,
            error_code: RemoteErrorCode::None,
            arg0: 0,
            arg1: 0,
            message: String::new(),
            user_data: Vec::new(),
            out_of_band_data: Vec::new(),
        }
    }
}

impl ResponseHeader {
    /// A successful response header.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A runtime error response.
    pub fn error(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            error_code: code,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A handler failure response.
    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Exception,
            error_code: RemoteErrorCode::Application,
            message: message.into(),
            ..Self::default()
        }
    }

    /// The answer to a request with unsupported versions.
    pub fn version_mismatch(runtime_version: u32, archive_version: u32) -> Self {
        Self {
            arg0: runtime_version,
            arg1: archive_version,
            ..Self::error(RemoteErrorCode::VersionMismatch, "version mismatch")
        }
    }

    /// A liveness marker for a call with the given ping-back interval.
    pub fn ping_back(interval_ms: u32) -> Self {
        Self {
            arg0: interval_ms,
            ..Self::error(RemoteErrorCode::PingBack, "")
        }
    }

    /// Returns `true` for liveness markers.
    pub fn is_ping_back(&self) -> bool {
        self.kind == ResponseKind::Error && self.error_code == RemoteErrorCode::PingBack
    }

    /// Encodes the header with `descriptor` (Response or Error).
    pub fn encode(&self, descriptor: MessageDescriptor) -> Result<Vec<u8>, FramingError> {
        let mut out = Vec::with_capacity(32 + self.message.len() + self.user_data.len());
        out.push(descriptor as u8);
        out.push(ENVELOPE_VERSION);
        out.push(match self.kind {
            ResponseKind::Ok => 0,
            ResponseKind::Error => 1,
            ResponseKind::Exception => 2,
        });
        out.extend_from_slice(&u32::from(self.error_code).to_le_bytes());
        out.extend_from_slice(&self.arg0.to_le_bytes());
        out.extend_from_slice(&self.arg1.to_le_bytes());
        put_bytes(&mut out, self.message.as_bytes())?;
        put_bytes(&mut out, &self.user_data)?;
        put_bytes(&mut out, &self.out_of_band_data)?;
        Ok(out)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, FramingError> {
        let kind = ResponseKind::from_u8(reader.u8()?)?;
        let error_code = RemoteErrorCode::from(reader.u32()?);
        let arg0 = reader.u32()?;
        let arg1 = reader.u32()?;
        let message = String::from_utf8(reader.bytes()?)
            .map_err(|_| FramingError::decoding("response message is not UTF-8"))?;
        Ok(Self {
            kind,
            error_code,
            arg0,
            arg1,
            message,
            user_data: reader.bytes()?,
            out_of_band_data: reader.bytes()?,
        })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A call request and its payload.
    Request(RequestHeader, ByteBuffer),
    /// A call response and its payload.
    Response(ResponseHeader, ByteBuffer),
    /// The server could not process a request.
    Error(ResponseHeader),
}

/// Puts an encoded header in front of `payload`. The header buffer keeps
/// room for a length prefix in its left margin.
pub fn with_header(header: &[u8], payload: Vec<ByteBuffer>) -> Vec<ByteBuffer> {
    let mut buffers = Vec::with_capacity(payload.len() + 1);
    buffers.push(ByteBuffer::with_left_margin(LENGTH_PREFIX_SIZE, header));
    buffers.extend(payload.into_iter().filter(|b| !b.is_empty()));
    buffers
}

/// Encodes a request frame body.
pub fn encode_request(
    header: &RequestHeader,
    payload: Vec<ByteBuffer>,
) -> Result<Vec<ByteBuffer>, FramingError> {
    Ok(with_header(&header.encode()?, payload))
}

/// Encodes a response frame body.
pub fn encode_response(
    header: &ResponseHeader,
    payload: Vec<ByteBuffer>,
) -> Result<Vec<ByteBuffer>, FramingError> {
    Ok(with_header(&header.encode(MessageDescriptor::Response)?, payload))
}

/// Encodes an error frame body.
pub fn encode_error(header: &ResponseHeader) -> Result<Vec<ByteBuffer>, FramingError> {
    Ok(with_header(&header.encode(MessageDescriptor::Error)?, Vec::new()))
}

/// Decodes an unfiltered frame body.
///
/// # Examples
///
/// ```rust
/// use chainrpc::buffer::{ByteBuffer, copy_buffers};
/// use chainrpc::framing::{decode_envelope, encode_request, Envelope, RequestHeader};
///
/// let header = RequestHeader::new("Calculator", 3);
/// let frame = encode_request(&header, vec![ByteBuffer::from("args")]).unwrap();
///
/// match decode_envelope(ByteBuffer::from(copy_buffers(&frame))).unwrap() {
///     Envelope::Request(decoded, payload) => {
///         assert_eq!(decoded, header);
///         assert_eq!(payload.as_slice(), b"args");
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn decode_envelope(frame: ByteBuffer) -> Result<Envelope, FramingError> {
    let mut reader = Reader::new(&frame);
    let descriptor = MessageDescriptor::from_u8(reader.u8()?)?;
    if descriptor == MessageDescriptor::FilteredPayload {
        return Err(FramingError::decoding("filtered payload was not unfiltered"));
    }
    let version = reader.u8()?;
    if version != ENVELOPE_VERSION {
        return Err(FramingError::UnsupportedHeaderVersion { version });
    }

    match descriptor {
        MessageDescriptor::Request => {
            let header = RequestHeader::decode(&mut reader)?;
            let offset = reader.position();
            Ok(Envelope::Request(header, frame.slice_from(offset)))
        }
        MessageDescriptor::Response => {
            let header = ResponseHeader::decode(&mut reader)?;
            let offset = reader.position();
            Ok(Envelope::Response(header, frame.slice_from(offset)))
        }
        _ => Ok(Envelope::Error(ResponseHeader::decode(&mut reader)?)),
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), FramingError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| FramingError::decoding("field longer than 4 GB"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        let end = self
            .position
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| FramingError::decoding("truncated message header"))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FramingError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FramingError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, FramingError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
