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

//! HTTP request/response framing.
//!
//! [`HttpFrameFilter`] wraps each outgoing frame in an HTTP message and
//! unwraps incoming ones, so RPC traffic can cross HTTP proxies and load
//! balancers:
//!
//! - The client role sends `POST / HTTP/1.1` requests carrying
//!   `X-RCFSessionId` and a monotonically increasing `X-RCFSessionIndex`,
//!   and checks that each response echoes them.
//! - The server role answers with `HTTP/1.1 200 OK` messages, optionally as
//!   a `Transfer-Encoding: chunked` stream, and publishes the session
//!   headers of each request in the chain state for the session filter.
//! - A server that cannot parse a request answers `400 Bad Request` with an
//!   `X-RCFError` header before failing, instead of leaving the client
//!   hanging.
//!
//! Headers are matched case-insensitively. A header that does not end
//! within 10 KB of unparsed input is a protocol error.

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::{BufferPool, ByteBuffer, slice_buffers, total_length};
use uuid::Uuid;

#[cfg(feature = "observability")]
use tracing::{trace, warn};

const CRLF: &[u8] = b"\r\n";
const CRLF_CRLF: &[u8] = b"\r\n\r\n";

/// Initial and incremental size of header reads.
const READ_CHUNK: usize = 1024;

/// Most unparsed bytes tolerated while waiting for a header.
const MAX_HEADER_SCAN: usize = 10 * 1024;

/// Session headers of the last HTTP message a frame filter parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessageInfo {
    /// Value of `X-RCFSessionId`, empty if absent.
    pub session_id: String,
    /// Value of `X-RCFSessionIndex`, 0 if absent.
    pub session_index: u32,
    /// Value of the `Connection` header, empty if absent.
    pub connection: String,
}

impl HttpMessageInfo {
    /// Returns `true` if the peer asked to close the connection.
    pub fn is_connection_close(&self) -> bool {
        self.connection.eq_ignore_ascii_case("close")
    }
}

/// Which side of the HTTP exchange a frame filter plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpRole {
    /// Sends requests to `host:port`.
    Client {
        /// Host named in the `Host` header
        host: String,
        /// Port named in the `Host` header
        port: u16,
    },
    /// Answers requests.
    Server,
}

/// Frames each message as one HTTP request or response.
#[derive(Debug)]
pub struct HttpFrameFilter {
    role: HttpRole,
    max_message_length: usize,

    // Read side. `read_buffer` holds the current frame and possibly the
    // start of the next one.
    read_buffer: Vec<u8>,
    read_capacity: usize,
    read_pos: usize,
    max_read_pos: usize,
    header_len: usize,
    content_len: usize,
    chunk_header_len: usize,
    frame_len: usize,
    orig_bytes_requested: usize,
    protocol_checked: bool,
    response_line: String,
    connection_header: String,
    chunked_read: bool,
    read_chunk_counter: u32,

    // Session headers: our own on the client, the peer's on the server.
    session_id: String,
    session_index: u32,

    // Write side.
    write_buffers: Vec<ByteBuffer>,
    write_pos: usize,
    write_overhead: usize,
    chunked_responses: bool,
    response_chunk_counter: u32,
    pending_error: Option<FilterError>,
}

impl HttpFrameFilter {
    fn new(role: HttpRole) -> Self {
        let mut filter = Self {
            role,
            max_message_length: 0,
            read_buffer: Vec::new(),
            read_capacity: 0,
            read_pos: 0,
            max_read_pos: 0,
            header_len: 0,
            content_len: 0,
            chunk_header_len: 0,
            frame_len: 0,
            orig_bytes_requested: 0,
            protocol_checked: false,
            response_line: String::new(),
            connection_header: String::new(),
            chunked_read: false,
            read_chunk_counter: 0,
            session_id: String::new(),
            session_index: 0,
            write_buffers: Vec::new(),
            write_pos: 0,
            write_overhead: 0,
            chunked_responses: false,
            response_chunk_counter: 0,
            pending_error: None,
        };
        filter.reset_state();
        filter
    }

    /// Creates a client-side filter sending requests to `host:port`.
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        Self::new(HttpRole::Client {
            host: host.into(),
            port,
        })
    }

    /// Creates a server-side filter.
    pub fn server() -> Self {
        Self::new(HttpRole::Server)
    }

    /// Overrides the chain's maximum message length for this filter.
    #[must_use]
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    /// Makes a server answer with a chunked response stream.
    #[must_use]
    pub fn with_chunked_responses(mut self, enabled: bool) -> Self {
        self.set_chunked_responses(enabled);
        self
    }

    /// Switches chunked responses on or off. The next response starts a new
    /// chunked message.
    pub fn set_chunked_responses(&mut self, enabled: bool) {
        self.chunked_responses = enabled;
        self.response_chunk_counter = 0;
    }

    /// The filter's role.
    pub fn role(&self) -> &HttpRole {
        &self.role
    }

    /// Session id sent (client) or last received (server).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session index sent (client) or last received (server).
    pub fn session_index(&self) -> u32 {
        self.session_index
    }

    /// `Connection` header of the last message received.
    pub fn connection_header(&self) -> &str {
        &self.connection_header
    }

    /// Declared body length of the last message received.
    pub fn frame_size(&self) -> usize {
        self.content_len
    }

    fn is_client(&self) -> bool {
        matches!(self.role, HttpRole::Client { .. })
    }

    fn max_length(&self, ctx: &FilterContext<'_>) -> usize {
        if self.max_message_length > 0 {
            self.max_message_length
        } else {
            ctx.max_message_length()
        }
    }

    fn reset_frame(&mut self) {
        self.read_pos = 0;
        self.max_read_pos = 0;
        self.header_len = 0;
        self.content_len = 0;
        self.chunk_header_len = 0;
        self.frame_len = 0;
        self.protocol_checked = false;
    }

    fn check_protocol(&mut self) -> Result<(), FilterError> {
        if self.protocol_checked || self.read_buffer.len() < 4 {
            return Ok(());
        }
        self.protocol_checked = true;

        let start = &self.read_buffer[..4];
        let reason = if self.is_client() {
            (start != b"HTTP").then_some("not an HTTP response")
        } else if start.starts_with(b"GET") {
            Some("HTTP GET is not supported, expected POST")
        } else {
            (start != b"POST").then_some("not an HTTP POST request")
        };

        match reason {
            Some(reason) => Err(FilterError::InvalidHttpMessage {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn try_parse_header(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        self.check_protocol()?;

        let Some(pos) = find(&self.read_buffer, CRLF_CRLF) else {
            return Ok(());
        };
        self.header_len = pos + CRLF_CRLF.len();

        let header = String::from_utf8_lossy(&self.read_buffer[..self.header_len]).into_owned();
        #[cfg(feature = "observability")]
        trace!(header_len = self.header_len, "received HTTP header");

        let mut lines = header.split("\r\n").filter(|line| !line.is_empty());
        let first_line = lines.next().unwrap_or_default();
        self.response_line = if first_line.starts_with("HTTP/") {
            first_line.to_string()
        } else {
            String::new()
        };

        let max = self.max_length(ctx);
        let mut received = HttpMessageInfo::default();
        self.connection_header.clear();

        for line in lines {
            let Some(colon) = line.find(':') else {
                continue;
            };
            let value = line[colon + 1..].trim_start();

            if istarts_with(line, "Content-Length") {
                self.content_len = parse_leading_decimal(value);
                self.frame_len = self.header_len + self.content_len;
                if max > 0 && self.frame_len > max {
                    return Err(FilterError::MessageTooLarge {
                        length: self.frame_len,
                        max,
                    });
                }
                self.max_read_pos = self.frame_len;
            } else if istarts_with(line, "X-RCFSessionIndex") {
                let index = parse_leading_decimal(value) as u32;
                if index != 0 {
                    received.session_index = index;
                }
            } else if istarts_with(line, "X-RCFSessionId") {
                received.session_id = value.to_string();
            } else if istarts_with(line, "Connection") {
                self.connection_header = value.to_string();
                received.connection = value.to_string();
            } else if istarts_with(line, "X-RCFError") {
                if self.is_client() {
                    return Err(FilterError::HttpTunnel {
                        message: value.to_string(),
                    });
                }
            } else if istarts_with(line, "Transfer-Encoding") && value.eq_ignore_ascii_case("chunked")
            {
                self.chunked_read = true;
                self.read_chunk_counter = 0;
            }
        }

        if !self.chunked_read && self.content_len == 0 {
            return Err(FilterError::InvalidHttpMessage {
                reason: if self.response_line.is_empty() {
                    "HTTP request without a Content-Length".to_string()
                } else {
                    format!("HTTP response without a Content-Length: {}", self.response_line)
                },
            });
        }

        if self.is_client() {
            if !self.session_id.is_empty()
                && !received.session_id.is_empty()
                && self.session_id != received.session_id
            {
                return Err(FilterError::HttpSessionIdMismatch {
                    expected: self.session_id.clone(),
                    actual: received.session_id,
                });
            }
            if self.session_index != 0
                && received.session_index != 0
                && self.session_index != received.session_index
            {
                return Err(FilterError::HttpSessionIndexMismatch {
                    expected: self.session_index,
                    actual: received.session_index,
                });
            }
        } else {
            self.session_id = received.session_id.clone();
            self.session_index = received.session_index;
            self.response_chunk_counter = 0;
            ctx.state().http = Some(received);
        }
        Ok(())
    }

    fn try_parse_chunk_header(&mut self, ctx: &FilterContext<'_>) -> Result<(), FilterError> {
        let body = &self.read_buffer[self.header_len..];
        let Some(pos) = find(body, CRLF) else {
            return Ok(());
        };

        let size_line = String::from_utf8_lossy(&body[..pos]);
        let chunk_len = parse_leading_hex(&size_line);
        if chunk_len == 0 {
            return Err(FilterError::InvalidHttpMessage {
                reason: "zero-length HTTP chunk".to_string(),
            });
        }

        self.chunk_header_len = pos + CRLF.len();
        self.frame_len = self.header_len + self.chunk_header_len + chunk_len + CRLF.len();

        let max = self.max_length(ctx);
        if max > 0 && self.frame_len > max {
            return Err(FilterError::MessageTooLarge {
                length: self.frame_len,
                max,
            });
        }

        self.max_read_pos = self.frame_len - CRLF.len();
        self.read_chunk_counter += 1;
        Ok(())
    }

    fn parse(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        if self.chunked_read && self.read_chunk_counter > 0 {
            self.try_parse_chunk_header(ctx)
        } else {
            self.try_parse_header(ctx)?;
            if self.chunked_read && self.header_len > 0 {
                self.try_parse_chunk_header(ctx)?;
            }
            Ok(())
        }
    }

    /// The whole frame is buffered: serve the pending application read.
    fn frame_complete(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        if self.is_client() && self.response_line.split_whitespace().nth(1) != Some("200") {
            return Err(FilterError::HttpResponseStatus {
                status_line: self.response_line.clone(),
            });
        }

        self.read_pos = self.header_len + self.chunk_header_len;
        let bytes_requested = std::mem::take(&mut self.orig_bytes_requested);
        self.read(ctx, ByteBuffer::new(), bytes_requested)
    }

    fn receive(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        if self.frame_len == 0 {
            self.parse(ctx)?;
        }

        if self.frame_len == 0 {
            if self.read_buffer.len() > MAX_HEADER_SCAN {
                return Err(FilterError::InvalidHttpMessage {
                    reason: format!(
                        "no HTTP header within {} bytes",
                        self.read_buffer.len()
                    ),
                });
            }
            if self.read_buffer.len() >= self.read_capacity {
                self.read_capacity = self.read_buffer.len() + READ_CHUNK;
            }
            ctx.read_post(ByteBuffer::new(), self.read_capacity - self.read_buffer.len());
            Ok(())
        } else if self.read_buffer.len() < self.frame_len {
            ctx.read_post(ByteBuffer::new(), self.frame_len - self.read_buffer.len());
            Ok(())
        } else {
            self.frame_complete(ctx)
        }
    }

    /// Client errors propagate. Server errors are reported to the peer with
    /// a 400 response first and surface once it has been written.
    fn on_error(&mut self, ctx: &mut FilterContext<'_>, error: FilterError) -> Result<(), FilterError> {
        if self.is_client() {
            return Err(error);
        }

        #[cfg(feature = "observability")]
        warn!(error = %error, "rejecting HTTP request with 400 Bad Request");

        let message = error.to_string().replace(['\r', '\n'], " ");
        let response = format!(
            "HTTP/1.1 400 Bad Request\r\n\
             X-RCFError: {message}\r\n\
             Content-Length: 0\r\n\
             \r\n"
        );
        let response = ByteBuffer::from(response);
        self.write_overhead = response.len();
        self.write_buffers = vec![response];
        self.write_pos = 0;
        self.pending_error = Some(error);
        ctx.write_post(self.write_buffers.clone());
        Ok(())
    }

    fn message_header(&mut self, message_length: usize) -> String {
        match &self.role {
            HttpRole::Client { host, port } => {
                self.session_index += 1;
                format!(
                    "POST / HTTP/1.1\r\n\
                     Host: {host}:{port}\r\n\
                     Accept: */*\r\n\
                     Connection: Keep-Alive\r\n\
                     X-RCFSessionId: {}\r\n\
                     X-RCFSessionIndex: {}\r\n\
                     Content-Length: {message_length}\r\n\
                     \r\n",
                    self.session_id, self.session_index
                )
            }
            HttpRole::Server if self.chunked_responses && self.response_chunk_counter == 0 => {
                format!(
                    "HTTP/1.1 200 OK\r\n\
                     X-RCFSessionId: {}\r\n\
                     X-RCFSessionIndex: {}\r\n\
                     Connection: Keep-Alive\r\n\
                     Transfer-Encoding: chunked\r\n\
                     \r\n\
                     {message_length:x}\r\n",
                    self.session_id, self.session_index
                )
            }
            HttpRole::Server if self.chunked_responses => format!("{message_length:x}\r\n"),
            HttpRole::Server => format!(
                "HTTP/1.1 200 OK\r\n\
                 X-RCFSessionId: {}\r\n\
                 X-RCFSessionIndex: {}\r\n\
                 Content-Length: {message_length}\r\n\
                 Connection: Keep-Alive\r\n\
                 \r\n",
                self.session_id, self.session_index
            ),
        }
    }
}

impl Filter for HttpFrameFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::Unknown
    }

    fn reset_state(&mut self) {
        self.read_buffer = Vec::new();
        self.read_capacity = 0;
        self.reset_frame();
        self.orig_bytes_requested = 0;
        self.response_line.clear();
        self.connection_header.clear();
        self.chunked_read = false;
        self.read_chunk_counter = 0;
        self.write_buffers.clear();
        self.write_pos = 0;
        self.write_overhead = 0;
        self.response_chunk_counter = 0;
        self.pending_error = None;

        if self.is_client() {
            self.session_id = Uuid::new_v4().to_string();
        } else {
            self.session_id.clear();
        }
        self.session_index = 0;
    }

    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        _buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError> {
        if bytes_requested == 0 {
            // Bytes past the current frame belong to the next message.
            if self.max_read_pos == self.read_pos && self.read_buffer.len() <= self.frame_len {
                self.read_buffer = Vec::new();
            }
            ctx.read_post(ByteBuffer::new(), 0);
            return Ok(());
        }

        let available = self.max_read_pos - self.read_pos;
        if available > 0 {
            let n = available.min(bytes_requested);
            let mut out = BufferPool::get(n);
            out.as_mut_slice()
                .copy_from_slice(&self.read_buffer[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            ctx.complete_read(out);
            return Ok(());
        }

        // Current frame used up. Keep whatever arrived beyond it.
        self.orig_bytes_requested = bytes_requested;
        if self.read_buffer.len() > self.frame_len {
            self.read_buffer.drain(..self.frame_len);
        } else {
            self.read_buffer.clear();
        }
        self.reset_frame();

        if self.read_buffer.is_empty() {
            self.read_capacity = READ_CHUNK;
            ctx.read_post(ByteBuffer::new(), READ_CHUNK);
            Ok(())
        } else {
            let leftover = ByteBuffer::from(std::mem::take(&mut self.read_buffer));
            self.on_read_completed(ctx, leftover)
        }
    }

    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError> {
        self.orig_bytes_requested = 0;
        self.write_pos = 0;

        let message_length = total_length(&buffers);
        if message_length == 0 {
            self.write_buffers.clear();
            self.write_overhead = 0;
            ctx.write_post(Vec::new());
            return Ok(());
        }

        if self.is_client() {
            // A new request; the response decides its own encoding.
            self.chunked_read = false;
            self.read_chunk_counter = 0;
        }

        let header = ByteBuffer::from(self.message_header(message_length));
        self.write_overhead = header.len();
        self.write_buffers = Vec::with_capacity(buffers.len() + 2);
        self.write_buffers.push(header);
        self.write_buffers.extend(buffers);

        if !self.is_client() && self.chunked_responses {
            self.write_buffers.push(ByteBuffer::from(CRLF));
            self.write_overhead += CRLF.len();
            self.response_chunk_counter += 1;
        }

        #[cfg(feature = "observability")]
        trace!(
            session_index = self.session_index,
            bytes = message_length,
            "sending HTTP message"
        );

        ctx.write_post(self.write_buffers.clone());
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        if buffer.is_empty() {
            ctx.complete_read(buffer);
            return Ok(());
        }

        self.read_buffer.extend_from_slice(&buffer);
        match self.receive(ctx) {
            Ok(()) => Ok(()),
            Err(error) => self.on_error(ctx, error),
        }
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        self.write_pos += bytes_transferred;
        if self.write_pos < total_length(&self.write_buffers) {
            ctx.write_post(slice_buffers(&self.write_buffers, self.write_pos, None));
            return Ok(());
        }

        let bytes_written = self.write_pos.saturating_sub(self.write_overhead);
        self.write_buffers.clear();
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        ctx.complete_write(bytes_written);
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn istarts_with(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Parses leading decimal digits, ignoring anything after them.
fn parse_leading_decimal(value: &str) -> usize {
    value
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0usize, |acc, d| acc.saturating_mul(10).saturating_add(usize::from(d - b'0')))
}

/// Parses leading hex digits, ignoring chunk extensions.
fn parse_leading_hex(value: &str) -> usize {
    value
        .trim_start()
        .chars()
        .map_while(|c| c.to_digit(16))
        .fold(0usize, |acc, d| acc.saturating_mul(16).saturating_add(d as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use crate::filter::testing::{Wire, assert_sentinels_complete};

    fn client_chain() -> FilterChain {
        FilterChain::connect_filters(vec![Box::new(HttpFrameFilter::client("example.org", 80))])
    }

    fn server_chain() -> FilterChain {
        FilterChain::connect_filters(vec![Box::new(HttpFrameFilter::server())])
    }

    fn request(session_id: &str, index: u32, body: &str) -> Vec<u8> {
        format!(
            "POST / HTTP/1.1\r\nHost: a:1\r\nX-RCFSessionId: {session_id}\r\n\
             X-RCFSessionIndex: {index}\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    #[test]
    fn test_client_request_format() {
        let mut chain = client_chain();
        let mut wire = Wire::default();

        let consumed = wire.write(&mut chain, vec![ByteBuffer::from("hello")]).unwrap();
        assert_eq!(consumed, 5);

        let sent = String::from_utf8(wire.take_outbound()).unwrap();
        let mut lines = sent.split("\r\n");
        assert_eq!(lines.next(), Some("POST / HTTP/1.1"));
        assert_eq!(lines.next(), Some("Host: example.org:80"));
        assert_eq!(lines.next(), Some("Accept: */*"));
        assert_eq!(lines.next(), Some("Connection: Keep-Alive"));
        let session = lines.next().unwrap();
        assert!(session.starts_with("X-RCFSessionId: "));
        assert_eq!(session.len(), "X-RCFSessionId: ".len() + 36);
        assert_eq!(lines.next(), Some("X-RCFSessionIndex: 1"));
        assert_eq!(lines.next(), Some("Content-Length: 5"));
        assert!(sent.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_server_reads_body_and_publishes_session() {
        let mut chain = server_chain();
        let mut wire = Wire::new(&request("abc", 1, "hello"));

        let body = wire.read_exact(&mut chain, 5).unwrap();
        assert_eq!(body, b"hello");

        let info = chain.state().http.clone().unwrap();
        assert_eq!(info.session_id, "abc");
        assert_eq!(info.session_index, 1);
    }

    #[test]
    fn test_server_response_format() {
        let mut chain = server_chain();
        let mut wire = Wire::new(&request("abc", 7, "x"));
        wire.read_exact(&mut chain, 1).unwrap();

        assert_eq!(wire.write(&mut chain, vec![ByteBuffer::from("ok")]).unwrap(), 2);
        let sent = String::from_utf8(wire.take_outbound()).unwrap();
        assert_eq!(
            sent,
            "HTTP/1.1 200 OK\r\nX-RCFSessionId: abc\r\nX-RCFSessionIndex: 7\r\n\
             Content-Length: 2\r\nConnection: Keep-Alive\r\n\r\nok"
        );
    }

    #[test]
    fn test_header_split_across_reads() {
        let mut chain = server_chain();
        let mut wire = Wire::new(&request("s", 1, "payload"));
        wire.max_read = Some(3);
        assert_eq!(wire.read_exact(&mut chain, 7).unwrap(), b"payload");
    }

    #[test]
    fn test_leftover_bytes_start_next_frame() {
        let mut chain = server_chain();
        let mut input = request("s", 1, "first");
        input.extend(request("s", 2, "second"));
        let mut wire = Wire::new(&input);

        assert_eq!(wire.read_exact(&mut chain, 5).unwrap(), b"first");
        assert_eq!(wire.read_exact(&mut chain, 6).unwrap(), b"second");
        assert_eq!(chain.state().http.as_ref().unwrap().session_index, 2);
        assert!(wire.inbound.is_empty());
    }

    #[test]
    fn test_client_rejects_non_200() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 2\r\n\r\nno");
        let result = wire.read(&mut chain, 2);
        assert!(matches!(result, Err(FilterError::HttpResponseStatus { .. })));
    }

    #[test]
    fn test_client_reads_status_code_token() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 404 Not Found 200\r\nContent-Length: 2\r\n\r\nno");
        match wire.read(&mut chain, 2) {
            Err(FilterError::HttpResponseStatus { status_line }) => {
                assert_eq!(status_line, "HTTP/1.1 404 Not Found 200");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_zero_length_sentinel() {
        assert_sentinels_complete(&mut client_chain());

        let mut chain = server_chain();
        assert_sentinels_complete(&mut chain);
        let mut wire = Wire::new(&request("abc", 1, "hello"));
        assert_eq!(wire.read_exact(&mut chain, 2).unwrap(), b"he");
        assert_sentinels_complete(&mut chain);
        assert_eq!(wire.read_exact(&mut chain, 3).unwrap(), b"llo");
    }

    #[test]
    fn test_zero_length_read_keeps_buffered_input() {
        let mut chain = server_chain();
        let mut input = request("s", 1, "first");
        input.extend(request("s", 2, "second"));
        let mut wire = Wire::new(&input);

        assert_eq!(wire.read_exact(&mut chain, 5).unwrap(), b"first");
        assert!(wire.inbound.is_empty());
        assert_sentinels_complete(&mut chain);
        assert_eq!(wire.read_exact(&mut chain, 6).unwrap(), b"second");
    }

    #[test]
    fn test_client_detects_session_index_mismatch() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 200 OK\r\nX-RCFSessionIndex: 4\r\nContent-Length: 1\r\n\r\ny");
        let result = wire.read(&mut chain, 1);
        assert!(matches!(
            result,
            Err(FilterError::HttpSessionIndexMismatch {
                expected: 1,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_client_surfaces_tunnel_error() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 400 Bad Request\r\nX-RCFError: boom\r\nContent-Length: 0\r\n\r\n");
        match wire.read(&mut chain, 1) {
            Err(FilterError::HttpTunnel { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_zero_content_length_rejected() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let result = wire.read(&mut chain, 1);
        assert!(matches!(result, Err(FilterError::InvalidHttpMessage { .. })));
    }

    #[test]
    fn test_header_scan_is_capped() {
        let mut chain = client_chain();
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        let mut garbage = b"HTTP/1.1 200 OK\r\n".to_vec();
        garbage.extend(std::iter::repeat(b'a').take(MAX_HEADER_SCAN + 2048));
        wire.push_inbound(&garbage);
        let result = wire.read(&mut chain, 1);
        assert!(matches!(result, Err(FilterError::InvalidHttpMessage { .. })));
    }

    #[test]
    fn test_server_answers_get_with_400() {
        let mut chain = server_chain();
        let mut wire = Wire::new(b"GET / HTTP/1.1\r\n\r\n");

        let result = wire.read(&mut chain, 4);
        assert!(matches!(result, Err(FilterError::InvalidHttpMessage { .. })));

        let sent = String::from_utf8(wire.take_outbound()).unwrap();
        assert!(sent.starts_with("HTTP/1.1 400 Bad Request\r\nX-RCFError: "));
        assert!(sent.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn test_message_too_large() {
        let mut chain = FilterChain::connect_filters(vec![Box::new(
            HttpFrameFilter::client("h", 1).with_max_message_length(64),
        )]);
        let mut wire = Wire::default();
        wire.write(&mut chain, vec![ByteBuffer::from("x")]).unwrap();

        wire.push_inbound(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
        let result = wire.read(&mut chain, 1);
        assert!(matches!(result, Err(FilterError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_chunked_response_stream() {
        let mut server = FilterChain::connect_filters(vec![Box::new(
            HttpFrameFilter::server().with_chunked_responses(true),
        )]);
        let mut client = client_chain();
        let mut to_server = Wire::default();

        to_server.write(&mut client, vec![ByteBuffer::from("req")]).unwrap();
        let request = to_server.take_outbound();

        let mut server_wire = Wire::new(&request);
        assert_eq!(server_wire.read_exact(&mut server, 3).unwrap(), b"req");
        assert_eq!(server_wire.write(&mut server, vec![ByteBuffer::from("part one")]).unwrap(), 8);
        assert_eq!(server_wire.write(&mut server, vec![ByteBuffer::from("part two!")]).unwrap(), 9);
        let response = server_wire.take_outbound();

        let text = String::from_utf8(response.clone()).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n\r\n8\r\npart one\r\n"));
        assert!(text.ends_with("9\r\npart two!\r\n"));

        let mut client_wire = Wire::new(&response);
        assert_eq!(client_wire.read_exact(&mut client, 8).unwrap(), b"part one");
        assert_eq!(client_wire.read_exact(&mut client, 9).unwrap(), b"part two!");
    }

    #[test]
    fn test_reset_state_regenerates_session_id() {
        let mut filter = HttpFrameFilter::client("h", 1);
        let first = filter.session_id().to_string();
        filter.reset_state();
        assert_ne!(filter.session_id(), first);
        assert_eq!(filter.session_index(), 0);
    }

    #[test]
    fn test_header_helpers() {
        assert!(istarts_with("content-length: 5", "Content-Length"));
        assert!(!istarts_with("Content", "Content-Length"));
        assert_eq!(parse_leading_decimal("42abc"), 42);
        assert_eq!(parse_leading_decimal("x"), 0);
        assert_eq!(parse_leading_hex("1aF;ext=1"), 0x1AF);
        assert_eq!(find(b"ab\r\n\r\ncd", CRLF_CRLF), Some(2));
    }
}
