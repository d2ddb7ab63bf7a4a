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

//! HTTP proxy tunnelling with `CONNECT`.

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::ByteBuffer;

#[cfg(feature = "observability")]
use tracing::debug;

/// Largest proxy reply accepted.
const REPLY_BUFFER_SIZE: usize = 1024;

/// Opens a tunnel through an HTTP proxy before the first write, then gets
/// out of the way.
///
/// The filter sits next to the wire. Its first write is held back while it
/// sends `CONNECT host:port` to the proxy and waits for a `200` reply; after
/// that, every request and completion passes straight through.
#[derive(Debug)]
pub struct HttpConnectFilter {
    target: String,
    pass_through: bool,
    request: ByteBuffer,
    write_pos: usize,
    reply: Vec<u8>,
    held_writes: Vec<ByteBuffer>,
}

impl HttpConnectFilter {
    /// Creates a filter tunnelling to `host:port`.
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            target: format!("{}:{port}", host.as_ref()),
            pass_through: false,
            request: ByteBuffer::new(),
            write_pos: 0,
            reply: Vec::new(),
            held_writes: Vec::new(),
        }
    }

    /// Returns `true` once the proxy accepted the tunnel.
    pub fn is_established(&self) -> bool {
        self.pass_through
    }

    /// A `CONNECT` exchange is under way: the first write is held back.
    fn tunnelling(&self) -> bool {
        !self.pass_through && !self.held_writes.is_empty()
    }

    fn on_reply(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        let Some(end) = self.reply.windows(4).position(|w| w == b"\r\n\r\n") else {
            if self.reply.len() >= REPLY_BUFFER_SIZE {
                return Err(FilterError::HttpConnectFailed {
                    reply: "invalid HTTP CONNECT response".to_string(),
                });
            }
            ctx.read_post(ByteBuffer::new(), REPLY_BUFFER_SIZE - self.reply.len());
            return Ok(());
        };

        let reply = String::from_utf8_lossy(&self.reply[..end]);
        let first_line = reply.split("\r\n").next().unwrap_or_default().to_string();
        let mut parts = first_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        let status = parts.next().unwrap_or_default();

        let is_http = version.len() >= 5 && version[..5].eq_ignore_ascii_case("HTTP/");
        if !is_http || !status.starts_with("200") {
            return Err(FilterError::HttpConnectFailed { reply: first_line });
        }

        #[cfg(feature = "observability")]
        debug!(target = %self.target, "HTTP proxy tunnel established");

        self.pass_through = true;
        self.reply.clear();
        ctx.write_post(std::mem::take(&mut self.held_writes));
        Ok(())
    }
}

impl Filter for HttpConnectFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::Unknown
    }

    fn reset_state(&mut self) {
        self.pass_through = false;
        self.request = ByteBuffer::new();
        self.write_pos = 0;
        self.reply.clear();
        self.held_writes.clear();
    }

    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError> {
        ctx.read_post(buffer, bytes_requested);
        Ok(())
    }

    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError> {
        if self.pass_through || crate::buffer::total_length(&buffers) == 0 {
            ctx.write_post(buffers);
            return Ok(());
        }

        self.held_writes = buffers;
        self.request = ByteBuffer::from(format!(
            "CONNECT {target} HTTP/1.1\r\n\
             Host: {target}\r\n\
             Proxy-Connection: Keep-Alive\r\n\
             \r\n",
            target = self.target
        ));
        self.write_pos = 0;
        ctx.write_post(vec![self.request.clone()]);
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        if !self.tunnelling() || buffer.is_empty() {
            ctx.complete_read(buffer);
            return Ok(());
        }
        self.reply.extend_from_slice(&buffer);
        self.on_reply(ctx)
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        if !self.tunnelling() {
            ctx.complete_write(bytes_transferred);
            return Ok(());
        }

        self.write_pos += bytes_transferred;
        if self.write_pos < self.request.len() {
            ctx.write_post(vec![self.request.slice_from(self.write_pos)]);
        } else {
            self.reply.clear();
            ctx.read_post(ByteBuffer::new(), REPLY_BUFFER_SIZE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use crate::filter::testing::{Wire, assert_sentinels_complete};

    fn chain() -> FilterChain {
        FilterChain::connect_filters(vec![Box::new(HttpConnectFilter::new("backend", 8080))])
    }

    #[test]
    fn test_tunnel_then_pass_through() {
        let mut chain = chain();
        let mut wire = Wire::new(b"HTTP/1.1 200 Connection established\r\n\r\n");

        let written = wire.write(&mut chain, vec![ByteBuffer::from("payload")]).unwrap();
        assert_eq!(written, 7);

        let sent = String::from_utf8(wire.take_outbound()).unwrap();
        assert_eq!(
            sent,
            "CONNECT backend:8080 HTTP/1.1\r\nHost: backend:8080\r\n\
             Proxy-Connection: Keep-Alive\r\n\r\npayload"
        );

        wire.write(&mut chain, vec![ByteBuffer::from("more")]).unwrap();
        assert_eq!(wire.take_outbound(), b"more");
    }

    #[test]
    fn test_proxy_refusal() {
        let mut chain = chain();
        let mut wire = Wire::new(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n");

        match wire.write(&mut chain, vec![ByteBuffer::from("x")]) {
            Err(FilterError::HttpConnectFailed { reply }) => {
                assert_eq!(reply, "HTTP/1.1 407 Proxy Authentication Required");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_oversized_reply() {
        let mut chain = chain();
        let mut wire = Wire::new(&[b'x'; 2048]);
        let result = wire.write(&mut chain, vec![ByteBuffer::from("x")]);
        assert!(matches!(result, Err(FilterError::HttpConnectFailed { .. })));
    }

    #[test]
    fn test_zero_length_sentinel_before_and_after_tunnel() {
        let mut chain = chain();
        assert_sentinels_complete(&mut chain);

        let mut wire = Wire::new(b"HTTP/1.1 200 Connection established\r\n\r\n");
        assert_eq!(wire.write(&mut chain, vec![ByteBuffer::from("payload")]).unwrap(), 7);
        assert!(wire.take_outbound().ends_with(b"payload"));
        assert_sentinels_complete(&mut chain);

        wire.write(&mut chain, vec![ByteBuffer::from("more")]).unwrap();
        assert_eq!(wire.take_outbound(), b"more");
    }
}
