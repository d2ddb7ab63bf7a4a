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

//! Server-side HTTP session tracking.
//!
//! HTTP gives a server no connection identity: a load balancer may send
//! consecutive requests of one client over different connections. The
//! client numbers its requests, and [`HttpSessionFilter`] checks each
//! request against the [`HttpSessionRegistry`] entry for its
//! `X-RCFSessionId`, so a lost or reordered request fails loudly instead of
//! being processed out of order.

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::{ByteBuffer, copy_buffers, total_length};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "observability")]
use tracing::debug;

#[derive(Debug)]
struct HttpSessionEntry {
    index: u32,
    last_touch: Instant,
}

/// Shared table of live HTTP sessions, keyed by session id.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::HttpSessionRegistry;
///
/// let registry = HttpSessionRegistry::new();
/// registry.attach("s1", 1).unwrap();
/// registry.attach("s1", 2).unwrap();
/// assert!(registry.attach("s1", 4).is_err());
/// assert!(registry.attach("s2", 3).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpSessionRegistry {
    sessions: Arc<Mutex<HashMap<String, HttpSessionEntry>>>,
}

impl HttpSessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records request `index` of session `session_id`.
    ///
    /// Only index 1 may create a session. Every later request must carry the
    /// previous index plus one.
    pub fn attach(&self, session_id: &str, index: u32) -> Result<(), FilterError> {
        let mut sessions = self.sessions.lock();
        let entry = match sessions.get_mut(session_id) {
            Some(entry) => entry,
            None if index == 1 => sessions.entry(session_id.to_string()).or_insert(HttpSessionEntry {
                index: 0,
                last_touch: Instant::now(),
            }),
            None => {
                return Err(FilterError::InvalidHttpMessage {
                    reason: format!("unknown or expired HTTP session {session_id}"),
                });
            }
        };

        let expected = entry.index + 1;
        entry.index += 1;
        entry.last_touch = Instant::now();
        if index != expected {
            return Err(FilterError::HttpSessionIndexMismatch {
                expected,
                actual: index,
            });
        }
        Ok(())
    }

    /// Forgets a session.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Drops sessions idle for longer than `max_idle`, returning how many
    /// were dropped.
    pub fn harvest(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_touch.elapsed() < max_idle);
        before - sessions.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Binds HTTP requests to their logical session and defers responses.
///
/// Sits directly on the application side of a server
/// [`HttpFrameFilter`](super::HttpFrameFilter). Each response is buffered
/// and only written when the application asks for the next request, which
/// keeps exactly one response per request on the wire.
#[derive(Debug)]
pub struct HttpSessionFilter {
    registry: HttpSessionRegistry,
    attached: Option<String>,
    read_buffer: ByteBuffer,
    write_buffers: Vec<ByteBuffer>,
    flushing: bool,
    cached_bytes_requested: usize,
}

impl HttpSessionFilter {
    /// Creates a filter recording sessions in `registry`.
    pub fn new(registry: HttpSessionRegistry) -> Self {
        Self {
            registry,
            attached: None,
            read_buffer: ByteBuffer::new(),
            write_buffers: Vec::new(),
            flushing: false,
            cached_bytes_requested: 0,
        }
    }

    /// Session the current request belongs to.
    pub fn session_id(&self) -> Option<&str> {
        self.attached.as_deref()
    }

    fn deliver(&mut self, ctx: &mut FilterContext<'_>, bytes_requested: usize) {
        let n = self.read_buffer.len().min(bytes_requested);
        let out = self.read_buffer.slice(0, n);
        self.read_buffer = if n == self.read_buffer.len() {
            ByteBuffer::new()
        } else {
            self.read_buffer.slice_from(n)
        };
        ctx.complete_read(out);
    }
}

impl Filter for HttpSessionFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::Unknown
    }

    fn reset_state(&mut self) {
        self.attached = None;
        self.read_buffer.clear();
        self.write_buffers.clear();
        self.flushing = false;
        self.cached_bytes_requested = 0;
    }

    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError> {
        if self.attached.is_some() && !self.write_buffers.is_empty() {
            // The previous request is answered: flush the response and
            // detach before reading the next request.
            self.cached_bytes_requested = bytes_requested;
            self.attached = None;
            self.flushing = true;
            ctx.write_post(self.write_buffers.clone());
        } else if bytes_requested == 0 {
            ctx.read_post(buffer, 0);
        } else if self.attached.is_none() {
            // One byte is enough to make the frame filter parse the header.
            self.cached_bytes_requested = bytes_requested;
            ctx.read_post(ByteBuffer::new(), 1);
        } else if !self.read_buffer.is_empty() {
            self.deliver(ctx, bytes_requested);
        } else {
            ctx.read_post(buffer, bytes_requested);
        }
        Ok(())
    }

    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError> {
        let len = total_length(&buffers);
        if len == 0 {
            ctx.write_post(buffers);
            return Ok(());
        }
        self.write_buffers = vec![ByteBuffer::from(copy_buffers(&buffers))];
        ctx.complete_write(len);
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        if buffer.is_empty() || self.attached.is_some() {
            ctx.complete_read(buffer);
            return Ok(());
        }

        let info = ctx.state().http.clone().unwrap_or_default();
        self.registry.attach(&info.session_id, info.session_index)?;
        #[cfg(feature = "observability")]
        debug!(
            session_id = %info.session_id,
            session_index = info.session_index,
            "attached HTTP session"
        );

        self.attached = Some(info.session_id);
        self.read_buffer = buffer;
        let bytes_requested = std::mem::take(&mut self.cached_bytes_requested);
        self.deliver(ctx, bytes_requested);
        Ok(())
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        if !self.flushing {
            ctx.complete_write(bytes_transferred);
            return Ok(());
        }

        self.flushing = false;
        self.write_buffers.clear();

        let close = ctx
            .state()
            .http
            .as_ref()
            .is_some_and(|info| info.is_connection_close());
        if close {
            ctx.complete_read(ByteBuffer::new());
            Ok(())
        } else {
            let bytes_requested = std::mem::take(&mut self.cached_bytes_requested);
            self.read(ctx, ByteBuffer::new(), bytes_requested)
        }
    }
}
