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

//! zlib compression filters.
//!
//! Two flavors share one implementation:
//!
//! - **Stateless** resets the compressor for every write and finishes the
//!   zlib stream, so each message decompresses on its own. This is the
//!   flavor used for per-message filtering.
//! - **Stateful** keeps one compression stream for the life of the
//!   connection and sync-flushes after each write, which compresses repeated
//!   traffic much better but only works on a transport chain.

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::{BufferPool, ByteBuffer, slice_buffers, total_length};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

#[cfg(feature = "observability")]
use tracing::trace;

/// Most input bytes compressed per write (1 MB).
const BANDWIDTH_LIMIT: usize = 1024 * 1024;

/// Smallest wire read issued while decompressing.
const MIN_WIRE_READ: usize = 4096;

/// Whether the compression stream outlives a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZlibMode {
    /// Fresh stream per write.
    Stateless,
    /// One stream per connection.
    Stateful,
}

/// Deflates writes and inflates reads.
pub struct ZlibFilter {
    mode: ZlibMode,
    compressor: Compress,
    decompressor: Decompress,
    bytes_requested: usize,
    /// Compressed input not inflated yet.
    post_buffer: ByteBuffer,
    /// Compressed output not written yet.
    post_buffers: Vec<ByteBuffer>,
    total_bytes_in: usize,
}

impl ZlibFilter {
    /// Creates a filter in `mode`.
    pub fn new(mode: ZlibMode) -> Self {
        Self {
            mode,
            compressor: Compress::new(Compression::default(), true),
            decompressor: Decompress::new(true),
            bytes_requested: 0,
            post_buffer: ByteBuffer::new(),
            post_buffers: Vec::new(),
            total_bytes_in: 0,
        }
    }

    /// Creates a stateless filter.
    pub fn stateless() -> Self {
        Self::new(ZlibMode::Stateless)
    }

    /// Creates a stateful filter.
    pub fn stateful() -> Self {
        Self::new(ZlibMode::Stateful)
    }

    /// The filter's mode.
    pub fn mode(&self) -> ZlibMode {
        self.mode
    }

    fn compress(&mut self, input: &[ByteBuffer]) -> Result<ByteBuffer, FilterError> {
        let mut out = BufferPool::get(2 * (total_length(input) + 7 + 7) + 64);
        let mut out_pos = 0;
        let start_in = self.compressor.total_in();

        for (i, buffer) in input.iter().enumerate() {
            let flush = if i + 1 < input.len() {
                FlushCompress::None
            } else {
                FlushCompress::Sync
            };
            let before_out = self.compressor.total_out();
            self.compressor
                .compress(buffer, &mut out.as_mut_slice()[out_pos..], flush)
                .map_err(|e| FilterError::Compression {
                    reason: format!("deflate failed: {e}"),
                })?;
            out_pos += (self.compressor.total_out() - before_out) as usize;
        }

        if self.mode == ZlibMode::Stateless {
            let before_out = self.compressor.total_out();
            let status = self
                .compressor
                .compress(&[], &mut out.as_mut_slice()[out_pos..], FlushCompress::Finish)
                .map_err(|e| FilterError::Compression {
                    reason: format!("deflate finish failed: {e}"),
                })?;
            if status != Status::StreamEnd {
                return Err(FilterError::Compression {
                    reason: "deflate did not finish the stream".to_string(),
                });
            }
            out_pos += (self.compressor.total_out() - before_out) as usize;
        }

        self.total_bytes_in = (self.compressor.total_in() - start_in) as usize;
        out.resize(out_pos);
        Ok(out)
    }

    /// Inflates from `post_buffer` into a buffer of at most
    /// `bytes_requested` bytes.
    fn decompress(&mut self) -> Result<ByteBuffer, FilterError> {
        let mut out = BufferPool::get(self.bytes_requested);
        let before_in = self.decompressor.total_in();
        let before_out = self.decompressor.total_out();

        let status = self
            .decompressor
            .decompress(&self.post_buffer, out.as_mut_slice(), FlushDecompress::Sync)
            .map_err(|e| FilterError::Compression {
                reason: format!("inflate failed: {e}"),
            })?;

        let consumed = (self.decompressor.total_in() - before_in) as usize;
        let produced = (self.decompressor.total_out() - before_out) as usize;

        if status == Status::StreamEnd {
            self.decompressor.reset(true);
        }
        if consumed == 0 && produced == 0 && !self.post_buffer.is_empty() {
            return Err(FilterError::Compression {
                reason: "inflate made no progress".to_string(),
            });
        }

        self.post_buffer = if consumed >= self.post_buffer.len() {
            ByteBuffer::new()
        } else {
            self.post_buffer.slice_from(consumed)
        };
        out.resize(produced);
        Ok(out)
    }
}

impl Filter for ZlibFilter {
    fn filter_id(&self) -> FilterId {
        match self.mode {
            ZlibMode::Stateless => FilterId::ZlibStateless,
            ZlibMode::Stateful => FilterId::ZlibStateful,
        }
    }

    fn reset_state(&mut self) {
        self.compressor.reset();
        self.decompressor.reset(true);
        self.bytes_requested = 0;
        self.post_buffer.clear();
        self.post_buffers.clear();
        self.total_bytes_in = 0;
    }

    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        _buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError> {
        if bytes_requested == 0 {
            if self.post_buffer.is_empty() {
                self.bytes_requested = 0;
                ctx.read_post(ByteBuffer::new(), 0);
            } else {
                ctx.complete_read(ByteBuffer::new());
            }
            return Ok(());
        }

        self.bytes_requested = bytes_requested.min(BANDWIDTH_LIMIT);
        if self.post_buffer.is_empty() {
            ctx.read_post(ByteBuffer::new(), self.bytes_requested.max(MIN_WIRE_READ));
            Ok(())
        } else {
            let pending = self.post_buffer.release();
            self.on_read_completed(ctx, pending)
        }
    }

    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError> {
        if total_length(&buffers) == 0 {
            self.total_bytes_in = 0;
            self.post_buffers.clear();
            ctx.write_post(Vec::new());
            return Ok(());
        }

        if self.mode == ZlibMode::Stateless {
            self.compressor.reset();
        }

        let input = slice_buffers(&buffers, 0, Some(BANDWIDTH_LIMIT));
        let compressed = self.compress(&input)?;
        #[cfg(feature = "observability")]
        trace!(
            bytes_in = self.total_bytes_in,
            bytes_out = compressed.len(),
            "zlib compressed"
        );
        self.post_buffers = vec![compressed];
        ctx.write_post(self.post_buffers.clone());
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        if self.bytes_requested == 0 {
            ctx.complete_read(ByteBuffer::new());
            return Ok(());
        }

        self.post_buffer = buffer;
        let inflated = self.decompress()?;
        if inflated.is_empty() {
            // Nothing came out yet, so ask for more compressed input.
            self.read(ctx, ByteBuffer::new(), self.bytes_requested)
        } else {
            ctx.complete_read(inflated);
            Ok(())
        }
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        if bytes_transferred < total_length(&self.post_buffers) {
            self.post_buffers = slice_buffers(&self.post_buffers, bytes_transferred, None);
            ctx.write_post(self.post_buffers.clone());
        } else {
            self.post_buffers.clear();
            ctx.complete_write(self.total_bytes_in);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ZlibFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibFilter")
            .field("mode", &self.mode)
            .field("pending_input", &self.post_buffer.len())
            .finish()
    }
}
