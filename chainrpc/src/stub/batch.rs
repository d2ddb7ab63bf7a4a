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

//! Oneway call batching.

use crate::buffer::{ByteBuffer, total_length};
use crate::framing::{FramingError, encode_length_prefix};

/// Accumulates length-prefixed oneway messages until they are flushed as
/// one write.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    enabled: bool,
    buffer: Vec<u8>,
    max_length: usize,
    batches_sent: u32,
    message_count: u32,
}

impl Batch {
    pub(crate) fn new(max_length: usize) -> Self {
        Self {
            max_length,
            ..Self::default()
        }
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
        self.buffer.clear();
        self.batches_sent = 0;
        self.message_count = 0;
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
        self.buffer.clear();
        self.message_count = 0;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn max_length(&self) -> usize {
        self.max_length
    }

    pub(crate) fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    pub(crate) fn batches_sent(&self) -> u32 {
        self.batches_sent
    }

    pub(crate) fn message_count(&self) -> u32 {
        self.message_count
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Adds the length prefix to `message` and returns its size on the wire.
    pub(crate) fn frame(message: &mut Vec<ByteBuffer>) -> Result<usize, FramingError> {
        encode_length_prefix(message)?;
        Ok(total_length(message))
    }

    /// Returns `true` if appending `append_len` more bytes would overflow
    /// the limit. An empty batch never needs a flush.
    pub(crate) fn needs_flush(&self, append_len: usize) -> bool {
        self.max_length > 0
            && !self.buffer.is_empty()
            && self.buffer.len() + append_len > self.max_length
    }

    /// Appends an already framed message.
    pub(crate) fn append(&mut self, framed: &[ByteBuffer]) {
        for buffer in framed {
            self.buffer.extend_from_slice(buffer);
        }
        self.message_count += 1;
    }

    /// The pending bytes, or `None` when there is nothing to flush.
    pub(crate) fn pending(&self) -> Option<ByteBuffer> {
        (!self.buffer.is_empty()).then(|| ByteBuffer::from(self.buffer.as_slice()))
    }

    /// Records a successful flush.
    pub(crate) fn flushed(&mut self) {
        self.buffer.clear();
        self.batches_sent += 1;
        self.message_count = 0;
    }
}
