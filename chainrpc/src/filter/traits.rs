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

//! The duplex filter contract.

use super::chain::{ChainState, Links, Step};
use super::{FilterError, FilterId};
use crate::buffer::ByteBuffer;
use std::collections::VecDeque;

/// One stage of the byte pipeline between the application and the wire.
///
/// A filter never returns transformed bytes from [`read`](Filter::read) or
/// [`write`](Filter::write). It forwards a request to its wire-side neighbor
/// through the [`FilterContext`] and is later told about the result through
/// [`on_read_completed`](Filter::on_read_completed) or
/// [`on_write_completed`](Filter::on_write_completed). The chain drives
/// these calls from a work queue, so a filter cannot tell whether its
/// neighbor is another filter, an in-memory driver, or a socket.
///
/// A zero-length read or write is a sentinel meaning "release pooled
/// buffers". Filters must drop their scratch buffers and pass the sentinel
/// on, never treat it as data.
///
/// # Completion rules
///
/// - Every `read` eventually produces exactly one `complete_read`, and every
///   `write` exactly one `complete_write`, unless an error is returned.
/// - The count passed to `complete_write` is measured in the caller's bytes,
///   not in the bytes that reached the wire.
/// - The buffer passed to `complete_read` is authoritative. Callers must not
///   assume the data landed in the buffer they passed to `read`.
pub trait Filter: Send {
    /// Stable id of this filter type.
    fn filter_id(&self) -> FilterId;

    /// Reinitializes the filter for a new logical connection.
    fn reset_state(&mut self);

    /// The application side wants up to `bytes_requested` bytes. `buffer` is
    /// an optional target; an empty buffer lets the filter supply storage.
    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError>;

    /// The application side wants `buffers` sent.
    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError>;

    /// The wire side finished a read this filter issued.
    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError>;

    /// The wire side finished a write this filter issued, consuming
    /// `bytes_transferred` of the buffers handed to it.
    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError>;
}

/// Handle a filter uses to reach its neighbors.
///
/// Each call queues a step. Nothing runs until the filter method returns,
/// which keeps the call stack flat however many filters are chained.
pub struct FilterContext<'a> {
    pub(crate) steps: &'a mut VecDeque<Step>,
    pub(crate) links: Links,
    pub(crate) state: &'a mut ChainState,
    pub(crate) max_message_length: usize,
}

impl FilterContext<'_> {
    /// Asks the wire-side neighbor for up to `bytes_requested` bytes.
    pub fn read_post(&mut self, buffer: ByteBuffer, bytes_requested: usize) {
        self.steps.push_back(Step::Read {
            target: self.links.post,
            buffer,
            bytes_requested,
        });
    }

    /// Hands `buffers` to the wire-side neighbor.
    pub fn write_post(&mut self, buffers: Vec<ByteBuffer>) {
        self.steps.push_back(Step::Write {
            target: self.links.post,
            buffers,
        });
    }

    /// Completes the application side's pending read with `buffer`.
    pub fn complete_read(&mut self, buffer: ByteBuffer) {
        self.steps.push_back(Step::ReadCompleted {
            target: self.links.pre,
            buffer,
        });
    }

    /// Completes the application side's pending write.
    pub fn complete_write(&mut self, bytes_transferred: usize) {
        self.steps.push_back(Step::WriteCompleted {
            target: self.links.pre,
            bytes_transferred,
        });
    }

    /// Largest message the owning connection accepts.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// State shared by every filter of the chain.
    pub fn state(&mut self) -> &mut ChainState {
        self.state
    }
}
