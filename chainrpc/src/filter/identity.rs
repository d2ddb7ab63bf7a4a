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

//! Pass-through and XOR filters.

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::ByteBuffer;

/// Forwards every request and completion unchanged.
#[derive(Debug, Default)]
pub struct IdentityFilter;

impl IdentityFilter {
    /// Creates an identity filter.
    pub fn new() -> Self {
        Self
    }
}

impl Filter for IdentityFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::Identity
    }

    fn reset_state(&mut self) {}

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
        ctx.write_post(buffers);
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        ctx.complete_read(buffer);
        Ok(())
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        ctx.complete_write(bytes_transferred);
        Ok(())
    }
}

/// XORs every byte with a fixed key. Only useful for tests.
#[derive(Debug, Clone)]
pub struct XorFilter {
    key: u8,
}

impl XorFilter {
    /// Key used by [`FilterRegistry::with_defaults`](super::FilterRegistry::with_defaults).
    pub const DEFAULT_KEY: u8 = b'U';

    /// Creates a filter XOR-ing with `key`.
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    fn apply(&self, buffer: &ByteBuffer) -> ByteBuffer {
        ByteBuffer::from_vec(buffer.iter().map(|b| b ^ self.key).collect())
    }
}

impl Filter for XorFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::Xor
    }

    fn reset_state(&mut self) {}

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
        let encoded = buffers.iter().map(|b| self.apply(b)).collect();
        ctx.write_post(encoded);
        Ok(())
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        ctx.complete_read(self.apply(&buffer));
        Ok(())
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        ctx.complete_write(bytes_transferred);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ChainEvent, FilterChain};

    #[test]
    fn test_xor_encodes_on_write_and_decodes_on_read() {
        let mut chain = FilterChain::connect_filters(vec![Box::new(XorFilter::new(0xFF))]);

        let event = chain.write(vec![ByteBuffer::from(vec![0x00, 0x0F])]).unwrap();
        let Some(ChainEvent::WireWrite { buffers }) = event else {
            panic!("expected wire write");
        };
        assert_eq!(buffers[0].as_slice(), &[0xFF, 0xF0]);
        chain.on_wire_write_completed(2).unwrap();

        chain.read(ByteBuffer::new(), 2).unwrap();
        let event = chain
            .on_wire_read_completed(ByteBuffer::from(vec![0xFF, 0xF0]))
            .unwrap();
        let Some(ChainEvent::ReadCompleted(buffer)) = event else {
            panic!("expected read completion");
        };
        assert_eq!(buffer.as_slice(), &[0x00, 0x0F]);
    }

    #[test]
    fn test_identity_reports_caller_bytes() {
        let mut chain = FilterChain::connect_filters(vec![Box::new(IdentityFilter::new())]);
        chain.write(vec![ByteBuffer::from("hello")]).unwrap();
        let event = chain.on_wire_write_completed(3).unwrap();
        assert!(matches!(event, Some(ChainEvent::WriteCompleted(3))));
    }
}
