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

//! Scripted wire used by filter unit tests.

use super::{ChainEvent, FilterChain, FilterError};
use crate::buffer::ByteBuffer;

/// In-memory stand-in for a socket: reads are served from `inbound`,
/// writes are appended to `outbound`.
#[derive(Debug, Default)]
pub(crate) struct Wire {
    pub(crate) inbound: Vec<u8>,
    pub(crate) outbound: Vec<u8>,
    /// Upper bound on bytes served per wire read.
    pub(crate) max_read: Option<usize>,
}

impl Wire {
    pub(crate) fn new(inbound: &[u8]) -> Self {
        Self {
            inbound: inbound.to_vec(),
            ..Self::default()
        }
    }

    pub(crate) fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    pub(crate) fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Serves wire requests until the application-side operation completes.
    pub(crate) fn pump(
        &mut self,
        chain: &mut FilterChain,
        mut event: Option<ChainEvent>,
    ) -> Result<ChainEvent, FilterError> {
        loop {
            match event {
                Some(ChainEvent::WireRead {
                    bytes_requested, ..
                }) => {
                    if self.inbound.is_empty() {
                        return Err(FilterError::Stalled {
                            operation: "test wire read",
                        });
                    }
                    let n = bytes_requested
                        .min(self.inbound.len())
                        .min(self.max_read.unwrap_or(usize::MAX));
                    let piece: Vec<u8> = self.inbound.drain(..n).collect();
                    event = chain.on_wire_read_completed(ByteBuffer::from(piece))?;
                }
                Some(ChainEvent::WireWrite { buffers }) => {
                    let n: usize = buffers.iter().map(|b| b.len()).sum();
                    for buffer in &buffers {
                        self.outbound.extend_from_slice(buffer);
                    }
                    event = chain.on_wire_write_completed(n)?;
                }
                Some(done) => return Ok(done),
                None => {
                    return Err(FilterError::Stalled {
                        operation: "test wire pump",
                    });
                }
            }
        }
    }

    pub(crate) fn read(
        &mut self,
        chain: &mut FilterChain,
        bytes_requested: usize,
    ) -> Result<ByteBuffer, FilterError> {
        let event = chain.read(ByteBuffer::new(), bytes_requested)?;
        match self.pump(chain, event)? {
            ChainEvent::ReadCompleted(buffer) => Ok(buffer),
            _ => Err(FilterError::Stalled {
                operation: "test read",
            }),
        }
    }

    /// Reads until exactly `len` bytes arrived.
    pub(crate) fn read_exact(
        &mut self,
        chain: &mut FilterChain,
        len: usize,
    ) -> Result<Vec<u8>, FilterError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let buffer = self.read(chain, len - out.len())?;
            if buffer.is_empty() {
                return Err(FilterError::Stalled {
                    operation: "test read_exact",
                });
            }
            out.extend_from_slice(&buffer);
        }
        Ok(out)
    }

    pub(crate) fn write(
        &mut self,
        chain: &mut FilterChain,
        buffers: Vec<ByteBuffer>,
    ) -> Result<usize, FilterError> {
        let event = chain.write(buffers)?;
        match self.pump(chain, event)? {
            ChainEvent::WriteCompleted(n) => Ok(n),
            _ => Err(FilterError::Stalled {
                operation: "test write",
            }),
        }
    }
}

/// Asserts that zero-length read and write requests complete at once,
/// without touching the wire.
pub(crate) fn assert_sentinels_complete(chain: &mut FilterChain) {
    match chain.read(ByteBuffer::new(), 0) {
        Ok(Some(ChainEvent::ReadCompleted(buffer))) => assert!(buffer.is_empty()),
        other => panic!("zero-length read gave {other:?}"),
    }
    match chain.write(Vec::new()) {
        Ok(Some(ChainEvent::WriteCompleted(0))) => {}
        other => panic!("zero-length write gave {other:?}"),
    }
}
