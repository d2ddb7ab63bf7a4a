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

//! One-shot drivers that push a whole in-memory message through a chain.
//!
//! Live connections run a chain against a socket. Message encoding instead
//! runs it against memory: [`filter_data`] captures what the chain would put
//! on the wire, and [`unfilter_data`] feeds captured bytes back in until the
//! original message comes out.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::buffer::{ByteBuffer, copy_buffers, total_length};
//! use chainrpc::filter::{filter_data, unfilter_data, FilterChain, XorFilter};
//!
//! let mut encoder = FilterChain::connect_filters(vec![Box::new(XorFilter::new(7))]);
//! let mut decoder = FilterChain::connect_filters(vec![Box::new(XorFilter::new(7))]);
//!
//! let encoded = filter_data(&[ByteBuffer::from("hello")], &mut encoder).unwrap();
//! let wire = ByteBuffer::from(copy_buffers(&encoded));
//! let decoded = unfilter_data(wire, 5, &mut decoder).unwrap();
//! assert_eq!(copy_buffers(&decoded), b"hello");
//! assert_eq!(total_length(&decoded), 5);
//! ```

use super::{ChainEvent, FilterChain, FilterError};
use crate::buffer::{ByteBuffer, slice_buffers, total_length};

#[cfg(feature = "observability")]
use tracing::{instrument, trace};

/// Runs `input` through `chain` and returns everything the chain wrote.
///
/// The chain is driven until it reports all of `input` consumed. A filter
/// may consume only part of what it is handed per write, so the remaining
/// slice is offered again until nothing is left.
#[cfg_attr(feature = "observability", instrument(skip_all, fields(bytes = total_length(input))))]
pub fn filter_data(
    input: &[ByteBuffer],
    chain: &mut FilterChain,
) -> Result<Vec<ByteBuffer>, FilterError> {
    let expected = total_length(input);
    let mut captured = Vec::new();
    let mut consumed = 0;

    while consumed < expected {
        let mut event = chain.write(slice_buffers(input, consumed, None))?;
        let written = loop {
            match event {
                Some(ChainEvent::WireWrite { buffers }) => {
                    let n = total_length(&buffers);
                    captured.extend(buffers);
                    event = chain.on_wire_write_completed(n)?;
                }
                Some(ChainEvent::WriteCompleted(n)) => break n,
                Some(ChainEvent::WireRead { .. }) | Some(ChainEvent::ReadCompleted(_)) | None => {
                    return Err(FilterError::Stalled {
                        operation: "filter_data",
                    });
                }
            }
        };

        if written == 0 {
            return Err(FilterError::Stalled {
                operation: "filter_data",
            });
        }
        consumed += written;
        #[cfg(feature = "observability")]
        trace!(consumed, expected, "filter_data progress");
    }

    if consumed != expected {
        return Err(FilterError::ShortTransfer {
            expected,
            actual: consumed,
        });
    }
    Ok(captured)
}

/// Feeds `input` to `chain` as if it came off the wire and collects
/// `expected_length` bytes of output.
///
/// The chain pulls input piecemeal, never more than it asks for. Running out
/// of input before `expected_length` bytes come out is a
/// [`FilterError::ShortTransfer`].
#[cfg_attr(feature = "observability", instrument(skip_all, fields(bytes = input.len(), expected_length = expected_length)))]
pub fn unfilter_data(
    input: ByteBuffer,
    expected_length: usize,
    chain: &mut FilterChain,
) -> Result<Vec<ByteBuffer>, FilterError> {
    let mut source = input;
    let mut output = Vec::new();
    let mut produced = 0;

    while produced < expected_length {
        let mut event = chain.read(ByteBuffer::new(), expected_length - produced)?;
        let buffer = loop {
            match event {
                Some(ChainEvent::WireRead {
                    bytes_requested, ..
                }) => {
                    if source.is_empty() {
                        return Err(FilterError::ShortTransfer {
                            expected: expected_length,
                            actual: produced,
                        });
                    }
                    let n = bytes_requested.min(source.len());
                    let piece = source.slice(0, n);
                    source = source.slice_from(n);
                    event = chain.on_wire_read_completed(piece)?;
                }
                Some(ChainEvent::ReadCompleted(buffer)) => break buffer,
                Some(ChainEvent::WireWrite { .. }) | Some(ChainEvent::WriteCompleted(_)) | None => {
                    return Err(FilterError::Stalled {
                        operation: "unfilter_data",
                    });
                }
            }
        };

        if buffer.is_empty() {
            return Err(FilterError::Stalled {
                operation: "unfilter_data",
            });
        }
        produced += buffer.len();
        output.push(buffer);
    }

    if produced != expected_length {
        return Err(FilterError::ShortTransfer {
            expected: expected_length,
            actual: produced,
        });
    }
    Ok(output)
}
