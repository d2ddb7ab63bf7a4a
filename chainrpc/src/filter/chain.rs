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

//! Filter chains and the trampoline that drives them.
//!
//! A [`FilterChain`] owns its filters and the links between them. Filters
//! only know their neighbors as [`Links`] handles resolved by the chain, so
//! replacing the chain during renegotiation can never leave a dangling
//! neighbor reference.
//!
//! Completions and forwarded requests are queued rather than called
//! recursively. One call into the chain runs the queue until the request
//! either needs the wire or completes back to the application, and reports
//! that as a [`ChainEvent`].

use super::http_frame::HttpMessageInfo;
use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::{ByteBuffer, total_length};
use std::collections::VecDeque;
use std::fmt;

#[cfg(feature = "observability")]
use tracing::trace;

/// Default maximum message length for a chain (10 MB).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10 * 1024 * 1024;

/// Position in a chain that a step is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Node {
    App,
    Filter(usize),
    Wire,
}

/// A filter's two neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub(crate) pre: Node,
    pub(crate) post: Node,
}

/// One queued unit of work.
pub(crate) enum Step {
    Read {
        target: Node,
        buffer: ByteBuffer,
        bytes_requested: usize,
    },
    Write {
        target: Node,
        buffers: Vec<ByteBuffer>,
    },
    ReadCompleted {
        target: Node,
        buffer: ByteBuffer,
    },
    WriteCompleted {
        target: Node,
        bytes_transferred: usize,
    },
}

/// What the chain needs from its driver after a call.
#[derive(Debug)]
pub enum ChainEvent {
    /// Read up to `bytes_requested` bytes from the wire and report them with
    /// [`FilterChain::on_wire_read_completed`].
    WireRead {
        /// Storage offered by the last filter; may be empty
        buffer: ByteBuffer,
        /// Maximum number of bytes wanted
        bytes_requested: usize,
    },
    /// Write `buffers` to the wire and report the count with
    /// [`FilterChain::on_wire_write_completed`].
    WireWrite {
        /// Bytes to put on the wire, in order
        buffers: Vec<ByteBuffer>,
    },
    /// The application's read finished.
    ReadCompleted(ByteBuffer),
    /// The application's write finished, consuming this many bytes.
    WriteCompleted(usize),
}

/// State visible to every filter of a chain.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    /// Headers of the last HTTP message parsed by an HTTP frame filter.
    pub http: Option<HttpMessageInfo>,
}

/// An ordered sequence of filters between the application and the wire.
///
/// # Examples
///
/// ```rust
/// use chainrpc::buffer::ByteBuffer;
/// use chainrpc::filter::{ChainEvent, FilterChain, IdentityFilter};
///
/// let mut chain = FilterChain::connect_filters(vec![Box::new(IdentityFilter::new())]);
/// let event = chain.write(vec![ByteBuffer::from("ping")]).unwrap();
/// let Some(ChainEvent::WireWrite { buffers }) = event else { panic!() };
/// assert_eq!(buffers[0].as_slice(), b"ping");
///
/// let done = chain.on_wire_write_completed(4).unwrap();
/// assert!(matches!(done, Some(ChainEvent::WriteCompleted(4))));
/// ```
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    links: Vec<Links>,
    head: Node,
    tail: Node,
    steps: VecDeque<Step>,
    state: ChainState,
    max_message_length: usize,
}

impl FilterChain {
    /// Creates an empty chain: the application talks to the wire directly.
    pub fn new() -> Self {
        Self::connect_filters(Vec::new())
    }

    /// Links `filters` in order, the first nearest the application.
    ///
    /// A chain of N filters gets N-1 internal links. The first filter's
    /// `pre` is the application and the last filter's `post` is the wire.
    pub fn connect_filters(filters: Vec<Box<dyn Filter>>) -> Self {
        let count = filters.len();
        let links = (0..count)
            .map(|i| Links {
                pre: if i == 0 { Node::App } else { Node::Filter(i - 1) },
                post: if i + 1 == count {
                    Node::Wire
                } else {
                    Node::Filter(i + 1)
                },
            })
            .collect();

        Self {
            filters,
            links,
            head: if count == 0 { Node::Wire } else { Node::Filter(0) },
            tail: if count == 0 { Node::App } else { Node::Filter(count - 1) },
            steps: VecDeque::new(),
            state: ChainState::default(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    /// Sets the maximum message length filters enforce.
    #[must_use]
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    /// Maximum message length filters enforce.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if the chain has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Ids of the filters, application side first.
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.filters.iter().map(|f| f.filter_id()).collect()
    }

    /// State shared by the filters.
    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Resets every filter and the shared state.
    pub fn reset_state(&mut self) {
        self.steps.clear();
        self.state = ChainState::default();
        for filter in &mut self.filters {
            filter.reset_state();
        }
    }

    /// Takes the filters back out of the chain.
    pub fn into_filters(self) -> Vec<Box<dyn Filter>> {
        self.filters
    }

    /// Starts an application read of up to `bytes_requested` bytes.
    pub fn read(
        &mut self,
        buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<Option<ChainEvent>, FilterError> {
        self.run(Step::Read {
            target: self.head,
            buffer,
            bytes_requested,
        })
    }

    /// Starts an application write of `buffers`.
    pub fn write(&mut self, buffers: Vec<ByteBuffer>) -> Result<Option<ChainEvent>, FilterError> {
        self.run(Step::Write {
            target: self.head,
            buffers,
        })
    }

    /// Reports bytes read from the wire for the last [`ChainEvent::WireRead`].
    pub fn on_wire_read_completed(
        &mut self,
        buffer: ByteBuffer,
    ) -> Result<Option<ChainEvent>, FilterError> {
        self.run(Step::ReadCompleted {
            target: self.tail,
            buffer,
        })
    }

    /// Reports bytes written for the last [`ChainEvent::WireWrite`].
    pub fn on_wire_write_completed(
        &mut self,
        bytes_transferred: usize,
    ) -> Result<Option<ChainEvent>, FilterError> {
        self.run(Step::WriteCompleted {
            target: self.tail,
            bytes_transferred,
        })
    }

    fn run(&mut self, first: Step) -> Result<Option<ChainEvent>, FilterError> {
        self.steps.clear();
        self.steps.push_back(first);

        let mut event = None;
        while let Some(step) = self.steps.pop_front() {
            match self.dispatch(step) {
                Ok(None) => {}
                Ok(Some(next)) if event.is_none() => event = Some(next),
                Ok(Some(_)) => {
                    self.steps.clear();
                    return Err(FilterError::ConcurrentOperation);
                }
                Err(e) => {
                    self.steps.clear();
                    return Err(e);
                }
            }
        }
        Ok(event)
    }

    fn dispatch(&mut self, step: Step) -> Result<Option<ChainEvent>, FilterError> {
        let Self {
            filters,
            links,
            steps,
            state,
            tail,
            max_message_length,
            ..
        } = self;

        let max_message_length = *max_message_length;

        match step {
            Step::Read {
                target: Node::Filter(i),
                buffer,
                bytes_requested,
            } => {
                let mut ctx = context(steps, state, links[i], max_message_length);
                filters[i].read(&mut ctx, buffer, bytes_requested)?;
            }
            Step::Write {
                target: Node::Filter(i),
                buffers,
            } => {
                let mut ctx = context(steps, state, links[i], max_message_length);
                filters[i].write(&mut ctx, buffers)?;
            }
            Step::ReadCompleted {
                target: Node::Filter(i),
                buffer,
            } => {
                let mut ctx = context(steps, state, links[i], max_message_length);
                filters[i].on_read_completed(&mut ctx, buffer)?;
            }
            Step::WriteCompleted {
                target: Node::Filter(i),
                bytes_transferred,
            } => {
                let mut ctx = context(steps, state, links[i], max_message_length);
                filters[i].on_write_completed(&mut ctx, bytes_transferred)?;
            }

            // A zero-length request is a release sentinel and never reaches
            // the driver.
            Step::Read {
                target: Node::Wire,
                bytes_requested: 0,
                ..
            } => steps.push_back(Step::ReadCompleted {
                target: *tail,
                buffer: ByteBuffer::new(),
            }),
            Step::Read {
                target: Node::Wire,
                buffer,
                bytes_requested,
            } => {
                #[cfg(feature = "observability")]
                trace!(bytes = bytes_requested, "filter chain wire read");
                return Ok(Some(ChainEvent::WireRead {
                    buffer,
                    bytes_requested,
                }));
            }
            Step::Write {
                target: Node::Wire,
                buffers,
            } => {
                let bytes = total_length(&buffers);
                if bytes == 0 {
                    steps.push_back(Step::WriteCompleted {
                        target: *tail,
                        bytes_transferred: 0,
                    });
                } else {
                    #[cfg(feature = "observability")]
                    trace!(bytes, "filter chain wire write");
                    return Ok(Some(ChainEvent::WireWrite { buffers }));
                }
            }

            Step::ReadCompleted {
                target: Node::App,
                buffer,
            } => return Ok(Some(ChainEvent::ReadCompleted(buffer))),
            Step::WriteCompleted {
                target: Node::App,
                bytes_transferred,
            } => return Ok(Some(ChainEvent::WriteCompleted(bytes_transferred))),

            // Links never point a request at the application or a completion
            // at the wire.
            Step::Read { target: Node::App, .. }
            | Step::Write { target: Node::App, .. }
            | Step::ReadCompleted { target: Node::Wire, .. }
            | Step::WriteCompleted { target: Node::Wire, .. } => {
                unreachable!("misrouted filter chain step")
            }
        }
        Ok(None)
    }
}

fn context<'a>(
    steps: &'a mut VecDeque<Step>,
    state: &'a mut ChainState,
    links: Links,
    max_message_length: usize,
) -> FilterContext<'a> {
    FilterContext {
        steps,
        links,
        state,
        max_message_length,
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filter_ids())
            .field("max_message_length", &self.max_message_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{IdentityFilter, XorFilter};

    fn identity_chain(n: usize) -> FilterChain {
        FilterChain::connect_filters(
            (0..n)
                .map(|_| Box::new(IdentityFilter::new()) as Box<dyn Filter>)
                .collect(),
        )
    }

    #[test]
    fn test_links_are_n_minus_one() {
        let chain = identity_chain(3);
        assert_eq!(chain.links[0].pre, Node::App);
        assert_eq!(chain.links[0].post, Node::Filter(1));
        assert_eq!(chain.links[1].post, Node::Filter(2));
        assert_eq!(chain.links[2].post, Node::Wire);

        let internal = chain
            .links
            .iter()
            .filter(|l| matches!(l.post, Node::Filter(_)))
            .count();
        assert_eq!(internal, 2);
    }

    #[test]
    fn test_empty_chain_talks_to_wire() {
        let mut chain = FilterChain::new();
        let event = chain.write(vec![ByteBuffer::from("abc")]).unwrap();
        assert!(matches!(event, Some(ChainEvent::WireWrite { .. })));
        let event = chain.on_wire_write_completed(3).unwrap();
        assert!(matches!(event, Some(ChainEvent::WriteCompleted(3))));

        let event = chain.read(ByteBuffer::new(), 10).unwrap();
        assert!(matches!(
            event,
            Some(ChainEvent::WireRead {
                bytes_requested: 10,
                ..
            })
        ));
        let event = chain.on_wire_read_completed(ByteBuffer::from("xy")).unwrap();
        match event {
            Some(ChainEvent::ReadCompleted(buffer)) => assert_eq!(buffer.as_slice(), b"xy"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_zero_length_requests_never_reach_wire() {
        let mut chain = FilterChain::connect_filters(vec![
            Box::new(IdentityFilter::new()),
            Box::new(XorFilter::new(0x5A)),
        ]);

        let event = chain.read(ByteBuffer::new(), 0).unwrap();
        match event {
            Some(ChainEvent::ReadCompleted(buffer)) => assert!(buffer.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }

        let event = chain.write(Vec::new()).unwrap();
        assert!(matches!(event, Some(ChainEvent::WriteCompleted(0))));
    }

    #[test]
    fn test_filter_ids_in_order() {
        let chain = FilterChain::connect_filters(vec![
            Box::new(XorFilter::new(1)),
            Box::new(IdentityFilter::new()),
        ]);
        assert_eq!(chain.filter_ids(), vec![FilterId::Xor, FilterId::Identity]);
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
    }

    struct DoubleWriter;

    impl Filter for DoubleWriter {
        fn filter_id(&self) -> FilterId {
            FilterId::Other(200)
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
            ctx.write_post(buffers.clone());
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

    #[test]
    fn test_concurrent_wire_operations_rejected() {
        let mut chain = FilterChain::connect_filters(vec![Box::new(DoubleWriter)]);
        let result = chain.write(vec![ByteBuffer::from("x")]);
        assert!(matches!(result, Err(FilterError::ConcurrentOperation)));
    }
}
