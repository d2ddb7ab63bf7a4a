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

//! Duplex filters and the chains that run them.
//!
//! A filter is one stage of the byte pipeline between the application and
//! the wire: compression, encryption, HTTP framing, or a proxy tunnel. Each
//! stage only knows its two neighbors, so stages combine freely.
//!
//! # Building blocks
//!
//! - [`Filter`]: the four-method duplex contract every stage implements
//! - [`FilterChain`]: owns an ordered list of filters and runs their steps
//!   from a work queue, reporting what it needs from the wire as a
//!   [`ChainEvent`]
//! - [`filter_data`] / [`unfilter_data`]: run a whole in-memory message
//!   through a chain
//! - [`FilterRegistry`]: builds filters from the ids a peer sends
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::buffer::{ByteBuffer, copy_buffers};
//! use chainrpc::filter::{filter_data, unfilter_data, FilterId, FilterRegistry};
//!
//! let registry = FilterRegistry::with_defaults();
//! let mut encoder = registry.create_chain(&[FilterId::Xor]).unwrap();
//! let mut decoder = registry.create_chain(&[FilterId::Xor]).unwrap();
//!
//! let encoded = filter_data(&[ByteBuffer::from("hello")], &mut encoder).unwrap();
//! assert_ne!(copy_buffers(&encoded), b"hello");
//!
//! let decoded = unfilter_data(ByteBuffer::from(copy_buffers(&encoded)), 5, &mut decoder).unwrap();
//! assert_eq!(copy_buffers(&decoded), b"hello");
//! ```

mod chain;
mod driver;
mod error;
mod http_connect;
mod http_frame;
mod http_session;
mod id;
mod identity;
mod registry;
mod traits;

#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "compression")]
mod zlib;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainEvent, ChainState, DEFAULT_MAX_MESSAGE_LENGTH, FilterChain};
pub use driver::{filter_data, unfilter_data};
pub use error::FilterError;
pub use http_connect::HttpConnectFilter;
pub use http_frame::{HttpFrameFilter, HttpMessageInfo, HttpRole};
pub use http_session::{HttpSessionFilter, HttpSessionRegistry};
pub use id::FilterId;
pub use identity::{IdentityFilter, XorFilter};
pub use registry::{FilterFactory, FilterRegistry};
pub use traits::{Filter, FilterContext};

#[cfg(feature = "tls")]
pub use registry::TlsFilterFactory;
#[cfg(feature = "tls")]
pub use tls::{TlsFilter, TlsFilterConfig};
#[cfg(feature = "compression")]
pub use zlib::{ZlibFilter, ZlibMode};
