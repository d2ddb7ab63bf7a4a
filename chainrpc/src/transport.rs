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

//! Raw transports and the client connections built on them.
//!
//! A raw transport moves bytes and nothing more: [`TcpTransport`] and
//! [`MemoryTransport`] implement the blocking [`RawTransport`] contract,
//! [`AsyncTcpTransport`] and [`AsyncMemoryTransport`] the Tokio
//! [`AsyncRawTransport`] one.
//!
//! A connection wraps a raw transport in a [`FilterChain`](crate::filter::FilterChain):
//!
//! ```text
//! application
//!     |
//! [transport filters]   negotiated at runtime (compression, encryption)
//!     |
//! [wire filters]        fixed by the WireConfig (HTTP framing, TLS, proxy)
//!     |
//! raw transport
//! ```
//!
//! and adds the 4-byte little-endian length prefix to every message.
//! [`ClientConnection`] blocks the calling thread; [`AsyncClientConnection`]
//! is its Tokio twin.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::buffer::ByteBuffer;
//! use chainrpc::transport::{ClientConnection, MemoryTransport, WireConfig};
//! use std::time::{Duration, Instant};
//!
//! let (a, b) = MemoryTransport::pair("memory://doc");
//! let wire = WireConfig::memory("memory://doc");
//! let mut client = ClientConnection::new(Box::new(a), &wire).unwrap();
//! let mut server = ClientConnection::new(Box::new(b), &wire).unwrap();
//!
//! let deadline = Instant::now() + Duration::from_secs(1);
//! client.send(vec![ByteBuffer::from("ping")], deadline).unwrap();
//! assert_eq!(server.receive(deadline).unwrap().as_slice(), b"ping");
//! ```

mod async_connection;
mod cancel;
mod connection;
mod error;
mod memory;
mod tcp;
mod traits;
mod types;

pub use async_connection::AsyncClientConnection;
pub use cancel::CancelToken;
pub use connection::ClientConnection;
pub use error::TransportError;
pub use memory::{AsyncMemoryListener, AsyncMemoryTransport, MemoryListener, MemoryTransport};
pub use tcp::{AsyncTcpTransport, TcpTransport};
pub use traits::{AsyncRawTransport, RawTransport};
pub use types::{HttpProxy, TransportType, WireConfig};

pub(crate) use connection::{ChainDriver, MAX_WIRE_READ, Progress, remaining};
