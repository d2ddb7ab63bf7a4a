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

#![allow(clippy::module_inception)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # ChainRPC - Filter-Chain RPC Transport
//!
//! ChainRPC moves remote procedure calls through a pipeline of duplex
//! filters and drives each call with an explicit state machine:
//!
//! - **Duplex filters**: compression, TLS, HTTP framing and proxy tunnels
//!   are interchangeable stages with a four-method contract
//! - **Two filter layers**: transport filters wrap the whole byte stream
//!   and are negotiated per connection; message filters wrap single
//!   messages and are named in each message's header
//! - **Call state machine**: connect, negotiate, send and receive phases
//!   with absolute deadlines, cancellation, and progress callbacks
//! - **Liveness**: servers send ping-backs during long calls so clients can
//!   tell a slow call from a dead server
//! - **Version negotiation**: clients lower their runtime and archive
//!   versions to what a server supports and retry once
//! - **Batching**: oneway calls can be packed into large writes
//!
//! ## Architecture
//!
//! - **[`buffer`]**: shared byte buffers with a left margin for headers
//! - **[`filter`]**: the filter contract, chains, and concrete filters
//! - **[`framing`]**: length prefixes, filtered-payload headers and the
//!   request/response envelope
//! - **[`transport`]**: raw transports and the client connections that
//!   run filter chains over them
//! - **[`negotiation`]**: transport filter requests and their validation
//! - **[`stub`]**: blocking and Tokio client stubs
//! - **[`session`]**: the Tokio server side
//!
//! ## Quick Start
//!
//! ```rust
//! use chainrpc::filter::{FilterId, FilterRegistry};
//! use chainrpc::session::{Dispatcher, Response, ServerSession, SessionConfig};
//! use chainrpc::stub::{AsyncClientStub, CallSemantics};
//! use chainrpc::transport::{AsyncClientConnection, AsyncMemoryTransport, WireConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, server) = AsyncMemoryTransport::pair("memory://quickstart");
//!
//! let dispatcher = Dispatcher::new()
//!     .bind_fn("Greeter", |request| async move { Ok(Response::new(request.payload)) });
//! let session = ServerSession::new(
//!     Box::new(server),
//!     dispatcher,
//!     FilterRegistry::with_defaults(),
//!     SessionConfig::default(),
//! )?;
//! tokio::spawn(session.run());
//!
//! let connection =
//!     AsyncClientConnection::new(Box::new(client), &WireConfig::memory("memory://quickstart"))?;
//! let stub = AsyncClientStub::new("Greeter", connection);
//!
//! // Compress the whole connection from here on.
//! let registry = FilterRegistry::with_defaults();
//! stub.request_transport_filters(registry.create_filters(&[FilterId::ZlibStateful])?)
//!     .await?;
//!
//! let reply = stub.call(1, vec!["hello".into()], CallSemantics::Twoway).await?;
//! assert_eq!(reply.as_slice(), b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `compression` (default): zlib filters
//! - `tls` (default): the TLS filter, built on rustls
//! - `observability` (default): `tracing` spans and events

pub mod buffer;
pub mod error;
pub mod filter;
pub mod framing;
pub mod negotiation;
pub mod session;
pub mod stub;
pub mod transport;

pub use error::{CallError, RpcError};
pub use stub::CallPhase;
