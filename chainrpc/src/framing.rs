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

//! Wire framing: length prefixes, the filtered-payload header and the
//! request/response envelopes.
//!
//! A message on the wire is built in layers, innermost first:
//!
//! 1. the serialized arguments (opaque to this crate)
//! 2. a [`RequestHeader`] or [`ResponseHeader`] envelope
//! 3. optionally message filters, announced by a [`FilteredPayloadHeader`]
//! 4. the transport filter chain (compression, TLS, HTTP framing)
//! 5. a 4-byte little-endian length prefix
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::buffer::{ByteBuffer, copy_buffers};
//! use chainrpc::filter::FilterChain;
//! use chainrpc::framing::{decode_message, encode_message};
//!
//! // No message filters: the frame body is the message itself.
//! let mut chain = FilterChain::new();
//! let body = encode_message(vec![ByteBuffer::from("hello")], &mut chain).unwrap();
//! assert_eq!(copy_buffers(&body), b"hello");
//!
//! let decoded = decode_message(ByteBuffer::from("hello"), &mut chain).unwrap();
//! assert_eq!(decoded.as_slice(), b"hello");
//! ```

mod error;
mod header;
mod length_prefix;
mod message;

pub use error::FramingError;
pub use header::{FilteredPayloadHeader, MessageFilterCache, decode_message, encode_message};
pub use length_prefix::{
    FrameAssembler, LENGTH_PREFIX_SIZE, check_frame_length, decode_length_prefix,
    encode_length_prefix,
};
pub use message::{
    ENVELOPE_VERSION, Envelope, MessageDescriptor, RemoteErrorCode, RequestHeader,
    ResponseHeader, ResponseKind, decode_envelope, encode_error, encode_request, encode_response,
    with_header,
};
