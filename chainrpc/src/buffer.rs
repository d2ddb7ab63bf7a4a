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

//! Shared byte buffers for the filter pipeline.
//!
//! Every stage of the pipeline exchanges [`ByteBuffer`] values: reference
//! counted views into a byte arena with spare room in front of the view, so
//! a length prefix or a filtered-payload header can be attached without
//! copying the payload.
//!
//! Arenas handed out by the [`BufferPool`] go back to the pool once the last
//! view into them is dropped, no matter which filter held it last.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::buffer::ByteBuffer;
//!
//! let mut buffer = ByteBuffer::with_left_margin(4, b"hello");
//! assert_eq!(buffer.left_margin(), 4);
//!
//! buffer.prepend(&5u32.to_le_bytes());
//! assert_eq!(buffer.as_slice(), b"\x05\x00\x00\x00hello");
//! assert_eq!(buffer.left_margin(), 0);
//! ```

mod byte_buffer;
pub mod pool;

pub use byte_buffer::{ByteBuffer, concat_buffers, copy_buffers, slice_buffers, total_length};
pub use pool::BufferPool;
