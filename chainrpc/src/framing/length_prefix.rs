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

//! Length-prefixed binary frames.
//!
//! Every message on a raw stream transport is preceded by its length as a
//! 4-byte **little-endian** `u32`. Little-endian is the established wire
//! convention of this protocol; peers depend on it, so it must not be
//! switched to the big-endian order usual for network protocols.
//!
//! # Protocol
//!
//! ```text
//! +-------------------+-------------------+
//! | Length (4 bytes)  | Payload (N bytes) |
//! +-------------------+-------------------+
//! ```

use super::FramingError;
use crate::buffer::{ByteBuffer, total_length};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prepends the little-endian length of `buffers` to the first buffer.
///
/// The prefix goes into the first buffer's left margin when it has room,
/// otherwise a separate 4-byte buffer is inserted in front.
///
/// # Examples
///
/// ```rust
/// use chainrpc::buffer::{ByteBuffer, copy_buffers};
/// use chainrpc::framing::{encode_length_prefix, LENGTH_PREFIX_SIZE};
///
/// let mut buffers = vec![ByteBuffer::with_left_margin(LENGTH_PREFIX_SIZE, b"hello")];
/// encode_length_prefix(&mut buffers).unwrap();
/// assert_eq!(buffers.len(), 1);
/// assert_eq!(copy_buffers(&buffers), b"\x05\x00\x00\x00hello");
/// ```
///
/// Fails without touching `buffers` if their length does not fit in a
/// `u32`.
pub fn encode_length_prefix(buffers: &mut Vec<ByteBuffer>) -> Result<(), FramingError> {
    let prefix = length_prefix(total_length(buffers))?;
    match buffers.first_mut() {
        Some(first) if first.left_margin() >= LENGTH_PREFIX_SIZE => first.prepend(&prefix),
        _ => buffers.insert(0, ByteBuffer::from(&prefix[..])),
    }
    Ok(())
}

fn length_prefix(length: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], FramingError> {
    let length32 = u32::try_from(length).map_err(|_| FramingError::InvalidFrameLength {
        length,
        max: u32::MAX as usize,
    })?;
    Ok(length32.to_le_bytes())
}

/// Decodes a length prefix.
pub fn decode_length_prefix(bytes: &[u8]) -> Result<usize, FramingError> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| FramingError::decoding("truncated length prefix"))?;
    Ok(u32::from_le_bytes(prefix) as usize)
}

/// Rejects empty frames and frames longer than `max`.
pub fn check_frame_length(length: usize, max: usize) -> Result<(), FramingError> {
    if length == 0 || length > max {
        return Err(FramingError::InvalidFrameLength { length, max });
    }
    Ok(())
}

/// Reassembles frames from a byte stream that arrives in arbitrary pieces.
///
/// # Examples
///
/// ```rust
/// use chainrpc::framing::FrameAssembler;
///
/// let mut assembler = FrameAssembler::new(1024);
/// assert_eq!(assembler.bytes_wanted(), 4);
///
/// assembler.push(b"\x03\x00");
/// assert!(assembler.next_frame().unwrap().is_none());
/// assembler.push(b"\x00\x00ab");
/// assert_eq!(assembler.bytes_wanted(), 1);
/// assembler.push(b"c");
/// assert_eq!(assembler.next_frame().unwrap().unwrap().as_slice(), b"abc");
/// ```
#[derive(Debug)]
pub struct FrameAssembler {
    max_frame_length: usize,
    pending: Vec<u8>,
    /// Body length once the prefix has been read.
    expected: Option<usize>,
}

impl FrameAssembler {
    /// Creates an assembler accepting frames up to `max_frame_length` bytes.
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            pending: Vec::new(),
            expected: None,
        }
    }

    /// Changes the largest accepted frame.
    pub fn set_max_frame_length(&mut self, max_frame_length: usize) {
        self.max_frame_length = max_frame_length;
    }

    /// Bytes still missing from the prefix or body being assembled. Zero
    /// means [`next_frame`](Self::next_frame) can make progress without
    /// more input.
    pub fn bytes_wanted(&self) -> usize {
        let target = self.expected.unwrap_or(LENGTH_PREFIX_SIZE);
        target.saturating_sub(self.pending.len())
    }

    /// Returns `true` while part of a frame has been received.
    pub fn has_partial_frame(&self) -> bool {
        self.expected.is_some() || !self.pending.is_empty()
    }

    /// Appends received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Extracts the next complete frame body, if one is available.
    pub fn next_frame(&mut self) -> Result<Option<ByteBuffer>, FramingError> {
        if self.expected.is_none() {
            if self.pending.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }
            let length = decode_length_prefix(&self.pending)?;
            check_frame_length(length, self.max_frame_length)?;
            self.pending.drain(..LENGTH_PREFIX_SIZE);
            self.expected = Some(length);
        }

        match self.expected {
            Some(length) if self.pending.len() >= length => {
                let rest = self.pending.split_off(length);
                let body = std::mem::replace(&mut self.pending, rest);
                self.expected = None;
                Ok(Some(ByteBuffer::from_vec(body)))
            }
            _ => Ok(None),
        }
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.expected = None;
    }
}
