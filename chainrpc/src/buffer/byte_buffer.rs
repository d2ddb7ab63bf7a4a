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

use super::pool::Arena;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A shared view of a byte sequence with optional free space in front of it.
///
/// Cloning a `ByteBuffer` is cheap: clones share the arena. The first
/// mutation through a shared view copies the arena, so writers never
/// disturb other holders.
///
/// The left margin is tracked explicitly rather than derived from the view
/// offset. A sub-slice that starts inside the view has no margin, because
/// the bytes in front of it belong to someone else's payload.
#[derive(Clone, Default)]
pub struct ByteBuffer {
    arena: Option<Arc<Arena>>,
    offset: usize,
    len: usize,
    left_margin: usize,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Takes ownership of `bytes` without copying.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::from_arena(Arena::unpooled(bytes))
    }

    pub(crate) fn from_arena(arena: Arena) -> Self {
        let len = arena.len();
        Self {
            arena: Some(Arc::new(arena)),
            offset: 0,
            len,
            left_margin: 0,
        }
    }

    /// Creates a buffer holding a copy of `payload` with `margin` free bytes
    /// in front of it.
    #[must_use]
    pub fn with_left_margin(margin: usize, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(margin + payload.len());
        bytes.resize(margin, 0);
        bytes.extend_from_slice(payload);
        Self {
            arena: Some(Arc::new(Arena::unpooled(bytes))),
            offset: margin,
            len: payload.len(),
            left_margin: margin,
        }
    }

    /// Number of bytes in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the view holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes directly in front of the view.
    #[must_use]
    pub fn left_margin(&self) -> usize {
        self.left_margin
    }

    /// Arena bytes directly after the view.
    #[must_use]
    pub fn right_margin(&self) -> usize {
        self.arena
            .as_ref()
            .map_or(0, |arena| arena.len() - self.offset - self.len)
    }

    /// Returns the viewed bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.arena {
            Some(arena) => &arena.bytes()[self.offset..self.offset + self.len],
            None => &[],
        }
    }

    /// Returns the viewed bytes for writing, copying the arena first if it is
    /// shared.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let (offset, len) = (self.offset, self.len);
        match &mut self.arena {
            Some(arena) => &mut Arc::make_mut(arena).bytes_mut()[offset..offset + len],
            None => &mut [],
        }
    }

    /// Copies the viewed bytes into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Returns a view of `len` bytes starting `offset` bytes into this view.
    ///
    /// A slice starting at offset zero inherits the left margin. Any other
    /// slice has none.
    ///
    /// # Panics
    ///
    /// Panics if the range lies outside the view.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "slice {offset}+{len} out of bounds for buffer of {} bytes",
            self.len
        );
        Self {
            arena: self.arena.clone(),
            offset: self.offset + offset,
            len,
            left_margin: if offset == 0 { self.left_margin } else { 0 },
        }
    }

    /// Returns a view of everything from `offset` to the end.
    #[must_use]
    pub fn slice_from(&self, offset: usize) -> Self {
        self.slice(offset, self.len - offset.min(self.len))
    }

    /// Grows the view backwards by `n` bytes of margin.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the left margin.
    pub fn expand_into_left_margin(&mut self, n: usize) {
        assert!(
            n <= self.left_margin,
            "cannot expand {n} bytes into a left margin of {}",
            self.left_margin
        );
        self.offset -= n;
        self.len += n;
        self.left_margin -= n;
    }

    /// Expands into the left margin and writes `header` there.
    ///
    /// # Panics
    ///
    /// Panics if `header` does not fit in the left margin.
    pub fn prepend(&mut self, header: &[u8]) {
        self.expand_into_left_margin(header.len());
        self.as_mut_slice()[..header.len()].copy_from_slice(header);
    }

    /// Changes the view length, zero-filling any growth. Growth into bytes
    /// the arena already holds copies a shared arena first.
    pub fn resize(&mut self, new_len: usize) {
        if new_len <= self.len {
            self.len = new_len;
            return;
        }
        let start = self.offset + self.len;
        let end = self.offset + new_len;
        match &mut self.arena {
            Some(arena) => {
                let bytes = Arc::make_mut(arena).bytes_mut();
                if end > bytes.len() {
                    bytes.resize(end, 0);
                }
                bytes[start..end].fill(0);
            }
            None => {
                *self = Self::zeroed(new_len);
                return;
            }
        }
        self.len = new_len;
    }

    /// Drops this reference to the arena and leaves the buffer empty.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Moves the buffer out, leaving an empty one behind.
    #[must_use]
    pub fn release(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Returns `true` when no other view shares this arena.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.arena
            .as_ref()
            .map_or(true, |arena| Arc::strong_count(arena) == 1)
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteBuffer {}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len)
            .field("left_margin", &self.left_margin)
            .field("right_margin", &self.right_margin())
            .finish()
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }
}

impl From<&str> for ByteBuffer {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl From<String> for ByteBuffer {
    fn from(text: String) -> Self {
        Self::from_vec(text.into_bytes())
    }
}

/// Sum of the lengths of `buffers`.
#[must_use]
pub fn total_length(buffers: &[ByteBuffer]) -> usize {
    buffers.iter().map(ByteBuffer::len).sum()
}

/// Returns views covering `len` bytes of the concatenation of `buffers`,
/// starting `offset` bytes in. `None` means "to the end".
///
/// No bytes are copied.
#[must_use]
pub fn slice_buffers(buffers: &[ByteBuffer], offset: usize, len: Option<usize>) -> Vec<ByteBuffer> {
    let mut skip = offset;
    let mut remaining = len.unwrap_or(usize::MAX);
    let mut out = Vec::new();

    for buffer in buffers {
        if remaining == 0 {
            break;
        }
        if skip >= buffer.len() {
            skip -= buffer.len();
            continue;
        }
        let take = (buffer.len() - skip).min(remaining);
        out.push(buffer.slice(skip, take));
        remaining -= take;
        skip = 0;
    }

    out
}

/// Copies the concatenation of `buffers` into one vector.
#[must_use]
pub fn copy_buffers(buffers: &[ByteBuffer]) -> Vec<u8> {
    let mut out = Vec::with_capacity(total_length(buffers));
    for buffer in buffers {
        out.extend_from_slice(buffer);
    }
    out
}

/// Joins `buffers` into a single buffer. A lone buffer is returned as is.
#[must_use]
pub fn concat_buffers(buffers: &[ByteBuffer]) -> ByteBuffer {
    match buffers {
        [] => ByteBuffer::new(),
        [single] => single.clone(),
        _ => ByteBuffer::from_vec(copy_buffers(buffers)),
    }
}
