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

//! Arena pooling for pipeline buffers.
//!
//! Filters allocate scratch space on every read and write (inflate targets,
//! TLS record space, HTTP header staging). The pool keeps recently released
//! arenas organized by size class so those allocations are mostly reuse.
//!
//! An arena drawn from the pool remembers where it came from and goes back
//! on drop, whichever [`ByteBuffer`] view happened to hold the last
//! reference. Arenas larger than [`MAX_POOLED_SIZE`] are never pooled.
//!
//! # Example
//!
//! ```rust
//! use chainrpc::buffer::BufferPool;
//!
//! let mut buffer = BufferPool::get(1024);
//! assert_eq!(buffer.len(), 1024);
//! buffer.as_mut_slice()[..5].copy_from_slice(b"hello");
//!
//! // The arena returns to the pool here.
//! drop(buffer);
//! ```

use super::ByteBuffer;
use parking_lot::Mutex;
use std::sync::Arc;

/// Largest arena the pool will keep (1 MB).
pub const MAX_POOLED_SIZE: usize = 1024 * 1024;

/// Maximum number of arenas kept per size class.
const MAX_BUFFERS_PER_CLASS: usize = 32;

/// Size classes for pooling (powers of 4).
const SIZE_CLASSES: &[usize] = &[
    256,     // 256 B
    1024,    // 1 KB
    4096,    // 4 KB
    16384,   // 16 KB
    65536,   // 64 KB
    262144,  // 256 KB
    1048576, // 1 MB
];

/// Backing storage shared by one or more [`ByteBuffer`] views.
pub(crate) struct Arena {
    bytes: Vec<u8>,
    pool: Option<Arc<BufferPoolInner>>,
}

impl Arena {
    /// Wraps a vector that does not belong to any pool.
    pub(crate) fn unpooled(bytes: Vec<u8>) -> Self {
        Self { bytes, pool: None }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }
}

impl Clone for Arena {
    // Copy-on-write clones are plain heap vectors. Only the original goes
    // back to the pool.
    fn clone(&self) -> Self {
        Self::unpooled(self.bytes.clone())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let capacity = self.bytes.capacity();
            if capacity > 0 && capacity <= MAX_POOLED_SIZE {
                pool.return_buffer(std::mem::take(&mut self.bytes));
            }
        }
    }
}

/// Inner pool state.
pub(crate) struct BufferPoolInner {
    pools: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPoolInner {
    fn new() -> Self {
        let pools = SIZE_CLASSES
            .iter()
            .map(|_| Mutex::new(Vec::new()))
            .collect();

        Self { pools }
    }

    /// Gets an empty vector with at least `min_capacity` bytes of capacity.
    fn get_buffer(&self, min_capacity: usize) -> Vec<u8> {
        let size_class_idx = SIZE_CLASSES.iter().position(|&size| size >= min_capacity);

        if let Some(idx) = size_class_idx {
            let mut pool = self.pools[idx].lock();
            if let Some(mut buffer) = pool.pop() {
                buffer.clear();
                return buffer;
            }
            Vec::with_capacity(SIZE_CLASSES[idx])
        } else {
            Vec::with_capacity(min_capacity)
        }
    }

    fn return_buffer(&self, mut buffer: Vec<u8>) {
        let capacity = buffer.capacity();

        // A vector lands in the largest class it can fully serve.
        let size_class_idx = SIZE_CLASSES.iter().rposition(|&size| size <= capacity);

        if let Some(idx) = size_class_idx {
            let mut pool = self.pools[idx].lock();
            if pool.len() < MAX_BUFFERS_PER_CLASS {
                buffer.clear();
                pool.push(buffer);
            }
        }
    }
}

/// Process-wide pool of reusable buffer arenas.
pub struct BufferPool;

impl BufferPool {
    fn instance() -> &'static Arc<BufferPoolInner> {
        static INSTANCE: std::sync::OnceLock<Arc<BufferPoolInner>> = std::sync::OnceLock::new();
        INSTANCE.get_or_init(|| Arc::new(BufferPoolInner::new()))
    }

    /// Gets a zero-filled buffer of exactly `len` bytes backed by a pooled
    /// arena.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chainrpc::buffer::BufferPool;
    ///
    /// let buffer = BufferPool::get(100);
    /// assert_eq!(buffer.len(), 100);
    /// assert!(buffer.iter().all(|&b| b == 0));
    /// ```
    #[must_use]
    pub fn get(len: usize) -> ByteBuffer {
        let pool = Self::instance();
        let mut bytes = pool.get_buffer(len);
        bytes.resize(len, 0);
        ByteBuffer::from_arena(Arena {
            bytes,
            pool: Some(Arc::clone(pool)),
        })
    }

    /// Returns `(size_class, idle_arenas)` for every size class.
    #[must_use]
    pub fn stats() -> Vec<(usize, usize)> {
        let pool = Self::instance();
        SIZE_CLASSES
            .iter()
            .zip(pool.pools.iter())
            .map(|(size, pool_mutex)| (*size, pool_mutex.lock().len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let buffer = BufferPool::get(1024);
        assert_eq!(buffer.len(), 1024);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_pool_reuse_is_zeroed() {
        {
            let mut buffer = BufferPool::get(1024);
            buffer.as_mut_slice().fill(0xAB);
        }

        let buffer = BufferPool::get(1024);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_pool_large_buffer() {
        let buffer = BufferPool::get(2 * 1024 * 1024);
        assert_eq!(buffer.len(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_buffer_pool_returns_from_last_view() {
        let buffer = BufferPool::get(300);
        let slice = buffer.slice(10, 20);
        drop(buffer);

        // The slice still keeps the arena alive.
        assert_eq!(slice.len(), 20);
        drop(slice);

        let stats = BufferPool::stats();
        assert_eq!(stats.len(), SIZE_CLASSES.len());
        let total_buffers: usize = stats.iter().map(|(_, count)| count).sum();
        assert!(total_buffers > 0);
    }

    #[test]
    fn test_copy_on_write_clone_is_not_pooled() {
        let arena = Arena::unpooled(vec![1, 2, 3]);
        let copy = arena.clone();
        assert!(copy.pool.is_none());
        assert_eq!(copy.bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_buffer_pool_concurrent() {
        use std::thread;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                thread::spawn(|| {
                    for _ in 0..100 {
                        let mut buffer = BufferPool::get(1024);
                        buffer.as_mut_slice()[..4].copy_from_slice(b"test");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = BufferPool::stats();
        let total_buffers: usize = stats.iter().map(|(_, count)| count).sum();
        assert!(total_buffers > 0);
    }
}
