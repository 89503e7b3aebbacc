//! # Buffer Pool
//!
//! Pool of frame buffers reused by the encode path. Datagram frames are bounded by the
//! transport MTU and stream frames are usually small, so most encodes reuse a buffer
//! instead of allocating one.
//!
//! ## Usage
//! ```rust,no_run
//! use reliable_protocol::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(16);
//! let mut buffer = pool.acquire();
//! buffer.extend_from_slice(b"frame");
//! // returned to the pool on drop
//! ```

use std::sync::{Arc, Mutex};

/// Buffers that grew beyond this are released instead of pooled
const MAX_POOLED_BUFFER_SIZE: usize = 64 * 1024;

/// Default buffer capacity (one typical datagram)
const DEFAULT_BUFFER_CAPACITY: usize = 1500;

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    /// Take the bytes out; the (empty) allocation is not returned to the pool
    pub fn into_inner(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let capacity = self.buffer.capacity();
        if capacity > 0 && capacity <= MAX_POOLED_BUFFER_SIZE {
            self.buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

/// Thread-safe buffer pool
pub struct BufferPool {
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    initial_capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool with `pool_size` pre-allocated buffers
    pub fn new(pool_size: usize) -> Self {
        Self::with_buffer_capacity(pool_size, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_buffer_capacity(pool_size: usize, buffer_capacity: usize) -> Self {
        let pool = (0..pool_size)
            .map(|_| Vec::with_capacity(buffer_capacity))
            .collect();

        Self {
            pool: Arc::new(Mutex::new(pool)),
            initial_capacity: buffer_capacity,
        }
    }

    /// Acquire a buffer from the pool (or allocate a new one if pool is empty)
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = match self.pool.lock() {
            Ok(mut pool) => pool
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity)),
            Err(_) => Vec::with_capacity(self.initial_capacity),
        };

        PooledBuffer {
            buffer,
            pool: self.pool.clone(),
        }
    }

    /// Get the current number of available buffers in the pool
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            initial_capacity: self.initial_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let pool = BufferPool::new(10);
        assert_eq!(pool.available(), 10);

        let mut buf = pool.acquire();
        assert_eq!(pool.available(), 9);

        buf.push(42);
        assert_eq!(buf[0], 42);

        drop(buf);
        assert_eq!(pool.available(), 10);
    }

    #[test]
    fn test_buffer_pool_reuse_clears() {
        let pool = BufferPool::new(1);

        {
            let mut buf1 = pool.acquire();
            buf1.extend_from_slice(b"test");
        }

        let buf2 = pool.acquire();
        assert_eq!(buf2.len(), 0);
        assert!(buf2.capacity() >= 4);
    }

    #[test]
    fn test_into_inner_keeps_bytes() {
        let pool = BufferPool::new(1);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"frame");
        assert_eq!(buf.into_inner(), b"frame");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_buffer_size_limit() {
        let pool = BufferPool::new(1);

        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(&vec![0u8; MAX_POOLED_BUFFER_SIZE + 1]);
        }

        assert_eq!(pool.available(), 0);
    }
}
