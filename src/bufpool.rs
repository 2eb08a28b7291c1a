//! Process-wide pool of fixed-size copy buffers.
//!
//! Buffers are lent out as [`PooledBuffer`] and go back to the pool when the
//! guard is dropped. The pool is a free list, not a queue: there is no
//! ordering between returns and later loans.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Size of every pooled buffer.
pub const BUF_SIZE: usize = 32 * 1024;

/// Buffers kept around when idle; extra returns are dropped.
const MAX_RETAINED: usize = 64;

static POOL: BufferPool = BufferPool::new(MAX_RETAINED);

/// Borrow a buffer from the process-wide pool.
pub fn get() -> PooledBuffer<'static> {
    POOL.get()
}

pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
}

impl BufferPool {
    pub const fn new(max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_retained,
        }
    }

    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; BUF_SIZE]);
        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    fn put(&self, buf: Vec<u8>) {
        if buf.len() < BUF_SIZE {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
