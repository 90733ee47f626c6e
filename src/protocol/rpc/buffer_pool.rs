//! Pool of fixed-size receive buffers.
//!
//! Datagram receives need a buffer as large as the biggest possible
//! datagram. Allocating and zeroing 64 KiB per call is wasteful, so buffers
//! are borrowed from a pool and handed back when the guard drops, on every
//! exit path including errors and cancelled futures.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// A pool of equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Creates a pool handing out buffers of `buffer_size` bytes and keeping
    /// at most `max_idle` of them around when they are not in use.
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self { buffers: Mutex::new(Vec::new()), buffer_size, max_idle }
    }

    /// Number of buffers currently parked in the pool.
    pub fn idle(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Takes a buffer out of the pool, allocating one if the pool is empty.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let reused = self.buffers.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let buf = reused.unwrap_or_else(|| vec![0; self.buffer_size]);
        PooledBuffer { pool: self, buf }
    }

    fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_idle {
            buffers.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; returned to it on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
