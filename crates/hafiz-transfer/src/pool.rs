//! Reusable part buffers
//!
//! A [`BufferPool`] hands out fixed-size buffers up to a capacity. Buffers
//! are allocated lazily, go back to the pool when dropped, and a `get`
//! beyond capacity waits until one is returned, the capacity grows, or the
//! caller cancels.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer pool is closed")]
    Closed,

    #[error("buffer pool has zero capacity")]
    ZeroCapacity,

    #[error("buffer acquisition cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    outstanding: usize,
    idle: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    state: Mutex<PoolState>,
    available: Notify,
}

/// Bounded pool of equally sized byte buffers. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                state: Mutex::new(PoolState {
                    capacity,
                    outstanding: 0,
                    idle: Vec::new(),
                    closed: false,
                }),
                available: Notify::new(),
            }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Allocated buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Check out a buffer, waiting while the pool is at capacity.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<PooledBuffer, PoolError> {
        loop {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            // Register interest before looking at the state so a release
            // between the check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(buffer) = self.try_get()? {
                return Ok(buffer);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Check out a buffer if one is available right now.
    pub fn try_get(&self) -> Result<Option<PooledBuffer>, PoolError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if state.capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        if state.outstanding >= state.capacity {
            return Ok(None);
        }
        state.outstanding += 1;
        let data = state.idle.pop();
        drop(state);

        let data = data.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        Ok(Some(PooledBuffer {
            data: Some(data),
            pool: self.clone(),
        }))
    }

    /// Return a buffer. Same as dropping it.
    pub fn put(&self, buffer: PooledBuffer) {
        drop(buffer);
    }

    fn release(&self, data: Vec<u8>) {
        let mut state = self.inner.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let keep = !state.closed
            && data.len() == self.inner.buffer_size
            && state.idle.len() + state.outstanding < state.capacity;
        if keep {
            state.idle.push(data);
        }
        drop(state);
        self.inner.available.notify_one();
    }

    /// Grow or shrink the capacity, returning the new value.
    ///
    /// Shrinking drops idle buffers right away; buffers still checked out
    /// are released as they come back.
    pub fn modify_capacity(&self, delta: isize) -> usize {
        let mut state = self.inner.state.lock();
        if state.closed {
            return 0;
        }
        state.capacity = if delta < 0 {
            state.capacity.saturating_sub(delta.unsigned_abs())
        } else {
            state.capacity.saturating_add(delta as usize)
        };
        let capacity = state.capacity;
        while state.idle.len() + state.outstanding > capacity {
            if state.idle.pop().is_none() {
                break;
            }
        }
        drop(state);

        debug!("Buffer pool capacity changed by {} to {}", delta, capacity);
        // Growth frees slots; a drop to zero must fail pending gets.
        if delta > 0 || capacity == 0 {
            self.inner.available.notify_waiters();
        }
        capacity
    }

    /// Grow the capacity by `delta` until the returned lease is dropped.
    pub fn lease(&self, delta: usize) -> CapacityLease {
        let delta = isize::try_from(delta).unwrap_or(isize::MAX);
        self.modify_capacity(delta);
        CapacityLease {
            pool: self.clone(),
            delta,
        }
    }

    /// Release all idle buffers and fail current and future gets.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);
        self.inner.available.notify_waiters();
    }
}

/// A checked-out buffer; returns to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

/// Temporary capacity added to a shared pool for one transfer.
#[derive(Debug)]
pub struct CapacityLease {
    pool: BufferPool,
    delta: isize,
}

impl Drop for CapacityLease {
    fn drop(&mut self) {
        self.pool.modify_capacity(-self.delta);
    }
}
