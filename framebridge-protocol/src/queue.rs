//! Bounded drop-oldest frame queue
//!
//! Sits between reassembly and pacing. Pushing never blocks: a full queue
//! discards its oldest frame to make room, so end-to-end latency stays bounded
//! when the consumer falls behind. Popping waits up to a caller-supplied
//! timeout.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle to a bounded FIFO; clones refer to the same queue
pub struct FrameQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        FrameQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        FrameQueue {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Append an item, evicting the oldest one first when full
    ///
    /// Returns the evicted item, if any. Items pushed after [`close`](Self::close)
    /// are handed straight back.
    pub fn push(&self, item: T) -> Option<T> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Some(item);
        }

        let evicted = if state.items.len() >= self.inner.capacity {
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        drop(state);

        self.inner.not_empty.notify_one();
        evicted
    }

    /// Take the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.inner.state.lock().items.pop_front()
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout, or immediately once the queue is closed and
    /// drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self
                .inner
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.items.pop_front();
            }
        }
    }

    /// Stop accepting items and wake all waiting readers
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.not_empty.notify_all();
    }

    /// Discard everything currently queued, returning how many items were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.items.len();
        state.items.clear();
        count
    }
}
