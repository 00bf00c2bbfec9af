/*
 *  evicting.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  A bounded latest-wins queue: the sole transport between workers.
 */

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};

/// Thread-safe FIFO queue with a fixed capacity where `put` never blocks:
/// once the queue is full the oldest entry is discarded to make room.
///
/// This is deliberately not a standard bounded channel. A slow consumer is
/// paid for with staleness, never with producer backpressure - only the
/// freshest state has to reach the display eventually.
pub struct EvictingQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> EvictingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "EvictingQueue capacity must be > 0");
        EvictingQueue {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    /// Appends an item, silently dropping the oldest entry when full.
    /// Never blocks beyond the internal lock.
    pub async fn put(&self, item: T) {
        let mut queue = self.inner.lock().await;
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
    }

    /// Removes and returns the oldest retained item, waiting up to
    /// `timeout` for one to arrive. `None` is the normal polling outcome
    /// when the queue stays empty, not an error.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(item) = queue.pop_front() {
                    return Some(item);
                }
            }
            // notify_one stores a permit if nobody is waiting yet, so a put
            // racing with this gap cannot be lost.
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.inner.lock().await.pop_front();
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
