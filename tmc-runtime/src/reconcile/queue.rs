//! Typed rate-limiting work queue (§4.2), modeled on client-go's
//! `workqueue.RateLimitingInterface`: a FIFO of keys with an in-flight
//! ("processing") set so the same key is never handed to two workers at
//! once, and a dirty set so a key re-added while in flight is coalesced
//! into a single pending slot.

use super::ratelimiter::ExponentialRateLimiter;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

struct Inner {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    rate_limiter: ExponentialRateLimiter,
    shutting_down: bool,
}

/// A typed, rate-limiting, per-key-exclusive work queue.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        WorkQueue::new()
    }
}

impl WorkQueue {
    /// An empty queue.
    pub fn new() -> Self {
        WorkQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                rate_limiter: ExponentialRateLimiter::default(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Adds `key` immediately. If `key` is already pending, this is a
    /// no-op (coalesced). If `key` is currently being processed, it is
    /// marked dirty and will be re-queued as soon as `done` is called.
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return;
        }
        if !inner.dirty.insert(key.to_string()) {
            return;
        }
        if inner.processing.contains(key) {
            return;
        }
        inner.queue.push_back(key.to_string());
        drop(inner);
        self.notify.notify_one();
    }

    /// Schedules `key` to be re-added after this key's current exponential
    /// backoff delay (§4.2: base 5ms, max 1000s).
    pub async fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.inner.lock().rate_limiter.next_delay(key);
        let this = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            sleep(delay).await;
            this.add(&key);
        });
    }

    /// Number of consecutive rate-limited retries recorded for `key`.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.lock().rate_limiter.num_requeues(key)
    }

    /// Clears `key`'s backoff history, called after a successful reconcile.
    pub fn forget(&self, key: &str) {
        self.inner.lock().rate_limiter.forget(key);
    }

    /// Pops the next key to process, blocking until one is available or
    /// the queue is shut down (in which case `None` is returned). The
    /// returned key is moved into the in-flight/processing set; callers
    /// must call [`WorkQueue::done`] exactly once when finished.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` as finished processing. If it was re-added (marked
    /// dirty) while in flight, it is appended to the queue again.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Marks the queue as shutting down; all blocked and future `get`
    /// calls return `None` once drained.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// True once [`WorkQueue::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Current number of pending (not yet dispatched) keys.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// True if there are no pending keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_enqueue_coalesces() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn dirty_while_processing_is_requeued_on_done() {
        let q = WorkQueue::new();
        q.add("a");
        let got = q.get().await.unwrap();
        assert_eq!(got, "a");
        // re-add while in flight: must not be double-dispatched
        q.add("a");
        assert_eq!(q.len(), 0, "re-add while processing should not land in the pending queue yet");
        q.done("a");
        assert_eq!(q.len(), 1, "done() should requeue a dirty key");
    }

    #[tokio::test]
    async fn shutdown_unblocks_get() {
        let q = Arc::new(WorkQueue::new());
        q.shutdown();
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("b");
        q.add("c");
        assert_eq!(q.get().await.unwrap(), "a");
        assert_eq!(q.get().await.unwrap(), "b");
        assert_eq!(q.get().await.unwrap(), "c");
    }
}
