//! Rate limited work queue with per-key exclusivity
//!
//! Semantics follow the classic controller work queue:
//! - a key waiting in the queue is stored once, however often it is added
//! - a key handed out by [`WorkQueue::get`] is "processing" until
//!   [`WorkQueue::done`]; adds in the meantime mark it dirty and it is
//!   queued again on `done`, so two workers never hold the same key
//! - after [`WorkQueue::shut_down`] adds are dropped and `get` returns `None`

use crate::rate_limiter::ExponentialFailureRateLimiter;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialFailureRateLimiter,
}

/// WorkQueue is cheap to clone; clones share the same queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(name: &str) -> Self {
        Self::with_rate_limiter(name, ExponentialFailureRateLimiter::default())
    }

    pub fn with_rate_limiter(name: &str, limiter: ExponentialFailureRateLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Add `key` after the delay the rate limiter assigns to it
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.limiter.when(key);
        debug!(queue = %self.inner.name, %key, ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Stop tracking retries for `key`
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            // Registered before the state check so a wakeup between the check
            // and the await is not lost.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Finish processing `key`, requeueing it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
        }
        debug!(queue = %self.inner.name, "Shutting down work queue");
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_deduplicates_waiting_keys() {
        let queue = WorkQueue::new("test");
        queue.add("default/a");
        queue.add("default/a");
        queue.add("default/b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        assert_eq!(queue.get().await.as_deref(), Some("default/b"));
    }

    #[tokio::test]
    async fn test_processing_key_is_not_redelivered_until_done() {
        let queue = WorkQueue::new("test");
        queue.add("default/a");
        let key = queue.get().await.unwrap();

        queue.add("default/a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_drops_key() {
        let queue = WorkQueue::new("test");
        queue.add("default/a");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_shut_down_unblocks_get() {
        let queue = WorkQueue::new("test");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("default/a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_wakes_on_add() {
        let queue = WorkQueue::new("test");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("default/a");
        assert_eq!(waiter.await.unwrap().as_deref(), Some("default/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_delivery() {
        let queue = WorkQueue::new("test");
        queue.add_after("default/a", Duration::from_secs(10));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_and_forget() {
        let queue = WorkQueue::new("test");
        queue.add_rate_limited("default/a");
        queue.add_rate_limited("default/a");
        assert_eq!(queue.num_requeues("default/a"), 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));

        queue.forget("default/a");
        assert_eq!(queue.num_requeues("default/a"), 0);
    }
}
