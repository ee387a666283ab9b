//! Deduplicating, rate-limited work queue of PodSet keys.
//!
//! Guarantees that a key is reconciled by at most one worker at a time:
//! - a key added while already pending is absorbed,
//! - a key added while in flight is parked in `dirty` and queued again
//!   exactly once when the worker calls [`WorkQueue::done`].
//!
//! Failed keys come back through [`WorkQueue::add_rate_limited`] after an
//! exponentially growing delay (see [`crate::backoff`]).

use crate::backoff::{ExponentialBackoff, RateLimiter};
use crate::key::ResourceKey;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in FIFO order
    queue: VecDeque<ResourceKey>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<ResourceKey>,
    /// Keys currently held by a worker
    processing: HashSet<ResourceKey>,
    shutting_down: bool,
}

/// Work queue shared by the event bridge and all workers.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    limiter: Mutex<RateLimiter>,
    /// Wakes workers blocked in `get`
    item_ready: Notify,
    /// Wakes `shut_down_with_drain` when the last in-flight key is done
    drained: Notify,
    /// Cancels delayed adds once the queue shuts down
    delayed: CancellationToken,
}

impl WorkQueue {
    /// Creates an empty queue using `backoff` for rate-limited adds.
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            limiter: Mutex::new(RateLimiter::new(backoff)),
            item_ready: Notify::new(),
            drained: Notify::new(),
            delayed: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic; recover the guard rather than propagate poison
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing.
    ///
    /// No-op if the key is already pending or the queue is shutting down.
    pub fn add(&self, key: ResourceKey) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Requeued by `done` once the in-flight copy finishes
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.item_ready.notify_one();
    }

    /// Adds `key` after `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ResourceKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        let cancelled = self.delayed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Adds `key` after its backoff delay and counts the failure.
    pub fn add_rate_limited(self: &Arc<Self>, key: ResourceKey) {
        let delay = self.limiter().when(&key);
        debug!("Requeueing {} in {:?}", key, delay);
        self.add_after(key, delay);
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &ResourceKey) {
        self.limiter().forget(key);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.limiter().num_requeues(key)
    }

    /// Blocks until a key is available and marks it in flight.
    ///
    /// Returns `None` once the queue is shutting down and empty.
    /// Cancel-safe: dropping the future never loses a key.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            // Register before checking state so a wakeup in between is not missed
            notified.as_mut().enable();
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

    /// Marks `key` as finished, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.state();
        state.processing.remove(key);
        let requeue = state.dirty.contains(key);
        if requeue {
            state.queue.push_back(key.clone());
        }
        let drained = state.shutting_down && state.processing.is_empty();
        drop(state);
        if requeue {
            self.item_ready.notify_one();
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no keys are waiting to be handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `shut_down` has been called.
    #[must_use]
    pub fn shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Stops accepting new keys and wakes every blocked `get`.
    ///
    /// Keys already queued are still handed out.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.delayed.cancel();
        self.item_ready.notify_waiters();
        // Nothing in flight means nothing to drain
        if self.state().processing.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Shuts down and waits until every in-flight key is done.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state().processing.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
