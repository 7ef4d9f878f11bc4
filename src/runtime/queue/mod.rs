//! # Change Queue
//!
//! Deduplicating, rate-limited work queue of keys pending reconciliation.
//!
//! ## Contract
//!
//! - `add` inserts an item unless it is already queued; an item that is being
//!   processed is marked dirty and re-queued when processing finishes, so two
//!   workers never hold the same item at once
//! - `get` waits for an item and marks it in flight
//! - `done` releases the in-flight mark
//! - `add_rate_limited` re-queues after the limiter's backoff, `forget` resets it
//! - after `shut_down`, adds are ignored; `get` keeps handing out what is
//!   already queued and then returns `None`

mod rate_limiter;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};

use crate::observability::metrics;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    /// Wakes `get` callers when an item is queued or the queue shuts down
    available: Notify,
    /// Wakes `shut_down_with_drain` when an in-flight item completes
    released: Notify,
    /// Cancels pending delayed adds on shutdown
    closed: CancellationToken,
    limiter: Box<dyn RateLimiter<T>>,
}

/// Rate-limited work queue
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl<T> WorkQueue<T> {
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(limiter: impl RateLimiter<T> + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                available: Notify::new(),
                released: Notify::new(),
                closed: CancellationToken::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    /// Queue an item for processing; coalesced with any pending copy
    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        metrics::increment_queue_adds();
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        metrics::set_queue_depth(state.queue.len());
        drop(state);
        self.shared.available.notify_one();
    }

    /// Wait for the next item and mark it in flight
    ///
    /// Returns `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add cannot be missed
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    metrics::set_queue_depth(state.queue.len());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.available.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release the in-flight mark; re-queues the item if it was added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        let requeue = state.dirty.contains(item);
        if requeue {
            state.queue.push_back(item.clone());
            metrics::set_queue_depth(state.queue.len());
        }
        drop(state);
        if requeue {
            self.shared.available.notify_one();
        }
        self.shared.released.notify_waiters();
    }

    /// Queue an item after the rate limiter's backoff for it
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.shared.limiter.when(&item);
        metrics::increment_requeues();
        self.add_after(item, delay);
    }

    /// Queue an item once `delay` has elapsed
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = queue.shared.closed.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.add(item),
            }
        });
    }

    /// Reset the rate limiter's failure history for an item
    pub fn forget(&self, item: &T) {
        self.shared.limiter.forget(item);
    }

    /// Failures recorded for an item since it was last forgotten
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.shared.limiter.num_requeues(item)
    }

    /// Items waiting to be handed out (not counting in-flight ones)
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Stop accepting items and wake every waiting `get`
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.shared.closed.cancel();
        self.shared.available.notify_waiters();
    }

    /// Shut down, then wait until no item is in flight
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.state().processing.is_empty() {
                return;
            }
            released.await;
        }
    }
}
