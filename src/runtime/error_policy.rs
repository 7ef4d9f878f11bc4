//! # Error Policy
//!
//! The single place deciding what happens to a key after a reconciliation.
//!
//! - success: the key's backoff history is forgotten
//! - failure with retries left: the key is re-queued with per-key exponential backoff
//! - failure with no retries left: the key is forgotten and reported on the
//!   error log, the `retries_exhausted_total` metric and the
//!   [`RetryExhausted`] channel; it is parked in [`GivenUp`] and not retried
//!   until a new notification arrives for it, unless one already arrived
//!   while the last attempt ran

use crate::observability::metrics;
use crate::runtime::queue::WorkQueue;
use crate::runtime::{Reconcile, RetryExhausted};
use crate::store::ObjectKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Keys the engine stopped retrying
///
/// The periodic resync skips parked keys; a notification from the bridge
/// releases them. A key notified while its last attempt was still running is
/// not parked, since the queue already holds the newer state for it.
#[derive(Debug, Clone, Default)]
pub struct GivenUp {
    state: Arc<Mutex<Parking>>,
}

#[derive(Debug, Default)]
struct Parking {
    parked: HashSet<ObjectKey>,
    /// Keys notified since their current pass started
    notified: HashSet<ObjectKey>,
}

impl GivenUp {
    fn lock(&self) -> MutexGuard<'_, Parking> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park a key; returns `false` when a notification arrived during its last pass
    pub fn park(&self, key: ObjectKey) -> bool {
        let mut state = self.lock();
        if state.notified.remove(&key) {
            return false;
        }
        state.parked.insert(key)
    }

    /// Record a notification for the key; returns whether it was parked
    pub fn release(&self, key: &ObjectKey) -> bool {
        let mut state = self.lock();
        state.notified.insert(key.clone());
        state.parked.remove(key)
    }

    /// A worker picked the key up; earlier notifications are part of this pass
    pub fn begin_pass(&self, key: &ObjectKey) {
        self.lock().notified.remove(key);
    }

    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().parked.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().parked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply the retry policy to the outcome of one reconciliation
pub async fn handle_reconcile_result<K, R>(
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
    result: Result<(), R::Error>,
    reconciler: &R,
    max_retries: u32,
    given_up: &GivenUp,
    exhausted: &mpsc::Sender<RetryExhausted>,
) where
    K: Send + 'static,
    R: Reconcile<K>,
{
    let err = match result {
        Ok(()) => {
            queue.forget(key);
            return;
        }
        Err(err) => err,
    };

    let Some(attempts) = retry_or_give_up(queue, key, &err, max_retries) else {
        return;
    };
    if !given_up.park(key.clone()) {
        info!("🔁 {} changed during its last attempt, retrying", key);
    }

    reconciler.on_retries_exhausted(key, &err).await;

    let record = RetryExhausted {
        key: key.clone(),
        attempts,
        error: err.to_string(),
        at: chrono::Utc::now(),
    };
    match exhausted.try_send(record) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(record)) => {
            warn!(
                "Retry exhaustion channel is full, dropping report for {}",
                record.key
            );
        }
    }
}

/// Re-queue a failed key or give up on it
///
/// Returns the number of attempts made when the key was given up on.
fn retry_or_give_up(
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
    err: &dyn std::error::Error,
    max_retries: u32,
) -> Option<u32> {
    // Error span for reconciliation errors
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.key = %key,
        error = %err
    );
    let _error_guard = error_span.enter();
    metrics::increment_reconciliation_errors();

    let requeues = queue.num_requeues(key);
    if requeues < max_retries {
        warn!(
            "🔄 Reconciliation of {} failed: {} (retry {}/{}, trigger source: error-backoff)",
            key,
            err,
            requeues + 1,
            max_retries
        );
        queue.add_rate_limited(key.clone());
        return None;
    }

    error!(
        "❌ Giving up on {} after {} attempts: {}",
        key,
        requeues + 1,
        err
    );
    queue.forget(key);
    metrics::increment_retries_exhausted();
    Some(requeues + 1)
}
