//! # Workers
//!
//! Pull loop shared by every reconciliation worker: `get` -> reconcile ->
//! error policy -> `done`, until the queue shuts down.

use crate::observability::metrics;
use crate::runtime::cache::Cache;
use crate::runtime::error_policy::{handle_reconcile_result, GivenUp};
use crate::runtime::queue::WorkQueue;
use crate::runtime::{Reconcile, RetryExhausted};
use crate::store::{is_marked_for_deletion, version_of, ObjectKey};
use kube::Resource;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

/// Everything a worker needs, shared by the whole pool
pub struct WorkerContext<K, R> {
    pub queue: WorkQueue<ObjectKey>,
    pub cache: Cache<K>,
    pub reconciler: Arc<R>,
    pub max_retries: u32,
    pub given_up: GivenUp,
    pub exhausted: mpsc::Sender<RetryExhausted>,
}

impl<K, R> Clone for WorkerContext<K, R> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            reconciler: Arc::clone(&self.reconciler),
            max_retries: self.max_retries,
            given_up: self.given_up.clone(),
            exhausted: self.exhausted.clone(),
        }
    }
}

impl<K, R> std::fmt::Debug for WorkerContext<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Run one worker until the queue is shut down and drained
pub async fn run_worker<K, R>(id: usize, ctx: WorkerContext<K, R>)
where
    K: Resource + Clone + Send + Sync + 'static,
    R: Reconcile<K>,
{
    debug!(worker = id, "Worker started");
    while process_next_item(&ctx).await {}
    debug!(worker = id, "Worker stopped");
}

/// Process one key from the queue
///
/// Returns `false` once the queue has shut down.
pub async fn process_next_item<K, R>(ctx: &WorkerContext<K, R>) -> bool
where
    K: Resource + Clone + Send + Sync + 'static,
    R: Reconcile<K>,
{
    let Some(key) = ctx.queue.get().await else {
        return false;
    };
    // Backoff timers scheduled before giving up may still fire
    if ctx.given_up.contains(&key) {
        debug!(resource.key = %key, "Given up on, skipping until it changes");
        ctx.queue.done(&key);
        return true;
    }
    ctx.given_up.begin_pass(&key);

    let result = reconcile_key(&key, &ctx.cache, ctx.reconciler.as_ref()).await;
    handle_reconcile_result(
        &ctx.queue,
        &key,
        result,
        ctx.reconciler.as_ref(),
        ctx.max_retries,
        &ctx.given_up,
        &ctx.exhausted,
    )
    .await;
    ctx.queue.done(&key);
    true
}

async fn reconcile_key<K, R>(key: &ObjectKey, cache: &Cache<K>, reconciler: &R) -> Result<(), R::Error>
where
    K: Resource + Clone + Send + Sync + 'static,
    R: Reconcile<K>,
{
    let Some(cached) = cache.get(key) else {
        debug!(resource.key = %key, "Not in cache, already deleted");
        return Ok(());
    };
    // Reconcilers get their own copy, never the cache's shared one
    let obj = K::clone(&cached);
    drop(cached);

    let span = tracing::info_span!(
        "reconcile",
        resource.key = %key,
        resource.version = %version_of(&obj),
    );
    metrics::increment_reconciliations();
    let started = Instant::now();
    let result = if is_marked_for_deletion(&obj) {
        reconciler.cleanup(obj).instrument(span).await
    } else {
        reconciler.reconcile(obj).instrument(span).await
    };
    metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());
    result
}
