//! # Watch Loop
//!
//! [`Controller`] runs the reconciliation engine for one resource type:
//! notification bridge, local cache, work queue, a fixed pool of workers and a
//! periodic resync, all stopped by a single cancellation token.
//!
//! Startup order: bridge first, workers only once the cache has applied a
//! full listing. Shutdown order: bridge stops, the queue is shut down and
//! drained, then workers exit after their in-flight reconciliation.

use crate::config::ControllerConfig;
use crate::constants::RETRY_EXHAUSTED_CHANNEL_CAPACITY;
use crate::observability::metrics;
use crate::runtime::bridge::Bridge;
use crate::runtime::cache::{self, Cache, CacheWriter};
use crate::runtime::error_policy::GivenUp;
use crate::runtime::queue::{default_controller_rate_limiter, WorkQueue};
use crate::runtime::workers::{run_worker, WorkerContext};
use crate::runtime::{Reconcile, RetryExhausted};
use crate::store::{ObjectKey, ObjectStore};
use kube::Resource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Settings that size the engine; read once when the controller is built
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub worker_count: usize,
    pub max_retries: u32,
    pub queue_base_delay: Duration,
    pub queue_max_delay: Duration,
    pub queue_qps: u32,
    pub queue_burst: u32,
    /// Zero disables the periodic resync
    pub resync_interval: Duration,
    pub watch_restart_delay: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for RuntimeSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            max_retries: config.max_retries,
            queue_base_delay: config.queue_base_delay(),
            queue_max_delay: config.queue_max_delay(),
            queue_qps: config.queue_qps,
            queue_burst: config.queue_burst,
            resync_interval: config.resync_interval(),
            watch_restart_delay: config.watch_restart_delay(),
        }
    }
}

/// Reconciliation engine for one resource type
pub struct Controller<K, R> {
    store: Arc<dyn ObjectStore<K>>,
    reconciler: Arc<R>,
    settings: RuntimeSettings,
    cache: Cache<K>,
    writer: CacheWriter<K>,
    queue: WorkQueue<ObjectKey>,
    exhausted_tx: mpsc::Sender<RetryExhausted>,
    exhausted_rx: Option<mpsc::Receiver<RetryExhausted>>,
    ready: Option<Arc<AtomicBool>>,
}

impl<K, R> std::fmt::Debug for Controller<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("settings", &self.settings)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<K, R> Controller<K, R>
where
    K: Resource + Clone + Send + Sync + 'static,
    R: Reconcile<K>,
{
    pub fn new(store: Arc<dyn ObjectStore<K>>, reconciler: Arc<R>, settings: RuntimeSettings) -> Self {
        let (cache, writer) = cache::cache();
        let queue = WorkQueue::new(default_controller_rate_limiter(
            settings.queue_base_delay,
            settings.queue_max_delay,
            settings.queue_qps,
            settings.queue_burst,
        ));
        let (exhausted_tx, exhausted_rx) = mpsc::channel(RETRY_EXHAUSTED_CHANNEL_CAPACITY);
        Self {
            store,
            reconciler,
            settings,
            cache,
            writer,
            queue,
            exhausted_tx,
            exhausted_rx: Some(exhausted_rx),
            ready: None,
        }
    }

    /// Flag set once workers run and cleared on shutdown (readiness probe)
    #[must_use]
    pub fn with_ready_flag(mut self, ready: Arc<AtomicBool>) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Reader of the engine's cache
    pub fn cache(&self) -> Cache<K> {
        self.cache.clone()
    }

    /// The engine's work queue
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    /// Take the operator-facing feed of keys given up on
    ///
    /// Only the first call returns the receiver. When nobody takes it,
    /// reports are dropped.
    pub fn retries_exhausted(&mut self) -> Option<mpsc::Receiver<RetryExhausted>> {
        self.exhausted_rx.take()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            store,
            reconciler,
            settings,
            cache,
            writer,
            queue,
            exhausted_tx,
            exhausted_rx,
            ready,
        } = self;
        // Nobody listening: drop reports instead of filling the channel
        drop(exhausted_rx);

        let given_up = GivenUp::default();
        let filter_reconciler = Arc::clone(&reconciler);
        let bridge = Bridge::new(writer, queue.clone())
            .ignoring_updates(move |old, new| filter_reconciler.is_error_stamp_only(old, new))
            .releasing(given_up.clone());
        let bridge_handle = tokio::spawn(bridge.run(
            Arc::clone(&store),
            settings.watch_restart_delay,
            shutdown.clone(),
        ));

        info!("Waiting for the initial listing before starting workers...");
        let synced = tokio::select! {
            () = shutdown.cancelled() => false,
            synced = cache.wait_for_sync() => synced,
        };

        let mut workers = JoinSet::new();
        let mut resync = None;
        if synced {
            info!(
                "✅ Cache synced with {} object(s), starting {} worker(s)",
                cache.len(),
                settings.worker_count
            );
            metrics::set_attendees_managed(cache.len());
            let ctx = WorkerContext {
                queue: queue.clone(),
                cache: cache.clone(),
                reconciler,
                max_retries: settings.max_retries,
                given_up: given_up.clone(),
                exhausted: exhausted_tx,
            };
            for id in 0..settings.worker_count {
                workers.spawn(run_worker(id, ctx.clone()));
            }
            if !settings.resync_interval.is_zero() {
                resync = Some(tokio::spawn(run_resync(
                    cache.clone(),
                    queue.clone(),
                    given_up,
                    settings.resync_interval,
                    shutdown.clone(),
                )));
            }
            if let Some(ready) = &ready {
                ready.store(true, Ordering::Relaxed);
            }
        }

        shutdown.cancelled().await;
        info!("Shutdown requested, stopping controller...");
        if let Some(ready) = &ready {
            ready.store(false, Ordering::Relaxed);
        }

        if let Err(e) = bridge_handle.await {
            error!("Notification bridge task failed: {}", e);
        }
        if let Some(resync) = resync {
            if let Err(e) = resync.await {
                error!("Resync task failed: {}", e);
            }
        }

        info!("Waiting for in-flight reconciliations to complete...");
        queue.shut_down_with_drain().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Controller stopped");
    }
}

/// Re-enqueue every cached key at a fixed interval
///
/// Catches drift the change feed cannot report, such as child resources
/// deleted behind the controller's back. Keys given up on stay parked.
async fn run_resync<K>(
    cache: Cache<K>,
    queue: WorkQueue<ObjectKey>,
    given_up: GivenUp,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let keys = cache.keys();
        metrics::set_attendees_managed(keys.len());
        tracing::debug!("Resync: re-enqueuing {} key(s)", keys.len());
        for key in keys.into_iter().filter(|key| !given_up.contains(key)) {
            queue.add(key);
        }
    }
}
