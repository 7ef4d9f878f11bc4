//! # Runtime
//!
//! The generic reconciliation engine and the controller process lifecycle.
//!
//! ```text
//! change feed -> bridge -> cache + work queue -> workers -> Reconcile impl
//!                                  ^                 |
//!                                  +- error policy <-+
//! ```
//!
//! - `cache.rs` - Local indexed cache fed by the bridge
//! - `queue/` - Deduplicating, rate-limited work queue
//! - `bridge.rs` - Translates change notifications into cache updates and enqueues
//! - `workers.rs` - Worker pull loop
//! - `error_policy.rs` - Retry or give up after a failed reconciliation
//! - `watch_loop.rs` - [`Controller`] wiring everything together
//! - `initialization.rs` - Process startup (tracing, metrics, server, client)
//! - `shutdown.rs` - SIGTERM / Ctrl+C to cancellation token

pub mod bridge;
pub mod cache;
pub mod error_policy;
pub mod initialization;
pub mod queue;
pub mod shutdown;
pub mod watch_loop;
pub mod workers;

pub use bridge::{should_enqueue_update, Bridge, ResourceEvent};
pub use cache::{Cache, CacheWriter};
pub use error_policy::GivenUp;
pub use queue::WorkQueue;
pub use watch_loop::{Controller, RuntimeSettings};

use crate::store::ObjectKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Business logic driven by the engine
///
/// Implementations must be safe to call concurrently for distinct keys; the
/// engine guarantees the same key is never reconciled twice at once. Every
/// call receives an owned copy of the cached object.
#[async_trait]
pub trait Reconcile<K>: Send + Sync + 'static
where
    K: Send + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Converge an object that carries no deletion marker
    async fn reconcile(&self, obj: K) -> Result<(), Self::Error>;

    /// Tear down an object that carries a deletion marker
    async fn cleanup(&self, obj: K) -> Result<(), Self::Error>;

    /// Called once when a key is given up on after exhausting its retries
    async fn on_retries_exhausted(&self, _key: &ObjectKey, _error: &Self::Error) {}

    /// Whether an update only changed bookkeeping written by `on_retries_exhausted`
    ///
    /// Such updates are not enqueued, so giving up on a key stays final until
    /// the object changes for some other reason.
    fn is_error_stamp_only(&self, _old: &K, _new: &K) -> bool {
        false
    }
}

/// A key the engine stopped retrying, as reported to operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub key: ObjectKey,
    /// Reconciliation attempts made, including the first one
    pub attempts: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}
