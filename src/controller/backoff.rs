//! # Conflict Backoff
//!
//! Bounded retry schedule for optimistic-concurrency writes.
//!
//! A write rejected because the version token went stale is retried by
//! re-running the whole read-mutate-write cycle, after a short jittered
//! delay. The schedule mirrors the retry used by Kubernetes clients for
//! status updates: a fixed number of attempts 10ms apart, plus up to 10% jitter.
//!
//! ## Usage
//!
//! ```rust
//! use workshop_provisioner::controller::backoff::ConflictBackoff;
//!
//! let mut backoff = ConflictBackoff::new(3, std::time::Duration::from_millis(10), 0.0);
//! assert!(backoff.next_delay().is_some()); // attempt 2
//! assert!(backoff.next_delay().is_some()); // attempt 3
//! assert!(backoff.next_delay().is_none()); // out of attempts
//! ```

use crate::constants::{CONFLICT_RETRY_BASE_DELAY_MS, CONFLICT_RETRY_JITTER, DEFAULT_CONFLICT_RETRY_STEPS};
use crate::store::StoreResult;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry schedule for optimistic-concurrency conflicts
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    /// Total attempts, including the first one
    steps: u32,
    /// Delay between attempts before jitter
    base: Duration,
    /// Extra delay as a fraction of `base`, drawn uniformly from `0..=jitter`
    jitter: f64,
    /// Attempts made so far
    attempt: u32,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONFLICT_RETRY_STEPS,
            Duration::from_millis(CONFLICT_RETRY_BASE_DELAY_MS),
            CONFLICT_RETRY_JITTER,
        )
    }
}

impl ConflictBackoff {
    #[must_use]
    pub fn new(steps: u32, base: Duration, jitter: f64) -> Self {
        Self {
            steps: steps.max(1),
            base,
            jitter: jitter.max(0.0),
            attempt: 1,
        }
    }

    /// Default schedule with a custom number of attempts
    #[must_use]
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps: steps.max(1),
            ..Self::default()
        }
    }

    /// Delay before the next attempt, or `None` once every attempt is used
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.steps {
            return None;
        }
        self.attempt += 1;
        if self.jitter == 0.0 {
            return Some(self.base);
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        Some(self.base.mul_f64(1.0 + extra))
    }

    /// Attempts made so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Run `operation` until it succeeds, fails with something other than a
/// conflict, or the schedule runs out
///
/// The operation must re-read the latest copy on every call; retrying a
/// write of the same stale object can never succeed.
pub async fn retry_on_conflict<T, F, Fut>(mut backoff: ConflictBackoff, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    loop {
        match operation().await {
            Err(e) if e.is_conflict() => match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        "Write conflict, retrying with the latest copy"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            other => return other,
        }
    }
}
