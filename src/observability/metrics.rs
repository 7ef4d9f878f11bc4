//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `workshop_provisioner_reconciliations_total` - Total number of reconciliations
//! - `workshop_provisioner_reconciliation_errors_total` - Total number of reconciliation errors
//! - `workshop_provisioner_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `workshop_provisioner_children_created_total` - Child resources created, by kind
//! - `workshop_provisioner_retries_exhausted_total` - Keys given up on after the retry budget
//! - `workshop_provisioner_queue_depth` - Keys waiting in the work queue
//! - `workshop_provisioner_queue_adds_total` - Keys added to the work queue
//! - `workshop_provisioner_requeues_total` - Rate-limited re-queues after a failure
//! - `workshop_provisioner_watch_errors_total` - Errors on the change feed
//! - `workshop_provisioner_notifications_total` - Completion notifications dispatched
//! - `workshop_provisioner_attendees_managed` - Attendees currently in the cache

use anyhow::{anyhow, Result};
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::{LazyLock, OnceLock};

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "workshop_provisioner_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 300.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CHILDREN_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "workshop_provisioner_children_created_total",
            "Total number of child resources created by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create CHILDREN_CREATED_TOTAL metric - this should never happen")
});

static RETRIES_EXHAUSTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_retries_exhausted_total",
        "Total number of keys dropped after exhausting their retries",
    )
    .expect("Failed to create RETRIES_EXHAUSTED_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "workshop_provisioner_queue_depth",
        "Current number of keys waiting in the work queue",
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static QUEUE_ADDS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_queue_adds_total",
        "Total number of keys added to the work queue",
    )
    .expect("Failed to create QUEUE_ADDS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_requeues_total",
        "Total number of rate-limited re-queues after a failed reconciliation",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static WATCH_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_watch_errors_total",
        "Total number of errors on the change feed",
    )
    .expect("Failed to create WATCH_ERRORS_TOTAL metric - this should never happen")
});

static NOTIFICATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workshop_provisioner_notifications_total",
        "Total number of completion notifications dispatched",
    )
    .expect("Failed to create NOTIFICATIONS_TOTAL metric - this should never happen")
});

static ATTENDEES_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "workshop_provisioner_attendees_managed",
        "Current number of attendees in the local cache",
    )
    .expect("Failed to create ATTENDEES_MANAGED metric - this should never happen")
});

static REGISTRATION: OnceLock<Result<(), String>> = OnceLock::new();

/// Register every metric with [`REGISTRY`]
///
/// Registration happens once per process; later calls return the outcome of
/// the first one.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRATION
        .get_or_init(|| register_all().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| anyhow!("Failed to register metrics: {e}"))
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CHILDREN_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RETRIES_EXHAUSTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(QUEUE_ADDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ATTENDEES_MANAGED.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_children_created(kind: &str) {
    CHILDREN_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_retries_exhausted() {
    RETRIES_EXHAUSTED_TOTAL.inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_queue_adds() {
    QUEUE_ADDS_TOTAL.inc();
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

pub fn increment_watch_errors() {
    WATCH_ERRORS_TOTAL.inc();
}

pub fn increment_notifications() {
    NOTIFICATIONS_TOTAL.inc();
}

pub fn set_attendees_managed(count: usize) {
    ATTENDEES_MANAGED.set(i64::try_from(count).unwrap_or(i64::MAX));
}
