//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / user agent name used for writes against the API server
pub const CONTROLLER_NAME: &str = "workshop-provisioner";

/// Finalizer placed on every WorkshopAttendee before any child is created
pub const ATTENDEE_FINALIZER: &str = "workshopattendee.finalizers.k8s.carsonoid.net";

/// Default prefix for the per-attendee namespace (`wa-<attendee>`)
pub const DEFAULT_NAMESPACE_PREFIX: &str = "wa-";

/// Name of the ServiceAccount and RoleBinding created in each attendee namespace
pub const ATTENDEE_SERVICE_ACCOUNT_NAME: &str = "attendee";

/// Name of the service account token Secret created in each attendee namespace
pub const ATTENDEE_TOKEN_SECRET_NAME: &str = "attendee-token";

/// Default ClusterRole bound to the attendee ServiceAccount
pub const DEFAULT_ATTENDEE_CLUSTER_ROLE: &str = "podlabeler";

/// Default workload Deployments provisioned for each attendee, in creation order
pub const DEFAULT_WORKLOAD_APPS: &[&str] = &["app1", "app2", "app3"];

/// Default container image for workload Deployments
pub const DEFAULT_WORKLOAD_IMAGE: &str = "nginx:1.12";

/// Replicas per workload Deployment
pub const WORKLOAD_REPLICAS: i32 = 2;

/// Default cluster address written into generated kubeconfigs
pub const DEFAULT_CLUSTER_ADDR: &str = "https://kubernetes";

/// Default number of concurrent reconciliation workers
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Consecutive failures after which a key is forgotten and surfaced to operators
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Per-item exponential backoff base delay (milliseconds)
pub const DEFAULT_QUEUE_BASE_DELAY_MS: u64 = 5;

/// Per-item exponential backoff cap (seconds)
pub const DEFAULT_QUEUE_MAX_DELAY_SECS: u64 = 1000;

/// Overall queue admission rate (tokens per second)
pub const DEFAULT_QUEUE_QPS: u32 = 10;

/// Overall queue admission burst
pub const DEFAULT_QUEUE_BURST: u32 = 100;

/// Default interval between full re-enqueues of every cached key (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default interval between namespace existence checks during teardown (seconds)
pub const DEFAULT_TEARDOWN_POLL_INTERVAL_SECS: u64 = 3;

/// Default upper bound on one teardown wait (seconds)
pub const DEFAULT_TEARDOWN_MAX_WAIT_SECS: u64 = 300;

/// Attempts for one read-mutate-write cycle before a conflict is returned
pub const DEFAULT_CONFLICT_RETRY_STEPS: u32 = 5;

/// Base delay between optimistic-concurrency attempts (milliseconds)
pub const CONFLICT_RETRY_BASE_DELAY_MS: u64 = 10;

/// Jitter factor applied to optimistic-concurrency delays
pub const CONFLICT_RETRY_JITTER: f64 = 0.1;

/// Default delay before re-establishing a failed watch stream (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default controller namespace when `POD_NAMESPACE` is not set
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "workshop-system";

/// Capacity of the operator-facing retry exhaustion channel
pub const RETRY_EXHAUSTED_CHANNEL_CAPACITY: usize = 256;

/// Time allowed for the HTTP server to bind at startup (seconds)
pub const SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Interval between HTTP server readiness checks at startup (milliseconds)
pub const SERVER_POLL_INTERVAL_MS: u64 = 50;
