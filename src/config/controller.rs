//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment;
/// the same keys are honoured by the ConfigMap hot reload.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Number of concurrent reconciliation workers
    pub worker_count: usize,
    /// Consecutive failures after which a key is given up on
    pub max_retries: u32,
    /// Per-key backoff base delay (milliseconds)
    pub queue_base_delay_ms: u64,
    /// Per-key backoff cap (seconds)
    pub queue_max_delay_secs: u64,
    /// Overall queue admission rate (keys per second)
    pub queue_qps: u32,
    /// Overall queue admission burst
    pub queue_burst: u32,
    /// Interval between full re-enqueues of every cached key (seconds)
    pub resync_interval_secs: u64,
    /// Interval between namespace existence checks during teardown (seconds)
    pub teardown_poll_interval_secs: u64,
    /// Upper bound on one teardown wait (seconds)
    pub teardown_max_wait_secs: u64,
    /// Attempts for one optimistic-concurrency status update
    pub conflict_retry_steps: u32,
    /// Delay before re-establishing a failed change feed (seconds)
    pub watch_restart_delay_secs: u64,
    /// Prefix of the per-attendee namespace
    pub namespace_prefix: String,
    /// ClusterRole bound to every attendee service account
    pub attendee_cluster_role: String,
    /// Workload Deployments created per attendee, in creation order
    pub workload_apps: Vec<String>,
    /// Container image of the workload Deployments
    pub workload_image: String,
    /// API server address written into generated kubeconfigs
    pub cluster_addr: String,
    /// Namespace where the controller is deployed
    pub controller_namespace: String,
    /// HTTP port for metrics and health probes
    pub metrics_port: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// ConfigMap to hot-reload configuration from, if any
    pub config_map_name: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_base_delay_ms: DEFAULT_QUEUE_BASE_DELAY_MS,
            queue_max_delay_secs: DEFAULT_QUEUE_MAX_DELAY_SECS,
            queue_qps: DEFAULT_QUEUE_QPS,
            queue_burst: DEFAULT_QUEUE_BURST,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            teardown_poll_interval_secs: DEFAULT_TEARDOWN_POLL_INTERVAL_SECS,
            teardown_max_wait_secs: DEFAULT_TEARDOWN_MAX_WAIT_SECS,
            conflict_retry_steps: DEFAULT_CONFLICT_RETRY_STEPS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            attendee_cluster_role: DEFAULT_ATTENDEE_CLUSTER_ROLE.to_string(),
            workload_apps: DEFAULT_WORKLOAD_APPS.iter().map(ToString::to_string).collect(),
            workload_image: DEFAULT_WORKLOAD_IMAGE.to_string(),
            cluster_addr: DEFAULT_CLUSTER_ADDR.to_string(),
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "INFO".to_string(),
            config_map_name: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_source(&|key| std::env::var(key).ok(), &Self::default())
    }

    /// Overlay ConfigMap data on top of this configuration
    ///
    /// Keys are matched case-insensitively against the environment variable
    /// names (`worker_count` and `WORKER_COUNT` both work). Keys absent from
    /// the data keep their current value.
    #[must_use]
    pub fn overlay(&self, data: &BTreeMap<String, String>) -> Self {
        let normalized: BTreeMap<String, &String> =
            data.iter().map(|(k, v)| (k.to_uppercase(), v)).collect();
        Self::from_source(&|key| normalized.get(key).map(|v| (*v).clone()), self)
    }

    fn from_source(source: &dyn Fn(&str) -> Option<String>, base: &Self) -> Self {
        Self {
            worker_count: var_or_default(source, "WORKER_COUNT", base.worker_count).max(1),
            max_retries: var_or_default(source, "MAX_RETRIES", base.max_retries),
            queue_base_delay_ms: var_or_default(
                source,
                "QUEUE_BASE_DELAY_MS",
                base.queue_base_delay_ms,
            ),
            queue_max_delay_secs: var_or_default(
                source,
                "QUEUE_MAX_DELAY_SECS",
                base.queue_max_delay_secs,
            ),
            queue_qps: var_or_default(source, "QUEUE_QPS", base.queue_qps),
            queue_burst: var_or_default(source, "QUEUE_BURST", base.queue_burst),
            resync_interval_secs: var_or_default(
                source,
                "RESYNC_INTERVAL_SECS",
                base.resync_interval_secs,
            ),
            teardown_poll_interval_secs: var_or_default(
                source,
                "TEARDOWN_POLL_INTERVAL_SECS",
                base.teardown_poll_interval_secs,
            ),
            teardown_max_wait_secs: var_or_default(
                source,
                "TEARDOWN_MAX_WAIT_SECS",
                base.teardown_max_wait_secs,
            ),
            conflict_retry_steps: var_or_default(
                source,
                "CONFLICT_RETRY_STEPS",
                base.conflict_retry_steps,
            )
            .max(1),
            watch_restart_delay_secs: var_or_default(
                source,
                "WATCH_RESTART_DELAY_SECS",
                base.watch_restart_delay_secs,
            ),
            namespace_prefix: var_or_default_str(source, "NAMESPACE_PREFIX", &base.namespace_prefix),
            attendee_cluster_role: var_or_default_str(
                source,
                "ATTENDEE_CLUSTER_ROLE",
                &base.attendee_cluster_role,
            ),
            workload_apps: var_or_default_list(source, "WORKLOAD_APPS", &base.workload_apps),
            workload_image: var_or_default_str(source, "WORKLOAD_IMAGE", &base.workload_image),
            cluster_addr: var_or_default_str(source, "CLUSTER_ADDR", &base.cluster_addr),
            controller_namespace: var_or_default_str(
                source,
                "POD_NAMESPACE",
                &base.controller_namespace,
            ),
            metrics_port: var_or_default(source, "METRICS_PORT", base.metrics_port),
            log_level: var_or_default_str(source, "LOG_LEVEL", &base.log_level),
            config_map_name: source("CONFIG_MAP_NAME")
                .filter(|v| !v.is_empty())
                .or_else(|| base.config_map_name.clone()),
        }
    }

    /// Get per-key backoff base duration
    pub fn queue_base_delay(&self) -> Duration {
        Duration::from_millis(self.queue_base_delay_ms)
    }

    /// Get per-key backoff cap duration
    pub fn queue_max_delay(&self) -> Duration {
        Duration::from_secs(self.queue_max_delay_secs)
    }

    /// Get resync interval duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get teardown poll interval duration
    pub fn teardown_poll_interval(&self) -> Duration {
        Duration::from_secs(self.teardown_poll_interval_secs)
    }

    /// Get teardown max wait duration
    pub fn teardown_max_wait(&self) -> Duration {
        Duration::from_secs(self.teardown_max_wait_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Namespace provisioned for an attendee
    pub fn attendee_namespace(&self, attendee: &str) -> String {
        format!("{}{}", self.namespace_prefix, attendee)
    }
}

/// Read variable or return default value
fn var_or_default<T: std::str::FromStr>(
    source: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    let Some(value) = source(key) else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(var = key, value = %value, "Invalid value, keeping the current setting");
            default
        }
    }
}

/// Read variable as string or return default
fn var_or_default_str(source: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    source(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read variable as comma separated list or return default
fn var_or_default_list(
    source: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &[String],
) -> Vec<String> {
    let parsed: Vec<String> = source(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        default.to_vec()
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ControllerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_source(&|key| vars.get(key).cloned(), &ControllerConfig::default())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = load(&[]);
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.workload_apps, vec!["app1", "app2", "app3"]);
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_values_are_parsed() {
        let config = load(&[
            ("WORKER_COUNT", "12"),
            ("TEARDOWN_POLL_INTERVAL_SECS", "1"),
            ("WORKLOAD_APPS", "web, api ,,worker"),
            ("NAMESPACE_PREFIX", "ws-"),
        ]);
        assert_eq!(config.worker_count, 12);
        assert_eq!(config.teardown_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.workload_apps, vec!["web", "api", "worker"]);
        assert_eq!(config.attendee_namespace("jane"), "ws-jane");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[("WORKER_COUNT", "many"), ("WORKLOAD_APPS", " , ")]);
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.workload_apps, vec!["app1", "app2", "app3"]);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_invalid_values_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || {
            load(&[("MAX_RETRIES", "lots"), ("QUEUE_QPS", "20")])
        });
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.queue_qps, 20);

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Invalid value"), "{logs}");
        assert!(logs.contains("MAX_RETRIES"), "{logs}");
        assert!(logs.contains("lots"), "{logs}");
        assert!(!logs.contains("QUEUE_QPS"), "{logs}");
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(load(&[("WORKER_COUNT", "0")]).worker_count, 1);
    }

    #[test]
    fn test_overlay_keeps_unset_keys() {
        let base = load(&[("CLUSTER_ADDR", "https://10.0.0.1")]);
        let data = BTreeMap::from([("workload_image".to_string(), "nginx:1.25".to_string())]);
        let overlaid = base.overlay(&data);
        assert_eq!(overlaid.workload_image, "nginx:1.25");
        assert_eq!(overlaid.cluster_addr, "https://10.0.0.1");
    }
}
