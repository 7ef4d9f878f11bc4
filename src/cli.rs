//! # Command Line
//!
//! Flags of the `workshop-provisioner` binary.
//!
//! Every flag is optional and falls back to its environment variable; when
//! neither is given the value loaded by [`ControllerConfig::from_env`] stays.
//!
//! ```bash
//! workshop-provisioner --workers 10 --cluster-addr https://k8s.example.com
//! ```

use crate::config::ControllerConfig;
use clap::Parser;

/// Provisions a namespace, credentials and workloads for every WorkshopAttendee
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "workshop-provisioner", version, about, long_about = None)]
pub struct Cli {
    /// Number of concurrent reconciliation workers
    #[arg(long = "workers", env = "WORKER_COUNT")]
    pub worker_count: Option<usize>,

    /// API server address written into attendee kubeconfigs
    #[arg(long, env = "CLUSTER_ADDR")]
    pub cluster_addr: Option<String>,

    /// Port of the metrics and probe server
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// ConfigMap in the controller namespace to hot-reload configuration from
    #[arg(long = "config-map", env = "CONFIG_MAP_NAME")]
    pub config_map_name: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given onto `config`
    #[must_use]
    pub fn apply(&self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(workers) = self.worker_count {
            config.worker_count = workers.max(1);
        }
        if let Some(addr) = &self.cluster_addr {
            config.cluster_addr.clone_from(addr);
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(name) = &self.config_map_name {
            config.config_map_name = Some(name.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "workshop-provisioner",
            "--workers",
            "3",
            "--cluster-addr",
            "https://k8s.example.com",
            "--config-map",
            "provisioner-config",
        ])
        .unwrap();
        let config = cli.apply(ControllerConfig::default());
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.cluster_addr, "https://k8s.example.com");
        assert_eq!(config.config_map_name.as_deref(), Some("provisioner-config"));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let base = ControllerConfig {
            worker_count: 7,
            ..ControllerConfig::default()
        };
        assert_eq!(Cli::default().apply(base.clone()), base);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let cli = Cli {
            worker_count: Some(0),
            ..Cli::default()
        };
        assert_eq!(cli.apply(ControllerConfig::default()).worker_count, 1);
    }
}
