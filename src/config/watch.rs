//! # ConfigMap Watch
//!
//! Watches for ConfigMap changes and hot-reloads controller configuration.

use crate::config::{ConfigPublisher, ControllerConfig};
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration resulting from a ConfigMap overlaid on the startup configuration
///
/// A missing or empty ConfigMap yields the startup configuration unchanged.
#[must_use]
pub fn config_from_configmap(base: &ControllerConfig, configmap: &ConfigMap) -> ControllerConfig {
    match &configmap.data {
        Some(data) => base.overlay(data),
        None => base.clone(),
    }
}

/// Start watching for ConfigMap changes and hot-reload configuration
///
/// Watches the specified ConfigMap in the controller namespace. Every change
/// rebuilds a complete configuration from `base` (the startup configuration)
/// and the ConfigMap data, then publishes it as a new snapshot. Deleting the
/// ConfigMap reverts to `base`.
///
/// Settings that size the runtime (worker count, queue limiter, metrics port)
/// are read once at startup and only take effect after a restart.
pub fn start_configmap_watch(
    client: kube::Client,
    namespace: &str,
    configmap_name: &str,
    base: Arc<ControllerConfig>,
    publisher: ConfigPublisher,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let namespace = namespace.to_string();
    let configmap_name = configmap_name.to_string();
    tokio::spawn(async move {
        let configmaps: Api<ConfigMap> = Api::namespaced(client, &namespace);

        info!(
            "Starting watch for ConfigMap '{}' in namespace '{}'",
            configmap_name, namespace
        );

        // Only watch our ConfigMap
        let watcher_config =
            watcher::Config::default().fields(&format!("metadata.name={configmap_name}"));

        let stream = watcher(configmaps, watcher_config).default_backoff();
        pin_mut!(stream);

        info!("✅ ConfigMap watcher started - configuration will hot-reload on changes");

        loop {
            let event_result = tokio::select! {
                () = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(event_result) => event_result,
                    None => break,
                },
            };
            match event_result {
                Ok(watcher::Event::Apply(configmap) | watcher::Event::InitApply(configmap)) => {
                    info!(
                        "ConfigMap '{}' changed, reloading configuration...",
                        configmap_name
                    );
                    reload(&publisher, config_from_configmap(&base, &configmap));
                }
                Ok(watcher::Event::Delete(_)) => {
                    warn!(
                        "ConfigMap '{}' was deleted, reverting to startup configuration",
                        configmap_name
                    );
                    reload(&publisher, (*base).clone());
                }
                Ok(watcher::Event::Init | watcher::Event::InitDone) => {}
                Err(e) => {
                    error!("Error watching ConfigMap: {}", e);
                    // Continue watching - stream will retry automatically
                }
            }
        }

        info!("ConfigMap watch stopped");
    })
}

fn reload(publisher: &ConfigPublisher, config: ControllerConfig) {
    let summary = format!(
        "workers={}, resync={}s, teardown_poll={}s, teardown_max_wait={}s, apps={:?}",
        config.worker_count,
        config.resync_interval_secs,
        config.teardown_poll_interval_secs,
        config.teardown_max_wait_secs,
        config.workload_apps
    );
    if publisher.publish(config) {
        info!("✅ Configuration reloaded successfully");
        info!("  Controller config: {}", summary);
    } else {
        info!("Configuration unchanged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_configmap_data_overlays_base() {
        let base = ControllerConfig::default();
        let configmap = ConfigMap {
            data: Some(BTreeMap::from([
                ("TEARDOWN_MAX_WAIT_SECS".to_string(), "60".to_string()),
                ("attendee_cluster_role".to_string(), "viewer".to_string()),
            ])),
            ..Default::default()
        };
        let config = config_from_configmap(&base, &configmap);
        assert_eq!(config.teardown_max_wait_secs, 60);
        assert_eq!(config.attendee_cluster_role, "viewer");
        assert_eq!(config.worker_count, base.worker_count);
    }

    #[test]
    fn test_empty_configmap_yields_base() {
        let base = ControllerConfig {
            cluster_addr: "https://api.example".to_string(),
            ..Default::default()
        };
        assert_eq!(config_from_configmap(&base, &ConfigMap::default()), base);
    }

    #[test]
    fn test_reload_publishes_new_snapshot() {
        let (publisher, handle) = crate::config::channel(ControllerConfig::default());
        reload(
            &publisher,
            ControllerConfig {
                workload_image: "nginx:1.25".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(handle.current().workload_image, "nginx:1.25");
    }
}
