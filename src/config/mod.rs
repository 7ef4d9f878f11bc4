//! # Configuration
//!
//! Controller configuration and its distribution to running components.
//!
//! - `controller.rs` - [`ControllerConfig`] loaded from environment variables
//! - `watch.rs` - ConfigMap watch that hot-reloads the configuration
//!
//! Components never share a mutable configuration. They hold a [`ConfigHandle`]
//! and read the current immutable snapshot at the start of each unit of work;
//! a reload replaces the snapshot atomically through a [`ConfigPublisher`].

mod controller;
mod watch;

pub use controller::ControllerConfig;
pub use watch::{config_from_configmap, start_configmap_watch};

use std::sync::Arc;

/// Read side of the configuration snapshot
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    rx: tokio::sync::watch::Receiver<Arc<ControllerConfig>>,
}

impl ConfigHandle {
    /// Handle to a configuration that never changes
    #[must_use]
    pub fn fixed(config: ControllerConfig) -> Self {
        let (_, handle) = channel(config);
        handle
    }

    /// The current snapshot
    #[must_use]
    pub fn current(&self) -> Arc<ControllerConfig> {
        Arc::clone(&self.rx.borrow())
    }
}

/// Write side of the configuration snapshot
#[derive(Debug)]
pub struct ConfigPublisher {
    tx: tokio::sync::watch::Sender<Arc<ControllerConfig>>,
}

impl ConfigPublisher {
    /// Replace the snapshot; returns whether anything changed
    pub fn publish(&self, config: ControllerConfig) -> bool {
        self.tx.send_if_modified(|current| {
            if **current == config {
                false
            } else {
                *current = Arc::new(config);
                true
            }
        })
    }

    #[must_use]
    pub fn current(&self) -> Arc<ControllerConfig> {
        Arc::clone(&self.tx.borrow())
    }

    #[must_use]
    pub fn subscribe(&self) -> ConfigHandle {
        ConfigHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a publisher / handle pair seeded with `initial`
#[must_use]
pub fn channel(initial: ControllerConfig) -> (ConfigPublisher, ConfigHandle) {
    let (tx, rx) = tokio::sync::watch::channel(Arc::new(initial));
    (ConfigPublisher { tx }, ConfigHandle { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_handle_outlives_publisher() {
        let handle = ConfigHandle::fixed(ControllerConfig {
            worker_count: 3,
            ..Default::default()
        });
        assert_eq!(handle.current().worker_count, 3);
    }

    #[test]
    fn test_publish_replaces_snapshot_atomically() {
        let (publisher, handle) = channel(ControllerConfig::default());
        let before = handle.current();

        assert!(publisher.publish(ControllerConfig {
            cluster_addr: "https://10.1.1.1".to_string(),
            ..Default::default()
        }));

        // Old snapshot is untouched, new readers see the new one
        assert_eq!(before.cluster_addr, crate::constants::DEFAULT_CLUSTER_ADDR);
        assert_eq!(handle.current().cluster_addr, "https://10.1.1.1");
    }

    #[test]
    fn test_publish_same_config_is_noop() {
        let (publisher, _handle) = channel(ControllerConfig::default());
        assert!(!publisher.publish(ControllerConfig::default()));
    }
}
