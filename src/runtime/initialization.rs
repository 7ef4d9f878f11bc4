//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::{self, start_configmap_watch, ConfigHandle, ControllerConfig};
use crate::constants::{SERVER_POLL_INTERVAL_MS, SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::{LogNotifier, Reconciler, Stores};
use crate::controller::server::{start_server, ServerState};
use crate::crd::WorkshopAttendee;
use crate::observability;
use anyhow::{Context, Result};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Stores for every resource type the reconciler touches
    pub stores: Stores,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Current configuration snapshot (hot-reloadable)
    pub config: ConfigHandle,
    /// ConfigMap watch task, when hot reload is enabled
    pub config_watch: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_serving", &self.server_state.is_serving.load(Ordering::Relaxed))
            .field("hot_reload", &self.config_watch.is_some())
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("workshop_provisioner={}", log_level.to_lowercase()).into()),
        )
        .init();
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Startup summary of existing attendees
/// - ConfigMap hot reload
/// - Reconciler setup
///
/// Tracing must already be initialized.
pub async fn initialize(config: ControllerConfig, shutdown: CancellationToken) -> Result<InitializationResult> {
    // Must run before anything touches rustls; a provider installed
    // earlier in the process is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Workshop Provisioner");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let stores = Stores::kube(&client);

    summarize_existing_attendees(&stores).await?;

    let (publisher, handle) = config::channel(config.clone());
    let config_watch = match &config.config_map_name {
        Some(name) => {
            info!(
                "Hot-reload enabled: watching ConfigMap '{}' in namespace '{}'",
                name, config.controller_namespace
            );
            Some(start_configmap_watch(
                client.clone(),
                &config.controller_namespace,
                name,
                Arc::new(config.clone()),
                publisher,
                shutdown.clone(),
            ))
        }
        None => {
            info!("Hot-reload disabled (default) - configuration changes require pod restart");
            None
        }
    };

    let reconciler = Arc::new(Reconciler::new(
        stores.clone(),
        handle.clone(),
        Arc::new(LogNotifier),
        shutdown,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        stores,
        reconciler,
        server_state,
        config: handle,
        config_watch,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(server_state: &ServerState, server_handle: &JoinHandle<()>) -> Result<()> {
    let startup_timeout = Duration::from_secs(SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(SERVER_POLL_INTERVAL_MS);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_serving.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log a summary of the attendees present at startup
///
/// Also proves the CRD is installed and readable before the watch starts.
async fn summarize_existing_attendees(stores: &Stores) -> Result<()> {
    let attendees = stores
        .attendees
        .list()
        .await
        .context("Failed to list WorkshopAttendee resources (is the CRD installed?)")?;

    info!("Workshop Provisioner - Startup Resource Summary");
    info!("Resource Kind: WorkshopAttendee");
    info!("Total Resources: {}", attendees.len());
    for (state, names) in group_by_state(&attendees) {
        info!(
            "  {} ({}): {}",
            state,
            names.len(),
            if names.len() <= 3 {
                names.join(", ")
            } else {
                format!("{}, ... ({} total)", names[..3].join(", "), names.len())
            }
        );
    }
    observability::metrics::set_attendees_managed(attendees.len());
    Ok(())
}

fn group_by_state(attendees: &[WorkshopAttendee]) -> BTreeMap<String, Vec<String>> {
    let mut by_state: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for attendee in attendees {
        let state = attendee
            .status
            .as_ref()
            .and_then(|s| s.state)
            .map_or_else(|| "Unset".to_string(), |s| s.to_string());
        by_state.entry(state).or_default().push(attendee.name_any());
    }
    for names in by_state.values_mut() {
        names.sort();
    }
    by_state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AttendeePhase, WorkshopAttendeeSpec, WorkshopAttendeeStatus};

    #[test]
    fn test_group_by_state() {
        let mut ready = WorkshopAttendee::new("bob", WorkshopAttendeeSpec::default());
        ready.status = Some(WorkshopAttendeeStatus {
            state: Some(AttendeePhase::Ready),
            ..Default::default()
        });
        let attendees = vec![
            WorkshopAttendee::new("jane", WorkshopAttendeeSpec::default()),
            ready,
            WorkshopAttendee::new("alice", WorkshopAttendeeSpec::default()),
        ];
        let grouped = group_by_state(&attendees);
        assert_eq!(grouped["Unset"], vec!["alice", "jane"]);
        assert_eq!(grouped["Ready"], vec!["bob"]);
    }
}
