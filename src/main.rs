//! # Workshop Provisioner
//!
//! A Kubernetes controller that gives every workshop attendee an isolated,
//! ready-to-use environment.
//!
//! ## Overview
//!
//! For each `WorkshopAttendee` resource the controller:
//!
//! 1. **Creates a namespace** - `wa-<attendee>` holding everything else
//! 2. **Issues credentials** - a ServiceAccount, its token Secret and a RoleBinding
//! 3. **Deploys workloads** - one Deployment per configured app
//! 4. **Publishes a kubeconfig** - in the attendee status, then notifies the attendee
//! 5. **Cleans up** - deleting the attendee tears the namespace down before the
//!    finalizer is released
//!
//! ## Features
//!
//! - **Level-triggered**: every pass re-checks all children, so externally
//!   deleted resources are recreated on the next resync
//! - **Rate-limited retries**: failed attendees back off exponentially and are
//!   surfaced to operators once their retries are exhausted
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use workshop_provisioner::cli::Cli;
use workshop_provisioner::config::ControllerConfig;
use workshop_provisioner::runtime::initialization::{init_tracing, initialize};
use workshop_provisioner::runtime::shutdown::shutdown_on_signal;
use workshop_provisioner::runtime::{Controller, RuntimeSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.apply(ControllerConfig::from_env());
    init_tracing(&config.log_level);

    let shutdown = CancellationToken::new();
    let init = initialize(config.clone(), shutdown.clone()).await?;

    let signals = shutdown_on_signal(shutdown.clone()).context("Failed to install signal handlers")?;

    let mut controller = Controller::new(
        Arc::clone(&init.stores.attendees),
        Arc::clone(&init.reconciler),
        RuntimeSettings::from(&config),
    )
    .with_ready_flag(Arc::clone(&init.server_state.is_ready));

    if let Some(mut exhausted) = controller.retries_exhausted() {
        tokio::spawn(async move {
            while let Some(report) = exhausted.recv().await {
                error!(
                    resource.key = %report.key,
                    attempts = report.attempts,
                    at = %report.at,
                    "🚨 Attendee needs operator attention: {}",
                    report.error
                );
            }
        });
    }

    controller.run(shutdown).await;

    if let Err(e) = signals.await {
        error!("Signal listener task failed: {}", e);
    }
    if let Some(watch) = init.config_watch {
        if let Err(e) = watch.await {
            error!("ConfigMap watch task failed: {}", e);
        }
    }
    info!("Workshop Provisioner stopped");
    Ok(())
}
