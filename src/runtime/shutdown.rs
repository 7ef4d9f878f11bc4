//! # Shutdown
//!
//! Turns process signals into a cancellation of the shared shutdown token.
//! Kubernetes stops pods with SIGTERM; Ctrl+C sends SIGINT when run locally.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `token` on the first SIGTERM or SIGINT
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right after the call is not lost.
pub fn shutdown_on_signal(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("Received Ctrl+C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
            () = token.cancelled() => return,
        }
        token.cancel();
    }))
}
