//! Process-level helpers.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl-C (or SIGTERM on unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Cancel `cancel` once a shutdown signal arrives.
pub fn cancel_on_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, draining");
        cancel.cancel();
    });
}
