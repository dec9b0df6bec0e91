//! OS signal handling.

use crate::lifecycle::Shutdown;

/// Wait for Ctrl+C.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Trigger `shutdown` once Ctrl+C arrives.
pub fn trigger_on_ctrl_c(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        ctrl_c().await;
        shutdown.trigger();
    });
}
