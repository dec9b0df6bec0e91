//! Telemetry server: accept loop and per-connection tasks.
//!
//! # Data Flow
//! ```text
//! Listener::accept (slot + ConnectionGuard: id, gauge)
//!     → spawned task: connection.rs serve_connection
//!         read → engine.decode → StreamTable → Dispatcher
//!         → ResponseEncoder → engine → write
//! ```
//!
//! # Design Decisions
//! - One task per connection; connections share only the dispatcher
//! - Shutdown stops accepting; connections already spawned run to EOF
//! - Failed accepts back off exponentially, capped at one second

pub mod connection;

pub use connection::{serve_connection, ConnectionError, ServerConnection};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;

use crate::config::TelemetryConfig;
use crate::http::Dispatcher;
use crate::net::{Listener, ListenerError};

const ACCEPT_BACKOFF_BASE_MS: u64 = 10;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1_000;

/// Delay before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let delay_ms = ACCEPT_BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(failures - 1))
        .min(ACCEPT_BACKOFF_MAX_MS);

    // Up to 10% jitter.
    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(delay_ms + jitter)
}

/// HTTP/2 telemetry server.
pub struct TelemetryServer {
    config: TelemetryConfig,
    dispatcher: Arc<Dispatcher>,
}

impl TelemetryServer {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
        }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "Telemetry server starting");
        let tracker = listener.tracker();
        let mut accept_failures = 0u32;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr, guard) = match accepted {
                        Ok(accepted) => {
                            accept_failures = 0;
                            accepted
                        }
                        Err(ListenerError::SlotsClosed) => return Err(ListenerError::SlotsClosed),
                        Err(e) => {
                            accept_failures = accept_failures.saturating_add(1);
                            let delay = accept_backoff(accept_failures);
                            tracing::warn!(error = %e, failures = accept_failures, retry_in_ms = delay.as_millis() as u64, "Accept failed");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                    }

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let connection_config = self.config.connection.clone();

                    tokio::spawn(async move {
                        let id = guard.id();
                        tracing::info!(connection_id = %id, peer_addr = %peer_addr, "Connection opened");

                        match serve_connection(stream, dispatcher, &connection_config, id).await {
                            Ok(()) => tracing::info!(connection_id = %id, "Connection closed"),
                            Err(e) => tracing::warn!(connection_id = %id, error = %e, "Connection closed with error"),
                        }
                        drop(guard);
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!(
                        active_connections = tracker.active_count(),
                        "Shutdown requested, no longer accepting connections"
                    );
                    break;
                }
            }
        }

        tracing::info!("Telemetry server stopped");
        Ok(())
    }
}
