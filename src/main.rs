//! HTTP/2 telemetry server
//!
//! Accepts prior-knowledge HTTP/2 over TCP and answers JSON telemetry posts.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                 TELEMETRY SERVER                   │
//!                        │                                                    │
//!     Client bytes       │  ┌─────────┐    ┌──────────┐    ┌──────────────┐   │
//!     ───────────────────┼─▶│   net   │───▶│ protocol │───▶│    stream    │   │
//!                        │  │listener │    │  engine  │    │    table     │   │
//!                        │  └─────────┘    └──────────┘    └──────┬───────┘   │
//!                        │                                        │           │
//!                        │                                        ▼           │
//!     Response bytes     │  ┌─────────┐    ┌──────────┐    ┌──────────────┐   │
//!     ◀──────────────────┼──│ server  │◀───│ response │◀───│  dispatcher  │   │
//!                        │  │  conn   │    │ encoder  │    │ /sensor      │   │
//!                        │  └─────────┘    └──────────┘    │ /alert       │   │
//!                        │                                 └──────────────┘   │
//!                        │  ┌──────────────────────────────────────────────┐  │
//!                        │  │ config · observability · lifecycle           │  │
//!                        │  └──────────────────────────────────────────────┘  │
//!                        └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use h2_telemetry::config::{load_config, validation::validate_config, TelemetryConfig};
use h2_telemetry::lifecycle::{signals, Shutdown};
use h2_telemetry::net::Listener;
use h2_telemetry::observability::{logging, metrics};
use h2_telemetry::TelemetryServer;

#[derive(Parser)]
#[command(name = "h2-telemetry")]
#[command(about = "HTTP/2 telemetry ingestion server", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TelemetryConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
        if let Err(errors) = validate_config(&config) {
            return Err(h2_telemetry::config::ConfigError::Validation(errors).into());
        }
    }

    logging::init_logging(&config.observability.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "h2-telemetry starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        read_buffer_size = config.connection.read_buffer_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    signals::trigger_on_ctrl_c(&shutdown);

    let server = TelemetryServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
