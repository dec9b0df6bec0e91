use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use h2_telemetry::client::{RunOptions, TelemetryClient};
use h2_telemetry::config::{load_config, TelemetryConfig};
use h2_telemetry::lifecycle::{signals, Shutdown};
use h2_telemetry::observability::logging;

#[derive(Parser)]
#[command(name = "telemetry-client")]
#[command(about = "Posts synthetic sensor telemetry to an HTTP/2 server", long_about = None)]
struct Cli {
    /// TOML configuration file; the `[client]` section is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address, e.g. 127.0.0.1:8080.
    #[arg(short, long)]
    server: Option<String>,

    /// Request path (`/sensor` or `/alert`).
    #[arg(short, long)]
    path: Option<String>,

    /// Pause between requests.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many requests.
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Node identifier placed in each payload.
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TelemetryConfig::default(),
    };
    logging::init_logging(&config.observability.log_filter);

    let mut client_config = config.client;
    if let Some(server) = cli.server {
        client_config.server_address = server;
    }
    if let Some(path) = cli.path {
        client_config.path = path;
    }
    if let Some(node_id) = cli.node_id {
        client_config.node_id = node_id;
    }

    let mut options = RunOptions::from_config(&client_config);
    if let Some(interval_ms) = cli.interval_ms {
        options.interval = Duration::from_millis(interval_ms.max(1));
    }
    options.max_requests = cli.count;

    let shutdown = Shutdown::new();
    signals::trigger_on_ctrl_c(&shutdown);
    let mut stop = shutdown.subscribe();

    tracing::info!(
        server = %client_config.server_address,
        path = %options.path,
        interval_ms = options.interval.as_millis() as u64,
        "Connecting"
    );
    let mut client =
        TelemetryClient::connect(&client_config.server_address, client_config.authority).await?;

    let sent = client.run(&options, &mut stop).await?;
    client.close().await?;

    tracing::info!(sent, "Client finished");
    Ok(())
}
