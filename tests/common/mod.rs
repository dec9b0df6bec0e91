//! Shared utilities for integration tests.

use std::net::SocketAddr;

use h2_telemetry::config::TelemetryConfig;
use h2_telemetry::lifecycle::Shutdown;
use h2_telemetry::net::Listener;
use h2_telemetry::{TelemetryClient, TelemetryServer};
use tokio::net::TcpStream;

/// A telemetry server running on an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestServer {
    #[allow(dead_code)]
    pub async fn client(&self) -> TelemetryClient<TcpStream> {
        TelemetryClient::connect(&self.addr.to_string(), self.addr.to_string())
            .await
            .expect("server reachable")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a server with default settings on `127.0.0.1:0`.
pub async fn start_server() -> TestServer {
    let mut config = TelemetryConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();

    let listener = Listener::bind(&config.listener).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let shutdown = Shutdown::new();
    let server = TelemetryServer::new(config);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer { addr, shutdown }
}
