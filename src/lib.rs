//! HTTP/2 telemetry server and client library

pub mod config;
pub mod http;
pub mod net;
pub mod protocol;
pub mod stream;
pub mod telemetry;
pub mod server;
pub mod client;
pub mod lifecycle;
pub mod observability;

pub use client::TelemetryClient;
pub use config::schema::TelemetryConfig;
pub use lifecycle::Shutdown;
pub use server::TelemetryServer;
