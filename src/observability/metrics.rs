//! Metrics collection and exposition.
//!
//! # Metrics
//! - `telemetry_requests_total` (counter): dispatched requests by route, status
//! - `telemetry_active_connections` (gauge): current connection count
//! - `telemetry_protocol_errors_total` (counter): connections closed by decode errors
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op without an exporter
//! - Prometheus exporter is opt-in via config

use std::net::SocketAddr;

use http::StatusCode;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &'static str, status: StatusCode) {
    metrics::counter!(
        "telemetry_requests_total",
        "route" => route,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

pub fn record_connection_opened() {
    metrics::gauge!("telemetry_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("telemetry_active_connections").decrement(1.0);
}

pub fn record_protocol_error() {
    metrics::counter!("telemetry_protocol_errors_total").increment(1);
}
