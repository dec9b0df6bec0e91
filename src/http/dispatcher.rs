//! Request dispatch.
//!
//! # Responsibilities
//! - Match (method, path) exactly against the telemetry routes
//! - Parse the body as arbitrary JSON and echo it back
//! - Convert every failure into a structured error reply
//!
//! # Design Decisions
//! - Bodies are generic `serde_json::Value`s; only top-level parseability is checked
//! - Dispatch is pure apart from logging and metrics

use http::{Method, StatusCode};
use serde_json::{json, Value};

use crate::observability::metrics;
use crate::stream::Request;

/// A handler result, ready to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub payload: Value,
}

impl Reply {
    pub fn new(status: StatusCode, payload: Value) -> Self {
        Self { status, payload }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, json!({ "error": "Not Found" }))
    }
}

/// An exact-match route accepting JSON bodies.
#[derive(Debug, Clone)]
struct Route {
    method: Method,
    path: &'static str,
    /// Label used in logs and metrics.
    name: &'static str,
    acknowledgement: &'static str,
}

/// Routes completed requests to their handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: Vec<Route>,
}

impl Dispatcher {
    /// Dispatcher serving `POST /sensor` and `POST /alert`.
    pub fn new() -> Self {
        Self {
            routes: vec![
                Route {
                    method: Method::POST,
                    path: "/sensor",
                    name: "sensor",
                    acknowledgement: "Sensor data received",
                },
                Route {
                    method: Method::POST,
                    path: "/alert",
                    name: "alert",
                    acknowledgement: "Alert data received",
                },
            ],
        }
    }

    pub fn dispatch_request(&self, request: &Request) -> Reply {
        self.dispatch(request.method(), request.path(), &request.body)
    }

    /// Map a completed request to a reply. Never fails.
    pub fn dispatch(&self, method: &str, path: &str, body: &[u8]) -> Reply {
        let route = self
            .routes
            .iter()
            .find(|r| r.method.as_str() == method && r.path == path);

        let Some(route) = route else {
            tracing::debug!(method = %method, path = %path, "No route matched");
            metrics::record_request("none", StatusCode::NOT_FOUND);
            return Reply::not_found();
        };

        let reply = match serde_json::from_slice::<Value>(body) {
            Ok(data) => {
                tracing::info!(route = route.name, data = %data, "Received {} data", route.name);
                Reply::new(
                    StatusCode::OK,
                    json!({ "status": route.acknowledgement, "data": data }),
                )
            }
            Err(e) => {
                tracing::warn!(route = route.name, error = %e, "Rejected malformed body");
                Reply::new(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": format!("Invalid JSON: {}", e) }),
                )
            }
        };
        metrics::record_request(route.name, reply.status);
        reply
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
