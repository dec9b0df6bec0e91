//! Telemetry client.
//!
//! # Data Flow
//! ```text
//! generate_payload (telemetry)
//!     → serde_json body
//!     → connection.rs send_request (HEADERS + DATA on the next odd stream)
//!     → read loop: engine.decode → StreamTable<ResponseHead>
//!     → ReceivedResponse on the awaited stream's end
//! ```

pub mod connection;

pub use connection::{ClientError, RunOptions, TelemetryClient};
