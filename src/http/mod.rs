//! HTTP application layer.
//!
//! # Data Flow
//! ```text
//! Completed Request (method, path, body)
//!     → dispatcher.rs (route match, JSON parse)
//!     → Reply (status, JSON payload)
//!     → response.rs (serialize, header + data intents)
//!     → queued on the protocol engine
//! ```

pub mod dispatcher;
pub mod response;

pub use dispatcher::{Dispatcher, Reply};
pub use response::{DataIntent, EncodedResponse, HeaderIntent, ResponseEncoder};
