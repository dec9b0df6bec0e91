//! Stream multiplexing subsystem.
//!
//! # Data Flow
//! ```text
//! Event::RequestStarted / ResponseStarted
//!     → table.rs on_stream_started (Open)
//! Event::DataReceived
//!     → table.rs on_data_received (append + acknowledge)
//! Event::StreamEnded
//!     → table.rs on_stream_ended (Complete, removed)
//!     → message.rs Message snapshot → dispatcher / client caller
//! ```
//!
//! # Design Decisions
//! - One table per connection, owned by the connection task (no locks)
//! - Generic over the message head so server and client share the table

pub mod message;
pub mod table;

pub use message::{Message, MessageHead, ReceivedResponse, Request, RequestHead, ResponseHead};
pub use table::{Stream, StreamError, StreamState, StreamTable};
