//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting / stop issuing requests → Exit
//!
//! Signals (signals.rs):
//!     Ctrl+C → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Stopping the accept loop does not cut in-flight connections
//! - One broadcast channel, any number of subscribers

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
