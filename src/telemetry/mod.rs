//! Telemetry payload generation.
//!
//! # Responsibilities
//! - Allocate process-wide unique, strictly increasing message identifiers
//! - Produce synthetic sensor records with range-bounded readings
//!
//! # Design Decisions
//! - The identifier counter is the only state shared across connections;
//!   it lives behind an atomic allocator and is never exposed directly
//! - Random source and allocator are injectable for deterministic tests

pub mod message_id;
pub mod payload;

pub use message_id::{next_message_id, MessageId, MessageIdAllocator};
pub use payload::{
    generate_payload, generate_payload_with, ApplicationProtocol, Payload, PayloadParams,
    SensorReadings, TransportProtocol,
};
