//! Protocol engine subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     transport bytes
//!     → ProtocolEngine::decode (frame parsing, HPACK, CONTINUATION assembly)
//!     → Vec<Event> (RequestStarted, DataReceived, StreamEnded, ...)
//!     → stream table / connection driver
//!
//! Outbound:
//!     send_headers / send_data / acknowledge_received (queued intents)
//!     → ProtocolEngine::bytes_to_send
//!     → transport write
//! ```
//!
//! # Design Decisions
//! - Sans-I/O: the engine never touches a socket, drivers own all I/O
//! - Intents are queued and drained in batches, one write per read
//! - `FlowControl` is split out so the stream table only sees acknowledgements

pub mod engine;
pub mod error;
pub mod frame;

use bytes::Bytes;

pub use engine::{H2Engine, Role};
pub use error::ProtocolError;

/// Identifier of a stream within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// The connection control stream (stream 0).
    pub const CONNECTION: StreamId = StreamId(0);

    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A single decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Look up the first header with the given name.
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.as_str())
}

/// Events produced by decoding inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Peer opened a stream with a request header block (server side).
    RequestStarted { stream_id: StreamId, headers: Vec<Header> },
    /// Peer answered a stream with a response header block (client side).
    ResponseStarted { stream_id: StreamId, headers: Vec<Header> },
    /// A body chunk arrived. `flow_controlled_length` includes padding.
    DataReceived {
        stream_id: StreamId,
        data: Bytes,
        flow_controlled_length: usize,
    },
    /// Peer will send nothing more on this stream.
    StreamEnded { stream_id: StreamId },
    /// Peer aborted the stream.
    StreamReset { stream_id: StreamId, error_code: u32 },
    /// Peer is shutting the connection down.
    GoAway { last_stream_id: StreamId, error_code: u32 },
}

/// Replenishes the peer's send window for consumed data.
pub trait FlowControl {
    fn acknowledge_received(&mut self, stream_id: StreamId, length: usize);
}

/// A frame-level protocol engine driven by a connection task.
pub trait ProtocolEngine: FlowControl {
    /// Queue the handshake and return the bytes that must be sent first.
    fn initiate_connection(&mut self) -> Bytes;

    /// Feed raw bytes from the transport and collect the resulting events.
    ///
    /// Partial frames are buffered until the rest arrives. An error is fatal
    /// for the connection.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, ProtocolError>;

    fn send_headers(&mut self, stream_id: StreamId, headers: &[Header], end_stream: bool);

    fn send_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool);

    /// Drain all queued outbound frames.
    fn bytes_to_send(&mut self) -> Bytes;
}
