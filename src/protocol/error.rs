//! Protocol error definitions.

use thiserror::Error;

use crate::protocol::frame::error_code;

/// Connection-fatal protocol errors.
///
/// All but `StreamIdsExhausted` are raised while decoding inbound frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The client did not open with the HTTP/2 connection preface.
    #[error("invalid connection preface")]
    BadPreface,

    /// A frame exceeded the advertised maximum frame size or had a bad length.
    #[error("frame size error: {0}")]
    FrameSize(String),

    /// Frame sequence or content violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The HPACK header block could not be decoded.
    #[error("header compression error: {0}")]
    Compression(String),

    /// A WINDOW_UPDATE or SETTINGS change pushed a send window past 2^31 - 1.
    #[error("flow control error: {0}")]
    FlowControl(String),

    /// This side has used every stream identifier it may open.
    #[error("stream identifiers exhausted")]
    StreamIdsExhausted,
}

impl ProtocolError {
    /// GOAWAY error code reported to the peer for this error.
    pub fn error_code(&self) -> u32 {
        match self {
            ProtocolError::BadPreface | ProtocolError::Protocol(_) => error_code::PROTOCOL_ERROR,
            ProtocolError::FrameSize(_) => error_code::FRAME_SIZE_ERROR,
            ProtocolError::Compression(_) => error_code::COMPRESSION_ERROR,
            ProtocolError::FlowControl(_) => error_code::FLOW_CONTROL_ERROR,
            ProtocolError::StreamIdsExhausted => error_code::NO_ERROR,
        }
    }
}
