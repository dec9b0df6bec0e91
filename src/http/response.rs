//! Response encoding.
//!
//! # Responsibilities
//! - Serialize a dispatcher reply to compact JSON
//! - Build the header intent (`:status`, content type, exact content length)
//! - Build the data intent carrying the body with END_STREAM
//!
//! # Design Decisions
//! - content-length is taken from the serialized bytes, never estimated
//! - Intents are plain values; queuing them on an engine is a separate step

use bytes::Bytes;

use crate::http::dispatcher::Reply;
use crate::protocol::{Header, ProtocolEngine, StreamId};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Value of the `server` response header.
pub const SERVER_NAME: &str = concat!("h2-telemetry/", env!("CARGO_PKG_VERSION"));

/// Outbound header block for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIntent {
    pub stream_id: StreamId,
    pub headers: Vec<Header>,
    pub end_stream: bool,
}

/// Outbound body for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntent {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub end_stream: bool,
}

/// Header and data intents answering one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse {
    pub headers: HeaderIntent,
    pub data: DataIntent,
}

impl EncodedResponse {
    /// Hand both intents to the engine, headers first.
    pub fn queue<E: ProtocolEngine + ?Sized>(&self, engine: &mut E) {
        engine.send_headers(self.headers.stream_id, &self.headers.headers, self.headers.end_stream);
        engine.send_data(self.data.stream_id, &self.data.data, self.data.end_stream);
    }

    /// The declared `content-length`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .headers
            .iter()
            .find(|h| h.name == "content-length")
            .and_then(|h| h.value.parse().ok())
    }
}

/// Turns dispatcher replies into outbound intents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn encode(stream_id: StreamId, reply: &Reply) -> EncodedResponse {
        // `Value`'s Display is infallible compact JSON.
        let body = Bytes::from(reply.payload.to_string());

        let headers = vec![
            Header::new(":status", reply.status.as_str()),
            Header::new("content-type", CONTENT_TYPE_JSON),
            Header::new("content-length", body.len().to_string()),
            Header::new("server", SERVER_NAME),
        ];

        EncodedResponse {
            headers: HeaderIntent {
                stream_id,
                headers,
                end_stream: false,
            },
            data: DataIntent {
                stream_id,
                data: body,
                end_stream: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    #[test]
    fn status_and_content_type_are_set() {
        let reply = Reply::new(StatusCode::OK, json!({ "status": "ok" }));
        let encoded = ResponseEncoder::encode(StreamId(3), &reply);

        let headers = &encoded.headers.headers;
        assert_eq!(headers[0], Header::new(":status", "200"));
        assert!(headers.contains(&Header::new("content-type", "application/json")));
        assert!(!encoded.headers.end_stream);
        assert!(encoded.data.end_stream);
        assert_eq!(encoded.data.stream_id, StreamId(3));
        assert_eq!(&encoded.data.data[..], br#"{"status":"ok"}"#);
    }

    #[test]
    fn content_length_matches_body_for_many_sizes() {
        for size in (0..=10_000).step_by(97).chain([10_000, 25_000]) {
            let reply = Reply::new(StatusCode::OK, json!({ "data": "a".repeat(size) }));
            let encoded = ResponseEncoder::encode(StreamId(1), &reply);
            assert_eq!(encoded.content_length(), Some(encoded.data.data.len()), "size {}", size);
        }
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let text = "température °C, 湿度 🌱".repeat(50);
        let reply = Reply::new(StatusCode::BAD_REQUEST, json!({ "error": text }));
        let encoded = ResponseEncoder::encode(StreamId(1), &reply);

        let body = std::str::from_utf8(&encoded.data.data).unwrap();
        assert!(body.chars().count() < body.len());
        assert_eq!(encoded.content_length(), Some(body.len()));
        assert_eq!(encoded.headers.headers[0].value, "400");
    }

    #[test]
    fn empty_payloads_still_declare_length() {
        let reply = Reply::new(StatusCode::OK, json!({}));
        let encoded = ResponseEncoder::encode(StreamId(1), &reply);
        assert_eq!(&encoded.data.data[..], b"{}");
        assert_eq!(encoded.content_length(), Some(2));
    }
}
