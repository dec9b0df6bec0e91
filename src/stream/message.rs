//! Message heads and completed-stream snapshots.

use bytes::Bytes;

use crate::protocol::{find_header, Header, StreamId};

/// The part of a message extracted from its initiating header block.
pub trait MessageHead: Sized {
    fn from_headers(headers: &[Header]) -> Self;
}

/// Request line fields carried by `:method` and `:path`.
///
/// Missing pseudo-headers become empty strings, which no route matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
}

impl MessageHead for RequestHead {
    fn from_headers(headers: &[Header]) -> Self {
        Self {
            method: find_header(headers, ":method").unwrap_or_default().to_string(),
            path: find_header(headers, ":path").unwrap_or_default().to_string(),
        }
    }
}

/// Response status plus the full header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// `None` when `:status` is missing or not a number.
    pub status: Option<u16>,
    pub headers: Vec<Header>,
}

impl MessageHead for ResponseHead {
    fn from_headers(headers: &[Header]) -> Self {
        Self {
            status: find_header(headers, ":status").and_then(|s| s.parse().ok()),
            headers: headers.to_vec(),
        }
    }
}

/// Immutable snapshot of a completed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<H> {
    pub stream_id: StreamId,
    pub head: H,
    pub body: Bytes,
}

/// A fully received request, ready for dispatch.
pub type Request = Message<RequestHead>;

/// A fully received response (client side).
pub type ReceivedResponse = Message<ResponseHead>;

impl Request {
    pub fn method(&self) -> &str {
        &self.head.method
    }

    pub fn path(&self) -> &str {
        &self.head.path
    }
}

impl ReceivedResponse {
    pub fn status(&self) -> Option<u16> {
        self.head.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.head.headers, name)
    }
}
