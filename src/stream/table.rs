//! Per-connection stream table.
//!
//! # Responsibilities
//! - Track every stream that is still accumulating a message
//! - Append body chunks in delivery order and acknowledge them
//! - Hand the completed message off exactly once
//!
//! # Design Decisions
//! - Table operations are the only mutators of stream state
//! - Unknown or duplicate identifiers are reported, never panicked on
//! - A stream leaves the table the instant it completes or is reset

use std::collections::HashMap;

use bytes::BytesMut;
use thiserror::Error;

use crate::protocol::{FlowControl, Header, StreamId};
use crate::stream::message::{Message, MessageHead};

/// Errors for events that do not match the table's contents.
///
/// None of these are fatal for the connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// A stream with this identifier is already open.
    #[error("{0} is already open")]
    Duplicate(StreamId),

    /// No open stream has this identifier.
    #[error("{0} is not open")]
    Unknown(StreamId),
}

/// Lifecycle of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Headers seen, body accumulating.
    Open,
    /// Terminal event seen; the stream has left the table.
    Complete,
}

/// A stream accumulating one message.
#[derive(Debug)]
pub struct Stream<H> {
    id: StreamId,
    head: H,
    body: BytesMut,
    state: StreamState,
}

impl<H> Stream<H> {
    fn open(id: StreamId, head: H) -> Self {
        Self {
            id,
            head,
            body: BytesMut::new(),
            state: StreamState::Open,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn head(&self) -> &H {
        &self.head
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Bytes received so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn complete(mut self) -> Message<H> {
        self.state = StreamState::Complete;
        tracing::trace!(stream_id = %self.id, state = ?self.state, body_len = self.body.len(), "Stream complete");
        Message {
            stream_id: self.id,
            head: self.head,
            body: self.body.freeze(),
        }
    }
}

/// Map from stream identifier to in-flight stream.
#[derive(Debug)]
pub struct StreamTable<H> {
    streams: HashMap<StreamId, Stream<H>>,
}

impl<H: MessageHead> StreamTable<H> {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    /// Open a stream from its initiating header block.
    ///
    /// A duplicate identifier leaves the existing stream untouched.
    pub fn on_stream_started(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
    ) -> Result<(), StreamError> {
        if self.streams.contains_key(&stream_id) {
            return Err(StreamError::Duplicate(stream_id));
        }
        self.streams
            .insert(stream_id, Stream::open(stream_id, H::from_headers(headers)));
        Ok(())
    }

    /// Append a body chunk and acknowledge its flow-controlled length.
    ///
    /// The acknowledgement happens even when the chunk is dropped, so the
    /// peer's connection window never shrinks permanently.
    pub fn on_data_received<F: FlowControl + ?Sized>(
        &mut self,
        stream_id: StreamId,
        chunk: &[u8],
        flow_controlled_length: usize,
        flow: &mut F,
    ) -> Result<(), StreamError> {
        flow.acknowledge_received(stream_id, flow_controlled_length);
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::Unknown(stream_id))?;
        stream.body.extend_from_slice(chunk);
        Ok(())
    }

    /// Remove a stream on its terminal event and return its snapshot.
    pub fn on_stream_ended(&mut self, stream_id: StreamId) -> Result<Message<H>, StreamError> {
        self.streams
            .remove(&stream_id)
            .map(Stream::complete)
            .ok_or(StreamError::Unknown(stream_id))
    }

    /// Drop a stream the peer reset. Returns whether it was open.
    pub fn on_stream_reset(&mut self, stream_id: StreamId) -> bool {
        self.streams.remove(&stream_id).is_some()
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&Stream<H>> {
        self.streams.get(&stream_id)
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Discard every unfinished stream. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.streams.len();
        self.streams.clear();
        dropped
    }
}

impl<H: MessageHead> Default for StreamTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::message::{RequestHead, ResponseHead};

    /// Records every acknowledgement instead of writing frames.
    #[derive(Default)]
    struct AckLog(Vec<(StreamId, usize)>);

    impl FlowControl for AckLog {
        fn acknowledge_received(&mut self, stream_id: StreamId, length: usize) {
            self.0.push((stream_id, length));
        }
    }

    fn post(path: &str) -> Vec<Header> {
        vec![Header::new(":method", "POST"), Header::new(":path", path)]
    }

    #[test]
    fn interleaved_streams_reassemble_independently() {
        let mut table = StreamTable::<RequestHead>::new();
        let mut acks = AckLog::default();
        let (a, b, c) = (StreamId(1), StreamId(3), StreamId(5));

        table.on_stream_started(b, &post("/alert")).unwrap();
        table.on_stream_started(a, &post("/sensor")).unwrap();
        table.on_data_received(a, b"{\"x\":", 5, &mut acks).unwrap();
        table.on_data_received(b, b"[1,", 3, &mut acks).unwrap();
        table.on_stream_started(c, &post("/sensor")).unwrap();
        table.on_data_received(a, b"1}", 2, &mut acks).unwrap();
        table.on_data_received(b, b"2]", 2, &mut acks).unwrap();

        let done_b = table.on_stream_ended(b).unwrap();
        assert_eq!(&done_b.body[..], b"[1,2]");
        assert_eq!(done_b.path(), "/alert");

        table.on_data_received(c, b"null", 4, &mut acks).unwrap();
        let done_a = table.on_stream_ended(a).unwrap();
        let done_c = table.on_stream_ended(c).unwrap();
        assert_eq!(&done_a.body[..], b"{\"x\":1}");
        assert_eq!(done_a.method(), "POST");
        assert_eq!(&done_c.body[..], b"null");
        assert!(table.is_empty());

        let total: usize = acks.0.iter().map(|(_, len)| len).sum();
        assert_eq!(total, 16);
    }

    #[test]
    fn unknown_stream_events_do_not_touch_others() {
        let mut table = StreamTable::<RequestHead>::new();
        let mut acks = AckLog::default();
        table.on_stream_started(StreamId(1), &post("/sensor")).unwrap();
        table.on_data_received(StreamId(1), b"ab", 2, &mut acks).unwrap();

        assert_eq!(
            table.on_data_received(StreamId(7), b"zz", 2, &mut acks),
            Err(StreamError::Unknown(StreamId(7)))
        );
        assert_eq!(
            table.on_stream_ended(StreamId(9)).unwrap_err(),
            StreamError::Unknown(StreamId(9))
        );

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(StreamId(1)).unwrap().body(), b"ab");
        // Dropped chunks are still acknowledged.
        assert_eq!(acks.0, vec![(StreamId(1), 2), (StreamId(7), 2)]);
    }

    #[test]
    fn duplicate_start_keeps_existing_stream() {
        let mut table = StreamTable::<RequestHead>::new();
        let mut acks = AckLog::default();
        table.on_stream_started(StreamId(1), &post("/sensor")).unwrap();
        table.on_data_received(StreamId(1), b"keep", 4, &mut acks).unwrap();

        assert_eq!(
            table.on_stream_started(StreamId(1), &post("/alert")),
            Err(StreamError::Duplicate(StreamId(1)))
        );

        let stream = table.get(StreamId(1)).unwrap();
        assert_eq!(stream.head().path, "/sensor");
        assert_eq!(stream.state(), StreamState::Open);
        assert_eq!(stream.body(), b"keep");
    }

    #[test]
    fn ended_stream_is_removed_and_cannot_end_twice() {
        let mut table = StreamTable::<RequestHead>::new();
        table.on_stream_started(StreamId(1), &post("/sensor")).unwrap();
        let done = table.on_stream_ended(StreamId(1)).unwrap();
        assert!(done.body.is_empty());
        assert!(!table.contains(StreamId(1)));
        assert!(table.on_stream_ended(StreamId(1)).is_err());
    }

    #[test]
    fn missing_pseudo_headers_become_empty() {
        let mut table = StreamTable::<RequestHead>::new();
        table.on_stream_started(StreamId(1), &[]).unwrap();
        let done = table.on_stream_ended(StreamId(1)).unwrap();
        assert_eq!(done.method(), "");
        assert_eq!(done.path(), "");
    }

    #[test]
    fn reset_and_clear_drop_streams() {
        let mut table = StreamTable::<ResponseHead>::new();
        table
            .on_stream_started(StreamId(1), &[Header::new(":status", "200")])
            .unwrap();
        table
            .on_stream_started(StreamId(3), &[Header::new(":status", "404")])
            .unwrap();
        assert_eq!(table.get(StreamId(3)).unwrap().head().status, Some(404));

        assert!(table.on_stream_reset(StreamId(1)));
        assert!(!table.on_stream_reset(StreamId(1)));
        assert_eq!(table.clear(), 1);
        assert!(table.is_empty());
    }
}
