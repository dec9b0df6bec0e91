//! Sans-I/O HTTP/2 engine.
//!
//! # Responsibilities
//! - Validate the client connection preface (server role)
//! - Split the inbound byte stream into frames, buffering partial frames
//! - Reassemble HEADERS + CONTINUATION blocks and decode them with HPACK
//! - Answer SETTINGS and PING, surface RST_STREAM and GOAWAY as events
//! - Encode outbound header/data intents, split to the peer's max frame size
//! - Emit WINDOW_UPDATE frames for acknowledged data
//! - Respect the peer's connection and stream send windows
//!
//! # Design Decisions
//! - DATA that does not fit the send windows is queued and drained as
//!   WINDOW_UPDATE or SETTINGS_INITIAL_WINDOW_SIZE credit arrives
//! - Queued DATA keeps per-stream order; a blocked stream does not block others
//! - Trailers only contribute their END_STREAM, their fields are dropped
//! - Any decode error queues a GOAWAY and is fatal for the connection

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fluke_hpack::{Decoder, Encoder};

use crate::protocol::frame::{
    self, flags, frame_type, settings_id, FrameHeader, CONNECTION_PREFACE,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN,
    MAX_ALLOWED_FRAME_SIZE, MAX_WINDOW_SIZE,
};
use crate::protocol::{Event, FlowControl, Header, ProtocolEngine, ProtocolError, StreamId};

/// Upper bound for an assembled header block.
const MAX_HEADER_BLOCK: usize = 65_536;

/// Streams we advertise as concurrently acceptable (server role).
const MAX_CONCURRENT_STREAMS: u32 = 100;

/// Which side of the connection this engine speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Header block waiting for CONTINUATION frames.
struct PendingHeaders {
    stream_id: u32,
    block: BytesMut,
    end_stream: bool,
}

/// DATA waiting for send-window credit.
struct QueuedData {
    stream_id: u32,
    data: Bytes,
    end_stream: bool,
}

/// HTTP/2 protocol engine for one connection.
pub struct H2Engine {
    role: Role,
    awaiting_preface: bool,
    inbound: BytesMut,
    outbound: BytesMut,
    decoder: Decoder<'static>,
    encoder: Encoder<'static>,
    pending_headers: Option<PendingHeaders>,
    /// Streams the peer may still send DATA on.
    receiving: HashSet<u32>,
    peer_max_frame_size: usize,
    /// The peer's SETTINGS_INITIAL_WINDOW_SIZE, given to every new stream.
    peer_initial_window: i64,
    /// Connection-level send window.
    send_window: i64,
    /// Send windows of streams we may still send DATA on.
    stream_send_windows: HashMap<u32, i64>,
    queued_data: VecDeque<QueuedData>,
    next_stream_id: u32,
    last_peer_stream_id: u32,
}

impl H2Engine {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            awaiting_preface: role == Role::Server,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            pending_headers: None,
            receiving: HashSet::new(),
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peer_initial_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            send_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            stream_send_windows: HashMap::new(),
            queued_data: VecDeque::new(),
            next_stream_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            last_peer_stream_id: 0,
        }
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Allocate the next locally-initiated stream identifier.
    ///
    /// Fails once the 31-bit identifier space is used up; the connection
    /// must then be replaced.
    pub fn next_stream_id(&mut self) -> Result<StreamId, ProtocolError> {
        let id = self.next_stream_id;
        if id > MAX_WINDOW_SIZE {
            return Err(ProtocolError::StreamIdsExhausted);
        }
        self.next_stream_id = id + 2;
        Ok(StreamId(id))
    }

    /// Queue a GOAWAY announcing that this side is done with the connection.
    pub fn send_goaway(&mut self, code: u32) {
        frame::write_goaway(&mut self.outbound, self.last_peer_stream_id, code);
    }

    fn decode_buffered(&mut self) -> Result<Vec<Event>, ProtocolError> {
        if self.awaiting_preface {
            let n = self.inbound.len().min(CONNECTION_PREFACE.len());
            if self.inbound[..n] != CONNECTION_PREFACE[..n] {
                return Err(ProtocolError::BadPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(Vec::new());
            }
            self.inbound.advance(CONNECTION_PREFACE.len());
            self.awaiting_preface = false;
        }

        let mut events = Vec::new();
        while let Some(header) = FrameHeader::parse(&self.inbound) {
            if header.length > DEFAULT_MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameSize(format!(
                    "frame of {} bytes exceeds limit of {}",
                    header.length, DEFAULT_MAX_FRAME_SIZE
                )));
            }
            if self.inbound.len() < FRAME_HEADER_LEN + header.length {
                break;
            }
            self.inbound.advance(FRAME_HEADER_LEN);
            let payload = self.inbound.split_to(header.length).freeze();
            self.handle_frame(header, payload, &mut events)?;
        }
        Ok(events)
    }

    fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        if let Some(pending) = &self.pending_headers {
            if header.kind != frame_type::CONTINUATION || header.stream_id != pending.stream_id {
                return Err(ProtocolError::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    pending.stream_id
                )));
            }
        }

        match header.kind {
            frame_type::DATA => self.on_data(header, payload, events),
            frame_type::HEADERS => self.on_headers(header, &payload, events),
            frame_type::CONTINUATION => self.on_continuation(header, &payload, events),
            frame_type::RST_STREAM => self.on_rst_stream(header, &payload, events),
            frame_type::SETTINGS => self.on_settings(header, &payload),
            frame_type::PING => self.on_ping(header, &payload),
            frame_type::GOAWAY => self.on_goaway(header, &payload, events),
            frame_type::WINDOW_UPDATE => self.on_window_update(header, &payload),
            frame_type::PUSH_PROMISE => {
                Err(ProtocolError::Protocol("unexpected PUSH_PROMISE".into()))
            }
            // PRIORITY and unknown frame types are ignored.
            _ => Ok(()),
        }
    }

    fn on_data(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        if header.stream_id == 0 {
            return Err(ProtocolError::Protocol("DATA on stream 0".into()));
        }

        let flow_controlled_length = payload.len();
        let data = if header.has_flag(flags::PADDED) {
            let body_len = frame::strip_padding(&payload)
                .ok_or_else(|| ProtocolError::Protocol("invalid DATA padding".into()))?
                .len();
            payload.slice(1..1 + body_len)
        } else {
            payload
        };

        let stream_id = StreamId(header.stream_id);
        let end_stream = header.has_flag(flags::END_STREAM);
        if end_stream {
            self.receiving.remove(&header.stream_id);
        }
        if flow_controlled_length > 0 {
            events.push(Event::DataReceived {
                stream_id,
                data,
                flow_controlled_length,
            });
        }
        if end_stream {
            events.push(Event::StreamEnded { stream_id });
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        if header.stream_id == 0 {
            return Err(ProtocolError::Protocol("HEADERS on stream 0".into()));
        }

        let mut block = payload;
        if header.has_flag(flags::PADDED) {
            block = frame::strip_padding(block)
                .ok_or_else(|| ProtocolError::Protocol("invalid HEADERS padding".into()))?;
        }
        if header.has_flag(flags::PRIORITY) {
            if block.len() < 5 {
                return Err(ProtocolError::FrameSize("truncated HEADERS priority".into()));
            }
            block = &block[5..];
        }

        let end_stream = header.has_flag(flags::END_STREAM);
        if header.has_flag(flags::END_HEADERS) {
            self.finish_headers(header.stream_id, block, end_stream, events)
        } else {
            self.pending_headers = Some(PendingHeaders {
                stream_id: header.stream_id,
                block: BytesMut::from(block),
                end_stream,
            });
            Ok(())
        }
    }

    fn on_continuation(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        let mut pending = self
            .pending_headers
            .take()
            .ok_or_else(|| ProtocolError::Protocol("unexpected CONTINUATION".into()))?;
        pending.block.extend_from_slice(payload);

        if header.has_flag(flags::END_HEADERS) {
            self.finish_headers(pending.stream_id, &pending.block, pending.end_stream, events)
        } else if pending.block.len() > MAX_HEADER_BLOCK {
            Err(ProtocolError::Protocol("header block too large".into()))
        } else {
            self.pending_headers = Some(pending);
            Ok(())
        }
    }

    fn finish_headers(
        &mut self,
        id: u32,
        block: &[u8],
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        // HPACK is stateful: the block is decoded even when it is discarded.
        let decoded = self
            .decoder
            .decode(block)
            .map_err(|e| ProtocolError::Compression(format!("{:?}", e)))?;
        let stream_id = StreamId(id);

        if self.receiving.contains(&id) {
            if !end_stream {
                return Err(ProtocolError::Protocol(format!(
                    "trailers without END_STREAM on {}",
                    stream_id
                )));
            }
            self.receiving.remove(&id);
            events.push(Event::StreamEnded { stream_id });
            return Ok(());
        }

        let headers = decoded
            .into_iter()
            .map(|(name, value)| {
                Header::new(String::from_utf8_lossy(&name), String::from_utf8_lossy(&value))
            })
            .collect();

        if self.role == Role::Server && (id % 2 == 0 || id <= self.last_peer_stream_id) {
            return Err(ProtocolError::Protocol(format!(
                "{} cannot open a new request",
                stream_id
            )));
        }

        if !end_stream {
            self.receiving.insert(id);
        }
        match self.role {
            Role::Server => {
                self.last_peer_stream_id = id;
                self.stream_send_windows.insert(id, self.peer_initial_window);
                events.push(Event::RequestStarted { stream_id, headers });
            }
            Role::Client => events.push(Event::ResponseStarted { stream_id, headers }),
        }
        if end_stream {
            events.push(Event::StreamEnded { stream_id });
        }
        Ok(())
    }

    fn on_rst_stream(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        if header.stream_id == 0 {
            return Err(ProtocolError::Protocol("RST_STREAM on stream 0".into()));
        }
        let code: [u8; 4] = payload
            .try_into()
            .map_err(|_| ProtocolError::FrameSize("RST_STREAM must be 4 bytes".into()))?;
        self.receiving.remove(&header.stream_id);
        self.stream_send_windows.remove(&header.stream_id);
        self.queued_data.retain(|q| q.stream_id != header.stream_id);
        events.push(Event::StreamReset {
            stream_id: StreamId(header.stream_id),
            error_code: u32::from_be_bytes(code),
        });
        Ok(())
    }

    fn on_settings(&mut self, header: FrameHeader, payload: &[u8]) -> Result<(), ProtocolError> {
        if header.stream_id != 0 {
            return Err(ProtocolError::Protocol("SETTINGS on a stream".into()));
        }
        if header.has_flag(flags::ACK) {
            if !payload.is_empty() {
                return Err(ProtocolError::FrameSize("SETTINGS ACK with payload".into()));
            }
            return Ok(());
        }
        if payload.len() % 6 != 0 {
            return Err(ProtocolError::FrameSize("SETTINGS length not a multiple of 6".into()));
        }

        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            match id {
                settings_id::HEADER_TABLE_SIZE => self.encoder.set_max_table_size(value as _),
                settings_id::INITIAL_WINDOW_SIZE => self.set_peer_initial_window(value)?,
                settings_id::MAX_FRAME_SIZE => {
                    let size = value as usize;
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&size) {
                        return Err(ProtocolError::Protocol(format!(
                            "invalid SETTINGS_MAX_FRAME_SIZE {}",
                            value
                        )));
                    }
                    self.peer_max_frame_size = size;
                }
                _ => {}
            }
        }

        frame::write_frame(&mut self.outbound, frame_type::SETTINGS, flags::ACK, 0, &[]);
        self.flush_queued_data();
        Ok(())
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE to every open send window.
    fn set_peer_initial_window(&mut self, value: u32) -> Result<(), ProtocolError> {
        if value > MAX_WINDOW_SIZE {
            return Err(ProtocolError::FlowControl(format!(
                "invalid SETTINGS_INITIAL_WINDOW_SIZE {}",
                value
            )));
        }
        let delta = value as i64 - self.peer_initial_window;
        for (id, window) in self.stream_send_windows.iter_mut() {
            *window += delta;
            if *window > MAX_WINDOW_SIZE as i64 {
                return Err(ProtocolError::FlowControl(format!(
                    "send window of stream {} overflowed",
                    id
                )));
            }
        }
        self.peer_initial_window = value as i64;
        Ok(())
    }

    fn on_window_update(&mut self, header: FrameHeader, payload: &[u8]) -> Result<(), ProtocolError> {
        let raw: [u8; 4] = payload
            .try_into()
            .map_err(|_| ProtocolError::FrameSize("WINDOW_UPDATE must be 4 bytes".into()))?;
        let increment = (u32::from_be_bytes(raw) & MAX_WINDOW_SIZE) as i64;
        if increment == 0 {
            return Err(ProtocolError::Protocol("WINDOW_UPDATE with zero increment".into()));
        }

        let window = if header.stream_id == 0 {
            &mut self.send_window
        } else {
            match self.stream_send_windows.get_mut(&header.stream_id) {
                Some(window) => window,
                // Credit for a stream we are done sending on.
                None => return Ok(()),
            }
        };
        if *window + increment > MAX_WINDOW_SIZE as i64 {
            return Err(ProtocolError::FlowControl(format!(
                "send window of stream {} overflowed",
                header.stream_id
            )));
        }
        *window += increment;

        self.flush_queued_data();
        Ok(())
    }

    /// Write as much queued DATA as the send windows allow.
    fn flush_queued_data(&mut self) {
        let mut blocked = HashSet::new();
        let mut still_queued = VecDeque::new();
        while let Some(mut queued) = self.queued_data.pop_front() {
            if blocked.contains(&queued.stream_id) || !self.write_queued(&mut queued) {
                blocked.insert(queued.stream_id);
                still_queued.push_back(queued);
            }
        }
        self.queued_data = still_queued;
    }

    /// Write DATA frames for `queued` until it is exhausted or a window closes.
    ///
    /// Returns `true` once everything, END_STREAM included, has been written.
    fn write_queued(&mut self, queued: &mut QueuedData) -> bool {
        let id = queued.stream_id;
        let end_flag = if queued.end_stream { flags::END_STREAM } else { 0 };

        if queued.data.is_empty() {
            frame::write_frame(&mut self.outbound, frame_type::DATA, end_flag, id, &[]);
        } else {
            let initial = self.peer_initial_window;
            let stream_window = self.stream_send_windows.entry(id).or_insert(initial);
            while !queued.data.is_empty() {
                let available = self
                    .send_window
                    .min(*stream_window)
                    .min(self.peer_max_frame_size as i64);
                if available <= 0 {
                    return false;
                }
                let chunk = queued.data.split_to((available as usize).min(queued.data.len()));
                self.send_window -= chunk.len() as i64;
                *stream_window -= chunk.len() as i64;

                let chunk_flags = if queued.data.is_empty() { end_flag } else { 0 };
                frame::write_frame(&mut self.outbound, frame_type::DATA, chunk_flags, id, &chunk);
            }
        }

        if queued.end_stream {
            self.stream_send_windows.remove(&id);
        }
        true
    }

    fn on_ping(&mut self, header: FrameHeader, payload: &[u8]) -> Result<(), ProtocolError> {
        if header.stream_id != 0 {
            return Err(ProtocolError::Protocol("PING on a stream".into()));
        }
        if payload.len() != 8 {
            return Err(ProtocolError::FrameSize("PING must be 8 bytes".into()));
        }
        if !header.has_flag(flags::ACK) {
            frame::write_frame(&mut self.outbound, frame_type::PING, flags::ACK, 0, payload);
        }
        Ok(())
    }

    fn on_goaway(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), ProtocolError> {
        if header.stream_id != 0 {
            return Err(ProtocolError::Protocol("GOAWAY on a stream".into()));
        }
        if payload.len() < 8 {
            return Err(ProtocolError::FrameSize("GOAWAY shorter than 8 bytes".into()));
        }
        let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        events.push(Event::GoAway {
            last_stream_id: StreamId(last & 0x7FFF_FFFF),
            error_code: code,
        });
        Ok(())
    }
}

impl FlowControl for H2Engine {
    fn acknowledge_received(&mut self, stream_id: StreamId, length: usize) {
        if length == 0 {
            return;
        }
        let increment = length as u32;
        frame::write_window_update(&mut self.outbound, 0, increment);
        if self.receiving.contains(&stream_id.0) {
            frame::write_window_update(&mut self.outbound, stream_id.0, increment);
        }
    }
}

impl ProtocolEngine for H2Engine {
    fn initiate_connection(&mut self) -> Bytes {
        match self.role {
            Role::Client => {
                self.outbound.put_slice(CONNECTION_PREFACE);
                frame::write_settings(&mut self.outbound, &[(settings_id::ENABLE_PUSH, 0)]);
            }
            Role::Server => {
                frame::write_settings(
                    &mut self.outbound,
                    &[(settings_id::MAX_CONCURRENT_STREAMS, MAX_CONCURRENT_STREAMS)],
                );
            }
        }
        self.bytes_to_send()
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        self.inbound.extend_from_slice(data);
        let result = self.decode_buffered();
        if let Err(e) = &result {
            self.inbound.clear();
            self.pending_headers = None;
            self.queued_data.clear();
            frame::write_goaway(&mut self.outbound, self.last_peer_stream_id, e.error_code());
        }
        result
    }

    fn send_headers(&mut self, stream_id: StreamId, headers: &[Header], end_stream: bool) {
        if end_stream {
            self.stream_send_windows.remove(&stream_id.0);
        } else if self.role == Role::Client {
            self.stream_send_windows
                .entry(stream_id.0)
                .or_insert(self.peer_initial_window);
        }

        let block = self
            .encoder
            .encode(headers.iter().map(|h| (h.name.as_bytes(), h.value.as_bytes())));

        let mut chunks = block.chunks(self.peer_max_frame_size);
        let first = chunks.next().unwrap_or_default();
        let rest: Vec<&[u8]> = chunks.collect();

        let mut head_flags = if end_stream { flags::END_STREAM } else { 0 };
        if rest.is_empty() {
            head_flags |= flags::END_HEADERS;
        }
        frame::write_frame(&mut self.outbound, frame_type::HEADERS, head_flags, stream_id.0, first);

        for (i, chunk) in rest.iter().enumerate() {
            let cont_flags = if i + 1 == rest.len() { flags::END_HEADERS } else { 0 };
            frame::write_frame(
                &mut self.outbound,
                frame_type::CONTINUATION,
                cont_flags,
                stream_id.0,
                chunk,
            );
        }
    }

    fn send_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool) {
        self.queued_data.push_back(QueuedData {
            stream_id: stream_id.0,
            data: Bytes::copy_from_slice(data),
            end_stream,
        });
        self.flush_queued_data();
    }

    fn bytes_to_send(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }
}
