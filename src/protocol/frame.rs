//! HTTP/2 frame layout.
//!
//! Every frame starts with a 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! ```

use bytes::{BufMut, BytesMut};

/// Client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;

/// Upper bound for SETTINGS_MAX_FRAME_SIZE.
pub const MAX_ALLOWED_FRAME_SIZE: usize = 16_777_215;

/// Flow-control window every stream and the connection start with.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Largest flow-control window and largest stream identifier (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
}

pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const COMPRESSION_ERROR: u32 = 0x9;
}

/// Parsed fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a frame header. Returns `None` if fewer than 9 bytes are given.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = (buf[0] as usize) << 16 | (buf[1] as usize) << 8 | buf[2] as usize;
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7FFF_FFFF;
        Some(Self {
            length,
            kind: buf[3],
            flags: buf[4],
            stream_id,
        })
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Append one complete frame to `out`.
pub fn write_frame(out: &mut BytesMut, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
    let len = payload.len();
    out.reserve(FRAME_HEADER_LEN + len);
    out.put_u8((len >> 16) as u8);
    out.put_u8((len >> 8) as u8);
    out.put_u8(len as u8);
    out.put_u8(kind);
    out.put_u8(flags);
    out.put_u32(stream_id & 0x7FFF_FFFF);
    out.put_slice(payload);
}

/// Append a SETTINGS frame carrying the given parameters.
pub fn write_settings(out: &mut BytesMut, params: &[(u16, u32)]) {
    let mut payload = BytesMut::with_capacity(params.len() * 6);
    for (id, value) in params {
        payload.put_u16(*id);
        payload.put_u32(*value);
    }
    write_frame(out, frame_type::SETTINGS, 0, 0, &payload);
}

pub fn write_window_update(out: &mut BytesMut, stream_id: u32, increment: u32) {
    write_frame(
        out,
        frame_type::WINDOW_UPDATE,
        0,
        stream_id,
        &(increment & 0x7FFF_FFFF).to_be_bytes(),
    );
}

pub fn write_goaway(out: &mut BytesMut, last_stream_id: u32, code: u32) {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
    payload[4..].copy_from_slice(&code.to_be_bytes());
    write_frame(out, frame_type::GOAWAY, 0, 0, &payload);
}

/// Strip the pad length octet and trailing padding from a PADDED payload.
pub fn strip_padding(payload: &[u8]) -> Option<&[u8]> {
    let (&pad_len, rest) = payload.split_first()?;
    let pad_len = pad_len as usize;
    if pad_len > rest.len() {
        return None;
    }
    Some(&rest[..rest.len() - pad_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parse_masks_reserved_bit() {
        let mut out = BytesMut::new();
        write_frame(&mut out, frame_type::DATA, flags::END_STREAM, 0x8000_0003, b"abc");

        let header = FrameHeader::parse(&out).unwrap();
        assert_eq!(header.length, 3);
        assert_eq!(header.kind, frame_type::DATA);
        assert!(header.has_flag(flags::END_STREAM));
        assert_eq!(header.stream_id, 3);
        assert_eq!(&out[FRAME_HEADER_LEN..], b"abc");
    }

    #[test]
    fn header_parse_needs_nine_bytes() {
        assert!(FrameHeader::parse(&[0, 0, 1, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn padding_is_removed() {
        assert_eq!(strip_padding(&[2, b'h', b'i', 0, 0]), Some(&b"hi"[..]));
        assert_eq!(strip_padding(&[0]), Some(&b""[..]));
        assert_eq!(strip_padding(&[5, b'x']), None);
        assert_eq!(strip_padding(&[]), None);
    }
}
