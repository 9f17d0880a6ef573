//! HTTP/2 frame types and their wire encoding (RFC 7540 Section 4 and 6).
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                    |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+------...------+
//! |R|                 Stream Identifier (31)       |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...            |
//! +-----------------------------------------------+
//! ```
//!
//! Decoding lives in [`crate::h2_codec`]; this module owns the typed
//! representation and the inverse transform back to bytes.

use crate::error::ErrorCode;
use crate::settings::{Setting, Settings};
use crate::stream_id::StreamId;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Semantic flags of a frame.
///
/// PADDED and PRIORITY are not stored here: they are implied by the
/// `padding` and `priority` fields of the payload, which keeps a decoded
/// frame and its re-encoding identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const fn empty() -> Self {
        FrameFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub const fn end_stream(self) -> bool {
        self.contains(flags::END_STREAM)
    }

    pub const fn end_headers(self) -> bool {
        self.contains(flags::END_HEADERS)
    }

    pub const fn ack(self) -> bool {
        self.contains(flags::ACK)
    }

    #[must_use]
    pub const fn with(self, flag: u8, on: bool) -> Self {
        if on {
            FrameFlags(self.0 | flag)
        } else {
            FrameFlags(self.0 & !flag)
        }
    }
}

/// The flags that carry meaning for a frame type, excluding the structural
/// PADDED and PRIORITY bits.
pub(crate) fn semantic_flag_mask(ty: u8) -> u8 {
    match ty {
        frame_type::DATA => flags::END_STREAM,
        frame_type::HEADERS => flags::END_STREAM | flags::END_HEADERS,
        frame_type::SETTINGS | frame_type::PING => flags::ACK,
        frame_type::PUSH_PROMISE | frame_type::CONTINUATION => flags::END_HEADERS,
        frame_type::PRIORITY
        | frame_type::RST_STREAM
        | frame_type::GOAWAY
        | frame_type::WINDOW_UPDATE => 0,
        _ => 0xff,
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Parse a 9-byte frame header. Returns `None` if the buffer is too short.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id: StreamId::new(stream_id),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_be_bytes()[1..]);
        buf.push(self.frame_type);
        buf.push(self.flags);
        buf.extend_from_slice(&self.stream_id.value().to_be_bytes());
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Stream dependency and weight (RFC 7540 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

impl PrioritySpec {
    pub(crate) fn parse(b: &[u8]) -> Self {
        let raw = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        Self {
            dependency: StreamId::new(raw),
            exclusive: raw & 0x8000_0000 != 0,
            weight: b[4],
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let mut raw = self.dependency.value();
        if self.exclusive {
            raw |= 0x8000_0000;
        }
        buf.extend_from_slice(&raw.to_be_bytes());
        buf.push(self.weight);
    }
}

impl Default for PrioritySpec {
    fn default() -> Self {
        Self {
            dependency: StreamId::ROOT,
            exclusive: false,
            weight: 15,
        }
    }
}

/// The typed payload of a frame. Exactly one variant per wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Data {
        data: Vec<u8>,
        padding: Option<u8>,
    },
    Headers {
        priority: Option<PrioritySpec>,
        fragment: Vec<u8>,
        padding: Option<u8>,
    },
    Priority(PrioritySpec),
    RstStream(ErrorCode),
    Settings(Vec<Setting>),
    PushPromise {
        promised_stream_id: StreamId,
        fragment: Vec<u8>,
        padding: Option<u8>,
    },
    Ping([u8; 8]),
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    WindowUpdate(u32),
    Continuation(Vec<u8>),
    /// Frame types this endpoint does not understand; ignored on receipt.
    Unknown {
        frame_type: u8,
        payload: Vec<u8>,
    },
}

impl FramePayload {
    /// The wire type byte for this payload.
    pub fn frame_type(&self) -> u8 {
        match self {
            Self::Data { .. } => frame_type::DATA,
            Self::Headers { .. } => frame_type::HEADERS,
            Self::Priority(_) => frame_type::PRIORITY,
            Self::RstStream(_) => frame_type::RST_STREAM,
            Self::Settings(_) => frame_type::SETTINGS,
            Self::PushPromise { .. } => frame_type::PUSH_PROMISE,
            Self::Ping(_) => frame_type::PING,
            Self::GoAway { .. } => frame_type::GOAWAY,
            Self::WindowUpdate(_) => frame_type::WINDOW_UPDATE,
            Self::Continuation(_) => frame_type::CONTINUATION,
            Self::Unknown { frame_type, .. } => *frame_type,
        }
    }

    fn padding_len(padding: &Option<u8>) -> usize {
        padding.map_or(0, |p| usize::from(p) + 1)
    }

    /// Encoded payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Data { data, padding } => data.len() + Self::padding_len(padding),
            Self::Headers {
                priority,
                fragment,
                padding,
            } => fragment.len() + Self::padding_len(padding) + priority.map_or(0, |_| 5),
            Self::Priority(_) => 5,
            Self::RstStream(_) => 4,
            Self::Settings(pairs) => pairs.len() * 6,
            Self::PushPromise {
                fragment, padding, ..
            } => 4 + fragment.len() + Self::padding_len(padding),
            Self::Ping(_) => 8,
            Self::GoAway { debug_data, .. } => 8 + debug_data.len(),
            Self::WindowUpdate(_) => 4,
            Self::Continuation(fragment) => fragment.len(),
            Self::Unknown { payload, .. } => payload.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A complete HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub flags: FrameFlags,
    pub payload: FramePayload,
}

impl Frame {
    pub fn new(stream_id: StreamId, flags: FrameFlags, payload: FramePayload) -> Self {
        Self {
            stream_id,
            flags,
            payload,
        }
    }

    pub fn frame_type(&self) -> u8 {
        self.payload.frame_type()
    }

    /// Bytes this frame counts against flow control windows (DATA only).
    pub fn flow_controlled_len(&self) -> usize {
        match &self.payload {
            FramePayload::Data { .. } => self.payload.len(),
            _ => 0,
        }
    }

    /// Whether this frame opens or continues a header block that is not yet
    /// terminated.
    pub fn leaves_header_block_open(&self) -> bool {
        matches!(
            self.payload,
            FramePayload::Headers { .. }
                | FramePayload::PushPromise { .. }
                | FramePayload::Continuation(_)
        ) && !self.flags.end_headers()
    }

    // -- Constructors --

    pub fn data(stream_id: StreamId, data: Vec<u8>, end_stream: bool) -> Self {
        Self::new(
            stream_id,
            FrameFlags::empty().with(flags::END_STREAM, end_stream),
            FramePayload::Data {
                data,
                padding: None,
            },
        )
    }

    pub fn headers(stream_id: StreamId, fragment: Vec<u8>, end_stream: bool, end_headers: bool) -> Self {
        Self::new(
            stream_id,
            FrameFlags::empty()
                .with(flags::END_STREAM, end_stream)
                .with(flags::END_HEADERS, end_headers),
            FramePayload::Headers {
                priority: None,
                fragment,
                padding: None,
            },
        )
    }

    pub fn continuation(stream_id: StreamId, fragment: Vec<u8>, end_headers: bool) -> Self {
        Self::new(
            stream_id,
            FrameFlags::empty().with(flags::END_HEADERS, end_headers),
            FramePayload::Continuation(fragment),
        )
    }

    pub fn push_promise(
        stream_id: StreamId,
        promised_stream_id: StreamId,
        fragment: Vec<u8>,
        end_headers: bool,
    ) -> Self {
        Self::new(
            stream_id,
            FrameFlags::empty().with(flags::END_HEADERS, end_headers),
            FramePayload::PushPromise {
                promised_stream_id,
                fragment,
                padding: None,
            },
        )
    }

    pub fn priority(stream_id: StreamId, spec: PrioritySpec) -> Self {
        Self::new(stream_id, FrameFlags::empty(), FramePayload::Priority(spec))
    }

    pub fn rst_stream(stream_id: StreamId, error_code: ErrorCode) -> Self {
        Self::new(stream_id, FrameFlags::empty(), FramePayload::RstStream(error_code))
    }

    pub fn settings(pairs: Vec<Setting>) -> Self {
        Self::new(StreamId::ROOT, FrameFlags::empty(), FramePayload::Settings(pairs))
    }

    pub fn settings_ack() -> Self {
        Self::new(
            StreamId::ROOT,
            FrameFlags::from_bits(flags::ACK),
            FramePayload::Settings(Vec::new()),
        )
    }

    pub fn ping(data: [u8; 8]) -> Self {
        Self::new(StreamId::ROOT, FrameFlags::empty(), FramePayload::Ping(data))
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        Self::new(
            StreamId::ROOT,
            FrameFlags::from_bits(flags::ACK),
            FramePayload::Ping(data),
        )
    }

    pub fn goaway(last_stream_id: StreamId, error_code: ErrorCode, debug_data: Vec<u8>) -> Self {
        Self::new(
            StreamId::ROOT,
            FrameFlags::empty(),
            FramePayload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            },
        )
    }

    /// stream_id=0 updates the connection-level window, otherwise stream-level
    pub fn window_update(stream_id: StreamId, increment: u32) -> Self {
        Self::new(
            stream_id,
            FrameFlags::empty(),
            FramePayload::WindowUpdate(increment & 0x7fff_ffff),
        )
    }

    // -- Encoding --

    /// Encode this frame (header + payload) onto the end of `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let ty = self.frame_type();
        let mut flag_bits = self.flags.bits() & semantic_flag_mask(ty);
        match &self.payload {
            FramePayload::Data { padding, .. } | FramePayload::PushPromise { padding, .. } => {
                if padding.is_some() {
                    flag_bits |= flags::PADDED;
                }
            }
            FramePayload::Headers {
                padding, priority, ..
            } => {
                if padding.is_some() {
                    flag_bits |= flags::PADDED;
                }
                if priority.is_some() {
                    flag_bits |= flags::PRIORITY;
                }
            }
            _ => {}
        }

        let header = FrameHeader {
            length: self.payload.len() as u32,
            frame_type: ty,
            flags: flag_bits,
            stream_id: self.stream_id,
        };
        buf.reserve(header.total_size());
        header.encode(buf);

        match &self.payload {
            FramePayload::Data { data, padding } => {
                write_padded(buf, *padding, |buf| buf.extend_from_slice(data));
            }
            FramePayload::Headers {
                priority,
                fragment,
                padding,
            } => {
                write_padded(buf, *padding, |buf| {
                    if let Some(p) = priority {
                        p.encode(buf);
                    }
                    buf.extend_from_slice(fragment);
                });
            }
            FramePayload::Priority(spec) => spec.encode(buf),
            FramePayload::RstStream(code) => buf.extend_from_slice(&code.as_u32().to_be_bytes()),
            FramePayload::Settings(pairs) => Settings::encode_pairs(pairs, buf),
            FramePayload::PushPromise {
                promised_stream_id,
                fragment,
                padding,
            } => {
                write_padded(buf, *padding, |buf| {
                    buf.extend_from_slice(&promised_stream_id.value().to_be_bytes());
                    buf.extend_from_slice(fragment);
                });
            }
            FramePayload::Ping(data) => buf.extend_from_slice(data),
            FramePayload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                buf.extend_from_slice(&last_stream_id.value().to_be_bytes());
                buf.extend_from_slice(&error_code.as_u32().to_be_bytes());
                buf.extend_from_slice(debug_data);
            }
            FramePayload::WindowUpdate(increment) => {
                buf.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
            }
            FramePayload::Continuation(fragment) => buf.extend_from_slice(fragment),
            FramePayload::Unknown { payload, .. } => buf.extend_from_slice(payload),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.encode(&mut buf);
        buf
    }
}

fn write_padded(buf: &mut Vec<u8>, padding: Option<u8>, body: impl FnOnce(&mut Vec<u8>)) {
    if let Some(pad) = padding {
        buf.push(pad);
        body(buf);
        buf.resize(buf.len() + usize::from(pad), 0);
    } else {
        body(buf);
    }
}
