//! Sans-I/O HTTP/2 frame decoder.
//!
//! Raw bytes go in through [`H2Codec::feed`] and come out as validated
//! [`Frame`]s. The codec enforces everything that can be checked on a single
//! frame in isolation plus the CONTINUATION sequencing rule:
//! 1. Frame length against the locally advertised SETTINGS_MAX_FRAME_SIZE
//! 2. Stream id zero / non-zero requirements per frame type
//! 3. Fixed payload sizes and padding bounds
//! 4. HEADERS / PUSH_PROMISE must be followed by CONTINUATION on the same
//!    stream until END_HEADERS, and the assembled block stays bounded
//!
//! Stream state, flow control and HPACK are handled by
//! [`Connection`](crate::Connection).
//!
//! Reference: RFC 7540 (HTTP/2)

use tracing::trace;

use crate::config::{Role, MAX_HEADER_BLOCK_SIZE};
use crate::error::{ErrorCode, H2Error};
use crate::frame::{
    flags, frame_type, semantic_flag_mask, Frame, FrameFlags, FrameHeader, FramePayload,
    PrioritySpec, FRAME_HEADER_LEN,
};
use crate::settings::{Settings, DEFAULT_MAX_FRAME_SIZE};
use crate::stream_id::StreamId;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.starts_with(CONNECTION_PREFACE)
}

/// Result of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// The buffer holds no complete frame yet.
    NeedMoreData,
}

/// An open HEADERS / PUSH_PROMISE block waiting for CONTINUATION.
#[derive(Debug, Clone, Copy)]
struct OpenHeaderBlock {
    stream_id: StreamId,
    size: usize,
}

/// HTTP/2 frame decoder for one direction of a connection.
#[derive(Debug)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: Vec<u8>,
    /// Connection preface received (always true for clients)
    preface_received: bool,
    /// Largest payload the peer may send us
    max_frame_size: u32,
    /// Bound on HEADERS + CONTINUATION accumulation
    max_header_block_size: usize,
    header_block: Option<OpenHeaderBlock>,
}

impl H2Codec {
    /// A server-role codec expects the client preface before the first frame.
    pub fn new(role: Role) -> Self {
        Self {
            buffer: Vec::new(),
            preface_received: role.is_client(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            header_block: None,
        }
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    pub fn set_preface_received(&mut self, received: bool) {
        self.preface_received = received;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Set the inbound frame size limit (our SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a header block is awaiting CONTINUATION frames.
    pub fn in_header_block(&self) -> bool {
        self.header_block.is_some()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete frame from the buffer.
    ///
    /// A frame is consumed from the buffer even when it fails validation, so
    /// decoding may continue after a stream error.
    pub fn decode(&mut self) -> Result<Decoded, H2Error> {
        if !self.preface_received {
            let n = CONNECTION_PREFACE.len().min(self.buffer.len());
            if self.buffer[..n] != CONNECTION_PREFACE[..n] {
                return Err(H2Error::protocol("invalid connection preface"));
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(Decoded::NeedMoreData);
            }
            self.buffer.drain(..CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        let Some(header) = FrameHeader::parse(&self.buffer) else {
            return Ok(Decoded::NeedMoreData);
        };
        if header.length > self.max_frame_size {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                format!(
                    "frame length {} exceeds max frame size {}",
                    header.length, self.max_frame_size
                ),
            ));
        }

        // Check if we have the complete frame
        let total_size = header.total_size();
        if self.buffer.len() < total_size {
            return Ok(Decoded::NeedMoreData);
        }

        // Split the buffer instead of copying the payload
        let remainder = self.buffer.split_off(total_size);
        let mut payload = std::mem::replace(&mut self.buffer, remainder);
        payload.drain(..FRAME_HEADER_LEN);

        let frame = self.parse_frame(&header, payload)?;
        trace!(
            stream_id = %frame.stream_id,
            frame_type = frame.frame_type(),
            flags = frame.flags.bits(),
            length = header.length,
            "decoded frame"
        );
        Ok(Decoded::Frame(frame))
    }

    /// Feed `data` and decode every complete frame.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>, H2Error> {
        self.feed(data);
        let mut frames = Vec::new();
        while let Decoded::Frame(frame) = self.decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn parse_frame(&mut self, header: &FrameHeader, payload: Vec<u8>) -> Result<Frame, H2Error> {
        self.check_continuation_sequence(header)?;
        check_stream_id(header)?;

        let stream_id = header.stream_id;
        let frame_flags = FrameFlags::from_bits(header.flags & semantic_flag_mask(header.frame_type));

        let payload = match header.frame_type {
            frame_type::DATA => {
                let (data, padding) = strip_padding(header, payload)?;
                FramePayload::Data { data, padding }
            }
            frame_type::HEADERS => {
                let (mut fragment, padding) = strip_padding(header, payload)?;
                let priority = if header.has_flag(flags::PRIORITY) {
                    if fragment.len() < 5 {
                        return Err(H2Error::protocol("HEADERS with PRIORITY flag too short"));
                    }
                    let spec = PrioritySpec::parse(&fragment[..5]);
                    fragment.drain(..5);
                    Some(spec)
                } else {
                    None
                };
                self.track_header_block(header, fragment.len())?;
                FramePayload::Headers {
                    priority,
                    fragment,
                    padding,
                }
            }
            frame_type::PRIORITY => {
                if payload.len() != 5 {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        "PRIORITY payload must be 5 bytes",
                    ));
                }
                FramePayload::Priority(PrioritySpec::parse(&payload))
            }
            frame_type::RST_STREAM => {
                expect_len(&payload, 4, "RST_STREAM")?;
                FramePayload::RstStream(ErrorCode::from_u32(read_u32(&payload)))
            }
            frame_type::SETTINGS => {
                if frame_flags.ack() && !payload.is_empty() {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        "SETTINGS ACK with payload",
                    ));
                }
                FramePayload::Settings(Settings::decode_pairs(&payload)?)
            }
            frame_type::PUSH_PROMISE => {
                let (mut fragment, padding) = strip_padding(header, payload)?;
                if fragment.len() < 4 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        "PUSH_PROMISE too short",
                    ));
                }
                let promised_stream_id = StreamId::new(read_u32(&fragment));
                fragment.drain(..4);
                self.track_header_block(header, fragment.len())?;
                FramePayload::PushPromise {
                    promised_stream_id,
                    fragment,
                    padding,
                }
            }
            frame_type::PING => {
                expect_len(&payload, 8, "PING")?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                FramePayload::Ping(data)
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(H2Error::connection(ErrorCode::FrameSizeError, "GOAWAY too short"));
                }
                FramePayload::GoAway {
                    last_stream_id: StreamId::new(read_u32(&payload)),
                    error_code: ErrorCode::from_u32(read_u32(&payload[4..])),
                    debug_data: payload[8..].to_vec(),
                }
            }
            frame_type::WINDOW_UPDATE => {
                expect_len(&payload, 4, "WINDOW_UPDATE")?;
                let increment = read_u32(&payload) & 0x7fff_ffff;
                if increment == 0 {
                    return Err(if stream_id.is_root() {
                        H2Error::protocol("WINDOW_UPDATE with zero increment")
                    } else {
                        H2Error::stream(
                            stream_id,
                            ErrorCode::ProtocolError,
                            "WINDOW_UPDATE with zero increment",
                        )
                    });
                }
                FramePayload::WindowUpdate(increment)
            }
            frame_type::CONTINUATION => {
                self.track_header_block(header, payload.len())?;
                FramePayload::Continuation(payload)
            }
            other => FramePayload::Unknown {
                frame_type: other,
                payload,
            },
        };

        Ok(Frame::new(stream_id, frame_flags, payload))
    }

    /// While a header block is open only CONTINUATION on the same stream may
    /// arrive; CONTINUATION is invalid otherwise.
    fn check_continuation_sequence(&self, header: &FrameHeader) -> Result<(), H2Error> {
        match self.header_block {
            Some(open) if header.frame_type != frame_type::CONTINUATION => Err(H2Error::protocol(
                format!(
                    "expected CONTINUATION for stream {}, got frame type {}",
                    open.stream_id, header.frame_type
                ),
            )),
            Some(open) if header.stream_id != open.stream_id => Err(H2Error::protocol(format!(
                "CONTINUATION for stream {} but pending headers on stream {}",
                header.stream_id, open.stream_id
            ))),
            None if header.frame_type == frame_type::CONTINUATION => Err(H2Error::protocol(
                format!("unexpected CONTINUATION frame for stream {}", header.stream_id),
            )),
            _ => Ok(()),
        }
    }

    fn track_header_block(&mut self, header: &FrameHeader, fragment_len: usize) -> Result<(), H2Error> {
        let size = self.header_block.map_or(0, |b| b.size) + fragment_len;
        if size > self.max_header_block_size {
            self.header_block = None;
            return Err(H2Error::connection(
                ErrorCode::EnhanceYourCalm,
                format!(
                    "header block too large ({} bytes, max {})",
                    size, self.max_header_block_size
                ),
            ));
        }
        self.header_block = if header.has_flag(flags::END_HEADERS) {
            None
        } else {
            Some(OpenHeaderBlock {
                stream_id: header.stream_id,
                size,
            })
        };
        Ok(())
    }
}

fn check_stream_id(header: &FrameHeader) -> Result<(), H2Error> {
    let zero = header.stream_id.is_root();
    let valid = match header.frame_type {
        frame_type::SETTINGS | frame_type::PING | frame_type::GOAWAY => zero,
        frame_type::DATA
        | frame_type::HEADERS
        | frame_type::PRIORITY
        | frame_type::RST_STREAM
        | frame_type::PUSH_PROMISE
        | frame_type::CONTINUATION => !zero,
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(H2Error::protocol(format!(
            "frame type {} not allowed on stream {}",
            header.frame_type, header.stream_id
        )))
    }
}

fn expect_len(payload: &[u8], len: usize, what: &str) -> Result<(), H2Error> {
    if payload.len() == len {
        Ok(())
    } else {
        Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            format!("{} payload must be {} bytes, got {}", what, len, payload.len()),
        ))
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Remove the pad length byte and trailing padding when PADDED is set.
/// Takes ownership of the payload Vec to avoid re-copying.
fn strip_padding(header: &FrameHeader, mut payload: Vec<u8>) -> Result<(Vec<u8>, Option<u8>), H2Error> {
    if !header.has_flag(flags::PADDED) {
        return Ok((payload, None));
    }
    let Some(&pad_length) = payload.first() else {
        return Err(H2Error::protocol("PADDED frame with no payload"));
    };
    if usize::from(pad_length) >= payload.len() {
        return Err(H2Error::protocol("padding exceeds frame payload"));
    }
    // Remove padding from end, then remove pad_length byte from start
    payload.truncate(payload.len() - usize::from(pad_length));
    payload.remove(0);
    Ok((payload, Some(pad_length)))
}
