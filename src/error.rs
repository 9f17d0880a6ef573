//! Error types for the HTTP/2 core.
//!
//! Protocol failures come in two severities (RFC 7540 Section 5.4): stream
//! errors, answered with RST_STREAM and scoped to one stream, and connection
//! errors, answered with GOAWAY and fatal to the whole connection. Misuse of
//! the local API is reported separately as [`UserError`] and never reaches
//! the wire.

use thiserror::Error;

use crate::stream_id::StreamId;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to a code. Unknown codes are treated as
    /// INTERNAL_ERROR, which RFC 7540 Section 7 permits.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Errors produced by the HTTP/2 core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H2Error {
    /// Fatal protocol violation; the connection is torn down with GOAWAY.
    #[error("connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Violation scoped to a single stream; answered with RST_STREAM.
    #[error("stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: StreamId,
        code: ErrorCode,
        reason: String,
    },

    /// A local operation was rejected before anything was transmitted.
    #[error(transparent)]
    User(#[from] UserError),

    /// The 31-bit stream id space for this endpoint is used up.
    #[error("stream ids exhausted; open a new connection")]
    StreamIdsExhausted,

    /// A GOAWAY was sent or received; no new streams may be opened.
    #[error("connection is going away")]
    GoingAway,

    /// The peer's GOAWAY cut this stream off before it was processed.
    #[error("stream {stream_id} voided by GOAWAY (last stream id {last_stream_id})")]
    StreamVoided {
        stream_id: StreamId,
        last_stream_id: StreamId,
    },

    /// The connection is already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl H2Error {
    pub(crate) fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn stream(stream_id: StreamId, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    /// The wire error code, if this error maps onto one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => Some(*code),
            Self::StreamVoided { .. } => Some(ErrorCode::RefusedStream),
            _ => None,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Misuse of the local API, detected before anything is queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("unknown or inactive stream {0}")]
    UnknownStream(StreamId),
    #[error("stream {0} already sent END_STREAM")]
    SendAfterEndStream(StreamId),
    #[error("operation not valid for stream {0} in its current state")]
    InvalidStreamState(StreamId),
    #[error("peer has disabled server push")]
    PushDisabled,
    #[error("operation not permitted for this endpoint role")]
    WrongRole,
    #[error("malformed header block: {0}")]
    MalformedHeaders(String),
    #[error("header list of {size} bytes exceeds peer limit of {limit}")]
    HeaderListTooLarge { size: usize, limit: u32 },
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max frame size {0} outside 16384..=16777215")]
    MaxFrameSize(u32),
    #[error("window size {0} exceeds 2^31-1")]
    WindowSize(u32),
    #[error("window update divisor must be at least 1")]
    WindowUpdateDivisor,
    #[error("max header block size must be non-zero")]
    MaxHeaderBlockSize,
}
