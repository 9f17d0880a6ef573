//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5).

use crate::error::{ErrorCode, H2Error};
use crate::flow_control::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// Smallest legal SETTINGS_MAX_FRAME_SIZE, also the protocol default.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
/// Largest legal SETTINGS_MAX_FRAME_SIZE.
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// One identifier/value pair as carried on the wire. Unknown identifiers are
/// kept so a decoded SETTINGS frame re-encodes unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

impl Setting {
    pub const fn new(id: u16, value: u32) -> Self {
        Self { id, value }
    }
}

/// The negotiated parameter table for one direction of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_WINDOW_SIZE as u32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Client defaults: push disabled.
    pub fn client_default() -> Self {
        Self {
            enable_push: false,
            ..Default::default()
        }
    }

    /// Server defaults: bounded concurrency.
    pub fn server_default() -> Self {
        Self {
            max_concurrent_streams: Some(100),
            ..Default::default()
        }
    }

    /// The pairs to advertise in a SETTINGS frame.
    pub fn to_pairs(&self) -> Vec<Setting> {
        let mut pairs = vec![
            Setting::new(settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            Setting::new(settings_id::ENABLE_PUSH, u32::from(self.enable_push)),
        ];
        if let Some(v) = self.max_concurrent_streams {
            pairs.push(Setting::new(settings_id::MAX_CONCURRENT_STREAMS, v));
        }
        pairs.push(Setting::new(settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size));
        pairs.push(Setting::new(settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        if let Some(v) = self.max_header_list_size {
            pairs.push(Setting::new(settings_id::MAX_HEADER_LIST_SIZE, v));
        }
        pairs
    }

    /// Apply one received pair. Out-of-range values are connection errors.
    pub fn apply(&mut self, setting: Setting) -> Result<(), H2Error> {
        let value = setting.value;
        match setting.id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = value,
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(H2Error::protocol("ENABLE_PUSH must be 0 or 1"));
                }
                self.enable_push = value == 1;
            }
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            settings_id::INITIAL_WINDOW_SIZE => {
                if i64::from(value) > MAX_WINDOW_SIZE {
                    return Err(H2Error::connection(
                        ErrorCode::FlowControlError,
                        "INITIAL_WINDOW_SIZE exceeds 2^31-1",
                    ));
                }
                self.initial_window_size = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(H2Error::protocol("MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = value;
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            // Unknown settings MUST be ignored (RFC 7540 Section 6.5.2).
            _ => {}
        }
        Ok(())
    }

    /// Apply a whole SETTINGS frame in order.
    pub fn apply_all(&mut self, pairs: &[Setting]) -> Result<(), H2Error> {
        pairs.iter().try_for_each(|s| self.apply(*s))
    }

    /// Decode a SETTINGS payload into pairs. The length must be a multiple
    /// of six.
    pub fn decode_pairs(payload: &[u8]) -> Result<Vec<Setting>, H2Error> {
        if payload.len() % 6 != 0 {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "SETTINGS payload not a multiple of 6",
            ));
        }
        Ok(payload
            .chunks_exact(6)
            .map(|c| Setting {
                id: u16::from_be_bytes([c[0], c[1]]),
                value: u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
            })
            .collect())
    }

    pub fn encode_pairs(pairs: &[Setting], buf: &mut Vec<u8>) {
        for s in pairs {
            buf.extend_from_slice(&s.id.to_be_bytes());
            buf.extend_from_slice(&s.value.to_be_bytes());
        }
    }
}
