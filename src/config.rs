//! Connection configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::flow_control::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::settings::{Settings, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE};

/// Maximum accumulated header block size (256 KB).
/// Bounds memory held for HEADERS + CONTINUATION sequences.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Which end of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(self) -> bool {
        matches!(self, Role::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// How frames from different streams are interleaved on flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushOrder {
    /// Every stream's leading HEADERS first, then DATA round-robin.
    #[default]
    HeadersFirst,
    /// Drain each stream's queue in turn.
    PerStream,
}

/// Configuration for one [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct H2Config {
    pub role: Role,
    /// Settings advertised to the peer in the preface.
    pub settings: Settings,
    /// Receive window for the connection as a whole. Values above 65535 are
    /// announced with a WINDOW_UPDATE right after the preface SETTINGS.
    pub connection_window_size: u32,
    pub flush_order: FlushOrder,
    /// How long a closed stream id absorbs racing frames silently.
    pub closed_stream_grace: Duration,
    /// A WINDOW_UPDATE is sent once `window / divisor` bytes were consumed.
    pub window_update_divisor: u32,
    /// Upper bound on an inbound HEADERS + CONTINUATION sequence.
    pub max_header_block_size: usize,
}

impl H2Config {
    pub fn new(role: Role) -> Self {
        let settings = match role {
            Role::Client => Settings::client_default(),
            Role::Server => Settings::server_default(),
        };
        Self {
            role,
            settings,
            connection_window_size: DEFAULT_WINDOW_SIZE as u32,
            flush_order: FlushOrder::default(),
            closed_stream_grace: Duration::from_secs(1),
            window_update_divisor: 2,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = size;
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn with_enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = enable;
        self
    }

    pub fn with_connection_window_size(mut self, size: u32) -> Self {
        self.connection_window_size = size;
        self
    }

    pub fn with_flush_order(mut self, order: FlushOrder) -> Self {
        self.flush_order = order;
        self
    }

    pub fn with_closed_stream_grace(mut self, grace: Duration) -> Self {
        self.closed_stream_grace = grace;
        self
    }

    pub fn with_window_update_divisor(mut self, divisor: u32) -> Self {
        self.window_update_divisor = divisor;
        self
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let frame = self.settings.max_frame_size;
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&frame) {
            return Err(ConfigError::MaxFrameSize(frame));
        }
        for window in [self.settings.initial_window_size, self.connection_window_size] {
            if i64::from(window) > MAX_WINDOW_SIZE {
                return Err(ConfigError::WindowSize(window));
            }
        }
        if self.window_update_divisor == 0 {
            return Err(ConfigError::WindowUpdateDivisor);
        }
        if self.max_header_block_size == 0 {
            return Err(ConfigError::MaxHeaderBlockSize);
        }
        Ok(())
    }
}

impl Default for H2Config {
    fn default() -> Self {
        Self::client()
    }
}
