//! HTTP/2 flow control accounting (RFC 7540 Section 6.9).
//!
//! Every stream has a send and a receive window, and so does the connection.
//! Send windows gate outbound DATA; receive windows police inbound DATA and
//! decide when WINDOW_UPDATE frames are owed to the peer.

use thiserror::Error;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// Why a window operation was refused. Callers decide the error scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("flow control window exhausted")]
    Underflow,
    #[error("flow control window exceeds 2^31-1")]
    Overflow,
}

/// A signed byte credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlWindow {
    window: i64,
}

impl FlowControlWindow {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    /// Current window size (may be negative after a SETTINGS change).
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Bytes that may be sent right now; zero while the window is negative.
    pub fn available(&self) -> u32 {
        self.window.clamp(0, MAX_WINDOW_SIZE) as u32
    }

    /// Take `amount` bytes of credit. Refuses to go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), WindowError> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(WindowError::Underflow);
        }
        self.window = new;
        Ok(())
    }

    /// Add credit from a WINDOW_UPDATE.
    pub fn increase(&mut self, increment: u32) -> Result<(), WindowError> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(WindowError::Overflow);
        }
        self.window = new;
        Ok(())
    }

    /// Apply an INITIAL_WINDOW_SIZE delta. This is the only operation that
    /// may leave the window negative.
    pub fn adjust(&mut self, delta: i64) -> Result<(), WindowError> {
        let new = self.window + delta;
        if new > MAX_WINDOW_SIZE {
            return Err(WindowError::Overflow);
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// How many DATA payload bytes may go out in the next frame on a stream.
pub fn sendable(conn: &FlowControlWindow, stream: &FlowControlWindow, max_frame_size: u32) -> u32 {
    conn.available().min(stream.available()).min(max_frame_size)
}

/// Receive-side window with a batching WINDOW_UPDATE policy.
///
/// Released bytes accumulate until they reach `target / divisor`, then a
/// single update re-credits all of them. With the default divisor of 2 the
/// peer always holds at least half the target window while data keeps
/// being consumed.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    window: FlowControlWindow,
    target: i64,
    unannounced: i64,
    divisor: u32,
}

impl ReceiveWindow {
    pub fn new(target: u32, divisor: u32) -> Self {
        Self {
            window: FlowControlWindow::new(i64::from(target)),
            target: i64::from(target),
            unannounced: 0,
            divisor: divisor.max(1),
        }
    }

    /// Credit the peer still holds.
    pub fn window(&self) -> i64 {
        self.window.window()
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    /// Account for an inbound DATA frame (payload plus padding).
    pub fn on_data(&mut self, len: u32) -> Result<(), WindowError> {
        self.window.consume(len)
    }

    /// Mark `len` consumed bytes as processed. Returns the increment to
    /// announce when the batch threshold is reached.
    pub fn release(&mut self, len: u32) -> Option<u32> {
        self.unannounced += i64::from(len);
        let threshold = (self.target / i64::from(self.divisor)).max(1);
        if self.unannounced < threshold {
            return None;
        }
        self.take_unannounced()
    }

    /// Announce everything released so far regardless of the threshold.
    pub fn take_unannounced(&mut self) -> Option<u32> {
        if self.unannounced <= 0 {
            return None;
        }
        let increment = self.unannounced.min(MAX_WINDOW_SIZE) as u32;
        self.unannounced -= i64::from(increment);
        self.window.increase(increment).ok()?;
        Some(increment)
    }

    /// Raise the target and return the increment that must be announced at
    /// once (used for the connection window, which SETTINGS cannot change).
    pub fn grow_target(&mut self, new_target: u32) -> Option<u32> {
        let delta = i64::from(new_target) - self.target;
        if delta <= 0 {
            return None;
        }
        self.target = i64::from(new_target);
        self.window.increase(delta as u32).ok()?;
        Some(delta as u32)
    }
}
