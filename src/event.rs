//! Events surfaced to the embedding application and the I/O seams.

use crate::error::{ErrorCode, H2Error};
use crate::frame::PrioritySpec;
use crate::hpack::HeaderBlock;
use crate::settings::Settings;
use crate::stream_id::StreamId;

/// Why a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Both sides sent END_STREAM.
    Completed,
    ResetByPeer(ErrorCode),
    ResetLocally(ErrorCode),
    /// Cut off by a GOAWAY before the peer processed it; safe to retry.
    Voided,
    ConnectionError(ErrorCode),
}

/// Something that happened on one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Headers {
        headers: HeaderBlock,
        end_stream: bool,
    },
    Data {
        data: Vec<u8>,
        end_stream: bool,
    },
    /// The peer reserved `promised_stream_id` for a push associated with
    /// this stream.
    PushPromise {
        promised_stream_id: StreamId,
        headers: HeaderBlock,
    },
    Priority(PrioritySpec),
    /// The stream was reset; `remote` is true when the peer sent RST_STREAM.
    Reset {
        error_code: ErrorCode,
        remote: bool,
    },
    Closed(CloseReason),
}

/// Something that happened on the connection as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    SettingsReceived(Settings),
    SettingsAcknowledged,
    PingAck([u8; 8]),
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    Error(H2Error),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Event {
    Stream {
        stream_id: StreamId,
        event: StreamEvent,
    },
    Connection(ConnectionEvent),
}

/// Receives events drained by [`Connection::dispatch_events`](crate::Connection::dispatch_events).
pub trait EventObserver {
    fn on_stream_event(&mut self, stream_id: StreamId, event: StreamEvent);
    fn on_connection_event(&mut self, event: ConnectionEvent);
}

/// Destination for serialized outbound bytes.
pub trait FrameSink {
    fn send_bytes(&mut self, bytes: &[u8]);

    /// Called once per flush after all bytes were handed over.
    fn flush(&mut self) {}
}

impl FrameSink for Vec<u8> {
    fn send_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
