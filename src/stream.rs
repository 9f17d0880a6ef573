//! Per-stream state machine (RFC 7540 Section 5.1) and the store that owns
//! every live stream of a connection.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::completion::Completion;
use crate::config::Role;
use crate::error::{ErrorCode, H2Error};
use crate::event::CloseReason;
use crate::flow_control::{FlowControlWindow, ReceiveWindow};
use crate::frame::PrioritySpec;
use crate::hpack::HeaderBlock;
use crate::stream_id::StreamId;

/// Lifecycle states from RFC 7540 Section 5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn is_closed(self) -> bool {
        self == StreamState::Closed
    }

    /// Whether the peer may still send DATA.
    pub fn is_recv_open(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether we may still send DATA.
    pub fn is_send_open(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Open and half-closed streams count against MAX_CONCURRENT_STREAMS.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    /// Error code for an inbound frame that this state does not accept.
    pub fn recv_error_code(self) -> ErrorCode {
        match self {
            StreamState::HalfClosedRemote | StreamState::Closed => ErrorCode::StreamClosed,
            _ => ErrorCode::ProtocolError,
        }
    }
}

/// A transition that the current state does not permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub state: StreamState,
}

/// Who opened a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Local,
    Remote,
}

/// Work queued on a stream, serialized by the multiplexer.
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    Headers {
        headers: HeaderBlock,
        end_stream: bool,
        priority: Option<PrioritySpec>,
    },
    PushPromise {
        promised: StreamId,
        headers: HeaderBlock,
    },
    Data {
        data: Vec<u8>,
        end_stream: bool,
    },
    Priority(PrioritySpec),
}

impl Outbound {
    pub(crate) fn is_header_type(&self) -> bool {
        !matches!(self, Outbound::Data { .. })
    }
}

/// One HTTP/2 stream.
#[derive(Debug)]
pub struct Stream {
    pub(crate) id: StreamId,
    pub(crate) state: StreamState,
    pub(crate) initiator: Initiator,
    pub(crate) send_window: FlowControlWindow,
    pub(crate) recv_window: ReceiveWindow,
    pub(crate) pending: VecDeque<Outbound>,
    /// Resolved once the opening HEADERS / PUSH_PROMISE hits the wire.
    pub(crate) opened: Option<Completion<Result<StreamId, H2Error>>>,
    pub(crate) closed: Completion<CloseReason>,
    pub(crate) close_reason: Option<CloseReason>,
    /// Something naming this stream has been serialized, so RST_STREAM is legal.
    pub(crate) on_wire: bool,
    /// Reserved by a local PUSH_PROMISE, which must reach the wire first.
    pub(crate) pushed: bool,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        initiator: Initiator,
        send_window: u32,
        recv_window: u32,
        divisor: u32,
    ) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            initiator,
            send_window: FlowControlWindow::new(i64::from(send_window)),
            recv_window: ReceiveWindow::new(recv_window, divisor),
            pending: VecDeque::new(),
            opened: None,
            closed: Completion::new(),
            close_reason: None,
            on_wire: initiator == Initiator::Remote,
            pushed: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn initiator(&self) -> Initiator {
        self.initiator
    }

    pub fn send_window(&self) -> i64 {
        self.send_window.window()
    }

    fn transition(&mut self, next: Option<StreamState>) -> Result<(), IllegalTransition> {
        match next {
            Some(state) => {
                self.state = state;
                Ok(())
            }
            None => Err(IllegalTransition { state: self.state }),
        }
    }

    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), IllegalTransition> {
        use StreamState::*;
        let next = match (self.state, end_stream) {
            (Idle, false) | (Open, false) => Some(Open),
            (Idle, true) | (Open, true) => Some(HalfClosedLocal),
            (ReservedLocal, false) | (HalfClosedRemote, false) => Some(HalfClosedRemote),
            (ReservedLocal, true) | (HalfClosedRemote, true) => Some(Closed),
            _ => None,
        };
        self.transition(next)
    }

    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), IllegalTransition> {
        use StreamState::*;
        let next = match (self.state, end_stream) {
            (Idle, false) | (Open, false) => Some(Open),
            (Idle, true) | (Open, true) => Some(HalfClosedRemote),
            (ReservedRemote, false) | (HalfClosedLocal, false) => Some(HalfClosedLocal),
            (ReservedRemote, true) | (HalfClosedLocal, true) => Some(Closed),
            _ => None,
        };
        self.transition(next)
    }

    pub fn send_data(&mut self, end_stream: bool) -> Result<(), IllegalTransition> {
        use StreamState::*;
        let next = match (self.state, end_stream) {
            (Open, false) => Some(Open),
            (Open, true) => Some(HalfClosedLocal),
            (HalfClosedRemote, false) => Some(HalfClosedRemote),
            (HalfClosedRemote, true) => Some(Closed),
            _ => None,
        };
        self.transition(next)
    }

    pub fn recv_data(&mut self, end_stream: bool) -> Result<(), IllegalTransition> {
        use StreamState::*;
        let next = match (self.state, end_stream) {
            (Open, false) => Some(Open),
            (Open, true) => Some(HalfClosedRemote),
            (HalfClosedLocal, false) => Some(HalfClosedLocal),
            (HalfClosedLocal, true) => Some(Closed),
            _ => None,
        };
        self.transition(next)
    }

    pub fn reserve_local(&mut self) -> Result<(), IllegalTransition> {
        let next = (self.state == StreamState::Idle).then_some(StreamState::ReservedLocal);
        self.transition(next)
    }

    pub fn reserve_remote(&mut self) -> Result<(), IllegalTransition> {
        let next = (self.state == StreamState::Idle).then_some(StreamState::ReservedRemote);
        self.transition(next)
    }

    /// Close immediately, dropping queued output.
    pub fn reset(&mut self, reason: CloseReason) -> Result<(), IllegalTransition> {
        if self.state.is_closed() && self.close_reason.is_some() {
            return Err(IllegalTransition { state: self.state });
        }
        self.state = StreamState::Closed;
        self.pending.clear();
        self.close_reason = Some(reason);
        Ok(())
    }

    /// Closed with nothing left to write.
    pub(crate) fn is_finished(&self) -> bool {
        self.state.is_closed() && self.pending.is_empty()
    }

    /// Resolve both completions. `opened` fails with `open_error` if the
    /// opening frame never made it out.
    pub(crate) fn finish(&mut self, open_error: impl FnOnce() -> H2Error) -> CloseReason {
        let reason = self.close_reason.clone().unwrap_or(CloseReason::Completed);
        if let Some(opened) = self.opened.take() {
            if !opened.is_complete() {
                opened.complete(Err(open_error()));
            }
        }
        self.closed.complete(reason.clone());
        reason
    }
}

/// How an id that arrived on the wire relates to known streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Active,
    /// Closed within the grace period; racing frames are absorbed.
    RecentlyClosed,
    Closed,
    Idle,
}

/// Owns all live streams plus the bookkeeping for ids already retired.
#[derive(Debug)]
pub struct StreamStore {
    role: Role,
    streams: HashMap<StreamId, Stream>,
    /// Activation order, used for fair flushing.
    order: Vec<StreamId>,
    recently_closed: HashMap<StreamId, Instant>,
    grace: Duration,
    max_peer_id: StreamId,
    max_local_id: StreamId,
}

impl StreamStore {
    pub fn new(role: Role, grace: Duration) -> Self {
        Self {
            role,
            streams: HashMap::new(),
            order: Vec::new(),
            recently_closed: HashMap::new(),
            grace,
            max_peer_id: StreamId::ROOT,
            max_local_id: StreamId::ROOT,
        }
    }

    pub fn insert(&mut self, stream: Stream) {
        let id = stream.id;
        if id.is_initiated_by(self.role) {
            self.max_local_id = self.max_local_id.max(id);
        } else {
            self.max_peer_id = self.max_peer_id.max(id);
        }
        self.order.push(id);
        self.streams.insert(id, stream);
    }

    /// Mark a peer id as used without creating a stream (refused streams).
    pub fn note_peer_id(&mut self, id: StreamId) {
        self.max_peer_id = self.max_peer_id.max(id);
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Remove a stream and start its grace period.
    pub fn remove(&mut self, id: StreamId, now: Instant) -> Option<Stream> {
        let stream = self.streams.remove(&id)?;
        self.order.retain(|s| *s != id);
        self.recently_closed.insert(id, now);
        Some(stream)
    }

    pub fn lookup(&self, id: StreamId, now: Instant) -> Lookup {
        if self.streams.contains_key(&id) {
            return Lookup::Active;
        }
        if let Some(closed_at) = self.recently_closed.get(&id) {
            if now.duration_since(*closed_at) <= self.grace {
                return Lookup::RecentlyClosed;
            }
            return Lookup::Closed;
        }
        let high = if id.is_initiated_by(self.role) {
            self.max_local_id
        } else {
            self.max_peer_id
        };
        if id <= high {
            Lookup::Closed
        } else {
            Lookup::Idle
        }
    }

    /// Forget grace entries that have expired. Their ids still classify as
    /// closed through the high-water marks.
    pub fn prune(&mut self, now: Instant) {
        let grace = self.grace;
        self.recently_closed
            .retain(|_, closed_at| now.duration_since(*closed_at) <= grace);
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.order.clone()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Active streams opened by `initiator`.
    pub fn active_count(&self, initiator: Initiator) -> usize {
        self.streams
            .values()
            .filter(|s| s.initiator == initiator && s.state.is_active())
            .count()
    }

    pub fn max_peer_id(&self) -> StreamId {
        self.max_peer_id
    }

    pub fn max_local_id(&self) -> StreamId {
        self.max_local_id
    }
}
