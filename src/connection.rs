//! The HTTP/2 connection state machine.
//!
//! A [`Connection`] owns every piece of per-connection state: the frame
//! decoder, both HPACK contexts, flow-control windows, the stream store and
//! the outbound multiplexer. It performs no I/O. The transport calls
//! [`Connection::receive`] with inbound bytes and [`Connection::flush`] to
//! collect outbound bytes; the application drives streams through
//! [`Connection::submit`] and [`Connection::send`] and observes them through
//! [`Connection::poll_event`].

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::completion::Completion;
use crate::config::{H2Config, Role};
use crate::error::{ConfigError, ErrorCode, H2Error, UserError};
use crate::event::{CloseReason, ConnectionEvent, EventObserver, FrameSink, H2Event, StreamEvent};
use crate::flow_control::{FlowControlWindow, ReceiveWindow, DEFAULT_WINDOW_SIZE};
use crate::frame::{Frame, FramePayload, PrioritySpec};
use crate::h2_codec::{Decoded, H2Codec, CONNECTION_PREFACE};
use crate::hpack::{header_list_size, validate_header_block, H2Header, HeaderBlock, HpackDecoder, HpackEncoder};
use crate::multiplexer::{headers_item, FlushContext, Multiplexer};
use crate::settings::{Setting, Settings, DEFAULT_HEADER_TABLE_SIZE};
use crate::stream::{IllegalTransition, Initiator, Lookup, Outbound, Stream, StreamState, StreamStore};
use crate::stream_id::{StreamId, StreamIdAllocator};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Active,
    /// We sent GOAWAY and are waiting for in-flight streams to finish.
    GoAwaySent { last_stream_id: StreamId },
    /// The peer sent GOAWAY; streams above `last_stream_id` were voided.
    GoAwayReceived { last_stream_id: StreamId },
    Closed,
}

/// Parameters of a locally initiated GOAWAY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAwayReason {
    pub error_code: ErrorCode,
    pub debug_data: Vec<u8>,
    /// Defaults to the highest peer-initiated stream id seen.
    pub last_stream_id: Option<StreamId>,
}

impl GoAwayReason {
    /// NO_ERROR: stop accepting new streams and let open ones finish.
    pub fn graceful() -> Self {
        Self::error(ErrorCode::NoError)
    }

    pub fn error(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            debug_data: Vec::new(),
            last_stream_id: None,
        }
    }

    pub fn with_debug_data(mut self, debug_data: impl Into<Vec<u8>>) -> Self {
        self.debug_data = debug_data.into();
        self
    }

    pub fn with_last_stream_id(mut self, last_stream_id: StreamId) -> Self {
        self.last_stream_id = Some(last_stream_id);
        self
    }
}

/// A request to open a locally initiated stream.
#[derive(Debug, Clone)]
pub enum StreamIntent {
    /// Client only: send a request header block.
    Request { headers: HeaderBlock, end_stream: bool },
    /// Server only: promise a push associated with a peer-initiated stream.
    Push {
        associated: StreamId,
        headers: HeaderBlock,
    },
}

/// An operation on an existing stream.
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Headers { headers: HeaderBlock, end_stream: bool },
    Data { data: Vec<u8>, end_stream: bool },
    Reset(ErrorCode),
    Priority(PrioritySpec),
}

/// Completions tracking one locally initiated stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    /// Resolves once the opening HEADERS / PUSH_PROMISE has been serialized.
    pub opened: Completion<Result<StreamId, H2Error>>,
    pub closed: Completion<CloseReason>,
    assigned: Completion<StreamId>,
}

impl StreamHandle {
    fn new() -> Self {
        Self {
            opened: Completion::new(),
            closed: Completion::new(),
            assigned: Completion::new(),
        }
    }

    /// The id, once one was allocated. Requests waiting for a concurrency
    /// slot have none yet.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.assigned.get()
    }
}

#[derive(Debug)]
struct PendingOpen {
    headers: HeaderBlock,
    end_stream: bool,
    handle: StreamHandle,
}

#[derive(Debug)]
enum BlockKind {
    Headers {
        end_stream: bool,
        priority: Option<PrioritySpec>,
    },
    PushPromise {
        promised: StreamId,
    },
}

/// A header block waiting for its CONTINUATION frames.
#[derive(Debug)]
struct PartialBlock {
    stream_id: StreamId,
    kind: BlockKind,
    fragment: Vec<u8>,
}

/// One HTTP/2 connection, client or server side.
#[derive(Debug)]
pub struct Connection {
    config: H2Config,
    state: ConnState,
    codec: H2Codec,
    decoder: HpackDecoder,
    encoder: HpackEncoder,
    streams: StreamStore,
    ids: StreamIdAllocator,
    mux: Multiplexer,
    local_settings: Settings,
    remote_settings: Settings,
    remote_settings_received: bool,
    unacked_settings: usize,
    conn_send: FlowControlWindow,
    conn_recv: ReceiveWindow,
    header_block: Option<PartialBlock>,
    pending_opens: VecDeque<PendingOpen>,
    events: VecDeque<H2Event>,
    /// Raw bytes that precede the first frame (client magic).
    preface: Vec<u8>,
    goaway_sent: Option<StreamId>,
    goaway_received: Option<StreamId>,
    /// Closed by quiescing rather than by an error. A later GOAWAY may still
    /// lower the advertised last stream id.
    quiesced: bool,
}

impl Connection {
    /// Create a connection and queue its preface.
    pub fn new(config: H2Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    /// Build from a configuration that passed [`H2Config::validate`].
    fn with_valid_config(config: H2Config) -> Self {
        let role = config.role;

        let mut codec = H2Codec::new(role).with_max_header_block_size(config.max_header_block_size);
        codec.set_max_frame_size(config.settings.max_frame_size);

        // The peer may use our advertised table size as soon as it has seen
        // our SETTINGS, so the larger of the two bounds until the ACK.
        let mut decoder = HpackDecoder::new();
        decoder.set_max_table_size(
            config
                .settings
                .header_table_size
                .max(DEFAULT_HEADER_TABLE_SIZE) as usize,
        );

        let mut conn_recv = ReceiveWindow::new(DEFAULT_WINDOW_SIZE as u32, config.window_update_divisor);
        let mut mux = Multiplexer::new(config.flush_order);
        mux.push_control(Frame::settings(config.settings.to_pairs()));
        if let Some(increment) = conn_recv.grow_target(config.connection_window_size) {
            mux.push_control(Frame::window_update(StreamId::ROOT, increment));
        }

        let preface = if role.is_client() {
            CONNECTION_PREFACE.to_vec()
        } else {
            Vec::new()
        };

        debug!(?role, settings = ?config.settings, "connection created");

        Self {
            state: ConnState::Active,
            codec,
            decoder,
            encoder: HpackEncoder::new(),
            streams: StreamStore::new(role, config.closed_stream_grace),
            ids: StreamIdAllocator::new(role),
            mux,
            local_settings: config.settings.clone(),
            remote_settings: Settings::default(),
            remote_settings_received: false,
            unacked_settings: 1,
            conn_send: FlowControlWindow::default(),
            conn_recv,
            header_block: None,
            pending_opens: VecDeque::new(),
            events: VecDeque::new(),
            preface,
            goaway_sent: None,
            goaway_received: None,
            quiesced: false,
            config,
        }
    }

    /// A client with the default configuration.
    pub fn client() -> Self {
        Self::with_valid_config(H2Config::client())
    }

    /// A server with the default configuration.
    pub fn server() -> Self {
        Self::with_valid_config(H2Config::server())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn stream_state(&self, id: StreamId) -> Option<StreamState> {
        self.streams.get(id).map(Stream::state)
    }

    pub fn stream_send_window(&self, id: StreamId) -> Option<i64> {
        self.streams.get(id).map(Stream::send_window)
    }

    pub fn connection_send_window(&self) -> i64 {
        self.conn_send.window()
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Whether the peer has acknowledged our SETTINGS.
    pub fn settings_acknowledged(&self) -> bool {
        self.unacked_settings == 0
    }

    /// Streams in the open or half-closed states.
    pub fn active_stream_count(&self) -> usize {
        self.streams.active_count(Initiator::Local) + self.streams.active_count(Initiator::Remote)
    }

    /// Requests waiting for a concurrency slot.
    pub fn pending_open_count(&self) -> usize {
        self.pending_opens.len()
    }

    pub fn last_peer_stream_id(&self) -> StreamId {
        self.streams.max_peer_id()
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decode and dispatch inbound bytes.
    ///
    /// Stream errors are answered with RST_STREAM and do not fail the call.
    /// A connection error queues GOAWAY, closes every stream and is returned.
    pub fn receive(&mut self, data: &[u8]) -> Result<(), H2Error> {
        if self.is_closed() {
            trace!(len = data.len(), "ignoring input on closed connection");
            return Ok(());
        }
        self.streams.prune(Instant::now());
        self.codec.feed(data);

        while !self.is_closed() {
            let result = match self.codec.decode() {
                Ok(Decoded::NeedMoreData) => break,
                Ok(Decoded::Frame(frame)) => self.handle_frame(frame),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.handle_error(e)?;
            }
        }

        self.activate_pending();
        self.reap();
        Ok(())
    }

    fn handle_error(&mut self, err: H2Error) -> Result<(), H2Error> {
        match err {
            H2Error::Stream {
                stream_id,
                code,
                reason,
            } => {
                self.on_stream_error(stream_id, code, &reason);
                Ok(())
            }
            other => {
                self.fail_connection(&other);
                Err(other)
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        let end_stream = frame.flags.end_stream();
        let end_headers = frame.flags.end_headers();
        let ack = frame.flags.ack();

        if !self.remote_settings_received
            && !matches!(frame.payload, FramePayload::Settings(_) if !ack)
        {
            return Err(H2Error::protocol("first frame from peer must be SETTINGS"));
        }

        match frame.payload {
            FramePayload::Data { data, padding } => self.on_data(id, data, padding, end_stream),
            FramePayload::Headers {
                priority, fragment, ..
            } => self.on_header_fragment(
                PartialBlock {
                    stream_id: id,
                    kind: BlockKind::Headers {
                        end_stream,
                        priority,
                    },
                    fragment,
                },
                end_headers,
            ),
            FramePayload::PushPromise {
                promised_stream_id,
                fragment,
                ..
            } => self.on_header_fragment(
                PartialBlock {
                    stream_id: id,
                    kind: BlockKind::PushPromise {
                        promised: promised_stream_id,
                    },
                    fragment,
                },
                end_headers,
            ),
            FramePayload::Continuation(fragment) => {
                let Some(mut block) = self.header_block.take() else {
                    return Err(H2Error::protocol("CONTINUATION without header block"));
                };
                block.fragment.extend_from_slice(&fragment);
                self.on_header_fragment(block, end_headers)
            }
            FramePayload::Priority(spec) => self.on_priority(id, spec),
            FramePayload::RstStream(code) => self.on_rst_stream(id, code),
            FramePayload::Settings(_) if ack => {
                self.on_settings_ack();
                Ok(())
            }
            FramePayload::Settings(pairs) => self.on_settings(&pairs),
            FramePayload::Ping(data) if ack => {
                self.events
                    .push_back(H2Event::Connection(ConnectionEvent::PingAck(data)));
                Ok(())
            }
            FramePayload::Ping(data) => {
                self.mux.push_control(Frame::ping_ack(data));
                Ok(())
            }
            FramePayload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                self.on_goaway(last_stream_id, error_code, debug_data);
                Ok(())
            }
            FramePayload::WindowUpdate(increment) => self.on_window_update(id, increment),
            FramePayload::Unknown { frame_type, .. } => {
                trace!(frame_type, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    /// Frames on streams cut off by a GOAWAY in either direction.
    fn is_ignored(&self, id: StreamId) -> bool {
        if id.is_initiated_by(self.config.role) {
            self.goaway_received.is_some_and(|last| id > last)
        } else {
            self.goaway_sent.is_some_and(|last| id > last)
        }
    }

    fn on_header_fragment(&mut self, block: PartialBlock, end_headers: bool) -> Result<(), H2Error> {
        if !end_headers {
            self.header_block = Some(block);
            return Ok(());
        }
        // Decode even if the stream is going to be ignored, to keep the
        // compression context in sync.
        let headers = self.decoder.decode(&block.fragment)?;
        match block.kind {
            BlockKind::Headers {
                end_stream,
                priority,
            } => self.on_headers(block.stream_id, headers, end_stream, priority),
            BlockKind::PushPromise { promised } => {
                self.on_push_promise(block.stream_id, promised, headers)
            }
        }
    }

    fn on_headers(
        &mut self,
        id: StreamId,
        headers: HeaderBlock,
        end_stream: bool,
        priority: Option<PrioritySpec>,
    ) -> Result<(), H2Error> {
        if self.is_ignored(id) {
            trace!(stream_id = %id, "ignoring HEADERS beyond GOAWAY");
            return Ok(());
        }
        if priority.is_some_and(|p| p.dependency == id) {
            return Err(H2Error::stream(id, ErrorCode::ProtocolError, "stream depends on itself"));
        }

        match self.streams.lookup(id, Instant::now()) {
            Lookup::Active => {}
            Lookup::RecentlyClosed => {
                trace!(stream_id = %id, "absorbing HEADERS on recently closed stream");
                return Ok(());
            }
            Lookup::Closed if !id.is_initiated_by(self.config.role) => {
                // Peer stream ids must increase (RFC 7540 Section 5.1.1).
                return Err(H2Error::protocol(format!(
                    "HEADERS on stream {} at or below the peer's last stream id {}",
                    id,
                    self.streams.max_peer_id()
                )));
            }
            Lookup::Closed => {
                return Err(H2Error::stream(id, ErrorCode::StreamClosed, "HEADERS on closed stream"));
            }
            Lookup::Idle => self.accept_peer_stream(id)?,
        }

        let Some(stream) = self.streams.get_mut(id) else {
            return Ok(());
        };
        stream
            .recv_headers(end_stream)
            .map_err(|t| recv_error(id, t, "HEADERS"))?;
        validate_header_block(&headers)
            .map_err(|reason| H2Error::stream(id, ErrorCode::ProtocolError, reason))?;
        if let Some(limit) = self.local_settings.max_header_list_size {
            let size = header_list_size(&headers);
            if size > limit as usize {
                return Err(H2Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    format!("header list of {} bytes exceeds {}", size, limit),
                ));
            }
        }

        self.push_stream_event(id, StreamEvent::Headers { headers, end_stream });
        if let Some(spec) = priority {
            self.push_stream_event(id, StreamEvent::Priority(spec));
        }
        Ok(())
    }

    /// A peer opens a new stream with HEADERS.
    fn accept_peer_stream(&mut self, id: StreamId) -> Result<(), H2Error> {
        if self.config.role.is_client() || id.is_initiated_by(self.config.role) {
            return Err(H2Error::protocol(format!(
                "HEADERS on idle stream {} not openable by peer",
                id
            )));
        }
        self.streams.note_peer_id(id);
        if let Some(max) = self.local_settings.max_concurrent_streams {
            if self.streams.active_count(Initiator::Remote) >= max as usize {
                return Err(H2Error::stream(
                    id,
                    ErrorCode::RefusedStream,
                    "concurrent stream limit reached",
                ));
            }
        }
        self.streams.insert(self.new_stream(id, Initiator::Remote));
        debug!(stream_id = %id, "stream opened by peer");
        Ok(())
    }

    fn on_push_promise(&mut self, associated: StreamId, promised: StreamId, headers: HeaderBlock) -> Result<(), H2Error> {
        if self.config.role.is_server() {
            return Err(H2Error::protocol("PUSH_PROMISE received by server"));
        }
        if !self.local_settings.enable_push {
            return Err(H2Error::protocol("PUSH_PROMISE while push is disabled"));
        }
        let now = Instant::now();
        if !promised.is_server_initiated() || self.streams.lookup(promised, now) != Lookup::Idle {
            return Err(H2Error::protocol(format!("invalid promised stream id {}", promised)));
        }
        self.streams.note_peer_id(promised);
        if self.is_ignored(promised) {
            return Ok(());
        }

        match self.streams.lookup(associated, now) {
            Lookup::Active => {
                let recv_open = self
                    .streams
                    .get(associated)
                    .is_some_and(|s| s.state().is_recv_open());
                if !recv_open {
                    return Err(H2Error::protocol("PUSH_PROMISE on stream not open for receiving"));
                }
            }
            Lookup::RecentlyClosed => {
                self.mux.push_control(Frame::rst_stream(promised, ErrorCode::Cancel));
                return Ok(());
            }
            Lookup::Closed | Lookup::Idle => {
                return Err(H2Error::protocol("PUSH_PROMISE on stream that is not open"));
            }
        }

        let mut stream = self.new_stream(promised, Initiator::Remote);
        stream
            .reserve_remote()
            .map_err(|_| H2Error::protocol("promised stream already in use"))?;
        self.streams.insert(stream);
        validate_header_block(&headers)
            .map_err(|reason| H2Error::stream(promised, ErrorCode::ProtocolError, reason))?;
        debug!(stream_id = %associated, promised_stream_id = %promised, "push promised");
        self.push_stream_event(
            associated,
            StreamEvent::PushPromise {
                promised_stream_id: promised,
                headers,
            },
        );
        Ok(())
    }

    fn on_data(&mut self, id: StreamId, data: Vec<u8>, padding: Option<u8>, end_stream: bool) -> Result<(), H2Error> {
        let flow_len = (data.len() + padding.map_or(0, |p| usize::from(p) + 1)) as u32;
        self.conn_recv.on_data(flow_len).map_err(|_| {
            H2Error::connection(ErrorCode::FlowControlError, "connection receive window exceeded")
        })?;

        if self.is_ignored(id) {
            self.release_connection(flow_len);
            return Ok(());
        }
        match self.streams.lookup(id, Instant::now()) {
            Lookup::Active => {}
            Lookup::RecentlyClosed => {
                self.release_connection(flow_len);
                return Ok(());
            }
            Lookup::Closed => {
                self.release_connection(flow_len);
                return Err(H2Error::stream(id, ErrorCode::StreamClosed, "DATA on closed stream"));
            }
            Lookup::Idle => {
                self.release_connection(flow_len);
                if !id.is_initiated_by(self.config.role) {
                    self.streams.note_peer_id(id);
                }
                return Err(H2Error::stream(id, ErrorCode::ProtocolError, "DATA on idle stream"));
            }
        }

        let Some(stream) = self.streams.get_mut(id) else {
            return Ok(());
        };
        let accepted = stream
            .recv_window
            .on_data(flow_len)
            .map_err(|_| H2Error::stream(id, ErrorCode::FlowControlError, "stream receive window exceeded"))
            .and_then(|()| stream.recv_data(end_stream).map_err(|t| recv_error(id, t, "DATA")));
        let stream_update = match accepted {
            Ok(()) if stream.state.is_recv_open() => stream.recv_window.release(flow_len),
            Ok(()) => None,
            Err(e) => {
                self.release_connection(flow_len);
                return Err(e);
            }
        };
        if let Some(increment) = stream_update {
            self.mux.push_control(Frame::window_update(id, increment));
        }
        self.release_connection(flow_len);
        self.push_stream_event(id, StreamEvent::Data { data, end_stream });
        Ok(())
    }

    fn release_connection(&mut self, len: u32) {
        if let Some(increment) = self.conn_recv.release(len) {
            self.mux.push_control(Frame::window_update(StreamId::ROOT, increment));
        }
    }

    fn on_priority(&mut self, id: StreamId, spec: PrioritySpec) -> Result<(), H2Error> {
        if spec.dependency == id {
            return Err(H2Error::stream(id, ErrorCode::ProtocolError, "stream depends on itself"));
        }
        if self.streams.get(id).is_some() && !self.is_ignored(id) {
            self.push_stream_event(id, StreamEvent::Priority(spec));
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, id: StreamId, code: ErrorCode) -> Result<(), H2Error> {
        match self.streams.lookup(id, Instant::now()) {
            Lookup::Active => {}
            Lookup::RecentlyClosed | Lookup::Closed => {
                trace!(stream_id = %id, "ignoring RST_STREAM on closed stream");
                return Ok(());
            }
            Lookup::Idle => return Err(H2Error::protocol("RST_STREAM on idle stream")),
        }
        debug!(stream_id = %id, error_code = %code, "stream reset by peer");
        self.push_stream_event(
            id,
            StreamEvent::Reset {
                error_code: code,
                remote: true,
            },
        );
        self.close_stream(
            id,
            CloseReason::ResetByPeer(code),
            H2Error::stream(id, code, "reset by peer"),
        );
        Ok(())
    }

    fn on_window_update(&mut self, id: StreamId, increment: u32) -> Result<(), H2Error> {
        if id.is_root() {
            return self.conn_send.increase(increment).map_err(|_| {
                H2Error::connection(ErrorCode::FlowControlError, "connection send window overflow")
            });
        }
        match self.streams.lookup(id, Instant::now()) {
            Lookup::Active => {}
            Lookup::RecentlyClosed | Lookup::Closed => return Ok(()),
            Lookup::Idle => return Err(H2Error::protocol("WINDOW_UPDATE on idle stream")),
        }
        if let Some(stream) = self.streams.get_mut(id) {
            stream.send_window.increase(increment).map_err(|_| {
                H2Error::stream(id, ErrorCode::FlowControlError, "stream send window overflow")
            })?;
        }
        Ok(())
    }

    fn on_settings(&mut self, pairs: &[Setting]) -> Result<(), H2Error> {
        let old_window = i64::from(self.remote_settings.initial_window_size);
        let old_table = self.remote_settings.header_table_size;
        self.remote_settings.apply_all(pairs)?;
        self.remote_settings_received = true;

        let delta = i64::from(self.remote_settings.initial_window_size) - old_window;
        if delta != 0 {
            for stream in self.streams.iter_mut() {
                stream.send_window.adjust(delta).map_err(|_| {
                    H2Error::connection(
                        ErrorCode::FlowControlError,
                        "INITIAL_WINDOW_SIZE change overflows a stream window",
                    )
                })?;
            }
        }
        if self.remote_settings.header_table_size != old_table {
            self.encoder
                .set_max_table_size(self.remote_settings.header_table_size as usize);
        }

        self.mux.push_control(Frame::settings_ack());
        debug!(settings = ?self.remote_settings, "peer settings applied");
        self.events.push_back(H2Event::Connection(ConnectionEvent::SettingsReceived(
            self.remote_settings.clone(),
        )));
        Ok(())
    }

    fn on_settings_ack(&mut self) {
        if self.unacked_settings == 0 {
            debug!("ignoring unsolicited SETTINGS ACK");
            return;
        }
        self.unacked_settings -= 1;
        self.decoder
            .set_max_table_size(self.local_settings.header_table_size as usize);
        debug!("local settings acknowledged");
        self.events
            .push_back(H2Event::Connection(ConnectionEvent::SettingsAcknowledged));
    }

    fn on_goaway(&mut self, last_stream_id: StreamId, error_code: ErrorCode, debug_data: Vec<u8>) {
        let last = self
            .goaway_received
            .map_or(last_stream_id, |prev| prev.min(last_stream_id));
        self.goaway_received = Some(last);
        self.state = ConnState::GoAwayReceived {
            last_stream_id: last,
        };
        debug!(last_stream_id = %last, %error_code, "GOAWAY received");
        self.events.push_back(H2Event::Connection(ConnectionEvent::GoAway {
            last_stream_id,
            error_code,
            debug_data,
        }));

        let role = self.config.role;
        for id in self.streams.ids() {
            if id.is_initiated_by(role) && id > last {
                debug!(stream_id = %id, "stream voided by GOAWAY");
                self.close_stream(
                    id,
                    CloseReason::Voided,
                    H2Error::StreamVoided {
                        stream_id: id,
                        last_stream_id: last,
                    },
                );
            }
        }
        self.fail_pending_opens(H2Error::GoingAway, CloseReason::Voided);
        self.check_quiesced();
    }

    fn on_stream_error(&mut self, id: StreamId, code: ErrorCode, reason: &str) {
        warn!(stream_id = %id, error_code = %code, reason, "stream error");
        self.mux.push_control(Frame::rst_stream(id, code));
        if self.streams.get(id).is_some() {
            self.push_stream_event(
                id,
                StreamEvent::Reset {
                    error_code: code,
                    remote: false,
                },
            );
            self.close_stream(id, CloseReason::ResetLocally(code), H2Error::stream(id, code, reason));
        }
    }

    fn fail_connection(&mut self, err: &H2Error) {
        let code = err.code().unwrap_or(ErrorCode::InternalError);
        warn!(error = %err, "connection error");
        let last = self.goaway_last_stream_id(None);
        self.goaway_sent = Some(last);
        self.mux
            .push_control(Frame::goaway(last, code, err.to_string().into_bytes()));
        self.state = ConnState::Closed;
        self.close_all(CloseReason::ConnectionError(code), err.clone());
        self.events
            .push_back(H2Event::Connection(ConnectionEvent::Error(err.clone())));
        self.events.push_back(H2Event::Connection(ConnectionEvent::Closed));
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Open a locally initiated stream.
    pub fn submit(&mut self, intent: StreamIntent) -> Result<StreamHandle, H2Error> {
        match self.state {
            ConnState::Active => {}
            ConnState::Closed => return Err(H2Error::ConnectionClosed),
            ConnState::GoAwaySent { .. } | ConnState::GoAwayReceived { .. } => {
                return Err(H2Error::GoingAway)
            }
        }
        match intent {
            StreamIntent::Request { headers, end_stream } => {
                if !self.config.role.is_client() {
                    return Err(UserError::WrongRole.into());
                }
                self.check_outbound_headers(&headers)?;
                if self.ids.is_exhausted() {
                    return Err(H2Error::StreamIdsExhausted);
                }
                let handle = StreamHandle::new();
                self.pending_opens.push_back(PendingOpen {
                    headers,
                    end_stream,
                    handle: handle.clone(),
                });
                self.activate_pending();
                Ok(handle)
            }
            StreamIntent::Push {
                associated,
                headers,
            } => self.submit_push(associated, headers),
        }
    }

    fn submit_push(&mut self, associated: StreamId, headers: HeaderBlock) -> Result<StreamHandle, H2Error> {
        if !self.config.role.is_server() {
            return Err(UserError::WrongRole.into());
        }
        if !self.remote_settings.enable_push {
            return Err(UserError::PushDisabled.into());
        }
        self.check_outbound_headers(&headers)?;
        let assoc = self
            .streams
            .get(associated)
            .ok_or(UserError::UnknownStream(associated))?;
        let pushable = assoc.initiator() == Initiator::Remote
            && matches!(assoc.state(), StreamState::Open | StreamState::HalfClosedRemote);
        if !pushable {
            return Err(UserError::InvalidStreamState(associated).into());
        }

        let id = self.ids.allocate()?;
        let handle = StreamHandle::new();
        handle.assigned.complete(id);
        let mut stream = self.new_stream(id, Initiator::Local);
        stream
            .reserve_local()
            .map_err(|_| UserError::InvalidStreamState(id))?;
        stream.opened = Some(handle.opened.clone());
        stream.closed = handle.closed.clone();
        stream.pushed = true;
        self.streams.insert(stream);
        if let Some(assoc) = self.streams.get_mut(associated) {
            assoc
                .pending
                .push_back(Outbound::PushPromise { promised: id, headers });
        }
        debug!(stream_id = %associated, promised_stream_id = %id, "push reserved");
        Ok(handle)
    }

    /// Queue an operation on an existing stream. Invalid operations fail here
    /// and nothing is queued.
    pub fn send(&mut self, id: StreamId, command: StreamCommand) -> Result<(), H2Error> {
        if self.is_closed() {
            return Err(H2Error::ConnectionClosed);
        }
        if id.is_root() {
            return Err(UserError::UnknownStream(id).into());
        }
        match command {
            StreamCommand::Headers { headers, end_stream } => {
                self.check_outbound_headers(&headers)?;
                let stream = self
                    .streams
                    .get_mut(id)
                    .ok_or(UserError::UnknownStream(id))?;
                stream
                    .send_headers(end_stream)
                    .map_err(|t| send_error(id, t))?;
                stream.pending.push_back(headers_item(headers, end_stream));
            }
            StreamCommand::Data { data, end_stream } => {
                let stream = self
                    .streams
                    .get_mut(id)
                    .ok_or(UserError::UnknownStream(id))?;
                stream.send_data(end_stream).map_err(|t| send_error(id, t))?;
                stream.pending.push_back(Outbound::Data { data, end_stream });
            }
            StreamCommand::Reset(code) => self.reset_locally(id, code)?,
            StreamCommand::Priority(spec) => {
                if spec.dependency == id {
                    return Err(UserError::InvalidStreamState(id).into());
                }
                match self.streams.get_mut(id) {
                    Some(stream) => stream.pending.push_back(Outbound::Priority(spec)),
                    None => self.mux.push_control(Frame::priority(id, spec)),
                }
            }
        }
        Ok(())
    }

    fn reset_locally(&mut self, id: StreamId, code: ErrorCode) -> Result<(), H2Error> {
        let on_wire = self
            .streams
            .get(id)
            .ok_or(UserError::UnknownStream(id))?
            .on_wire;
        if on_wire {
            self.mux.push_control(Frame::rst_stream(id, code));
        } else {
            // Never announced: drop an unsent PUSH_PROMISE and send nothing.
            for stream in self.streams.iter_mut() {
                stream
                    .pending
                    .retain(|o| !matches!(o, Outbound::PushPromise { promised, .. } if *promised == id));
            }
        }
        debug!(stream_id = %id, error_code = %code, on_wire, "stream reset locally");
        self.close_stream(
            id,
            CloseReason::ResetLocally(code),
            H2Error::stream(id, code, "reset before it was opened"),
        );
        Ok(())
    }

    /// Send a PING; the ACK surfaces as [`ConnectionEvent::PingAck`].
    pub fn ping(&mut self, data: [u8; 8]) -> Result<(), H2Error> {
        if self.is_closed() {
            return Err(H2Error::ConnectionClosed);
        }
        self.mux.push_control(Frame::ping(data));
        Ok(())
    }

    /// Queue GOAWAY. NO_ERROR quiesces; any other code closes at once.
    /// Repeated calls may only lower the advertised last stream id, and
    /// remain possible after a graceful shutdown has completed.
    pub fn close(&mut self, reason: GoAwayReason) -> Result<(), H2Error> {
        if self.is_closed() && !self.quiesced {
            return Err(H2Error::ConnectionClosed);
        }
        let last = self.goaway_last_stream_id(reason.last_stream_id);
        self.goaway_sent = Some(last);
        debug!(last_stream_id = %last, error_code = %reason.error_code, "sending GOAWAY");
        self.mux
            .push_control(Frame::goaway(last, reason.error_code, reason.debug_data));
        if self.is_closed() {
            return Ok(());
        }

        if reason.error_code != ErrorCode::NoError {
            let code = reason.error_code;
            self.state = ConnState::Closed;
            self.close_all(
                CloseReason::ConnectionError(code),
                H2Error::connection(code, "connection closed locally"),
            );
            self.events.push_back(H2Event::Connection(ConnectionEvent::Closed));
            return Ok(());
        }

        if !matches!(self.state, ConnState::GoAwayReceived { .. }) {
            self.state = ConnState::GoAwaySent {
                last_stream_id: last,
            };
        }
        // Peer streams above `last` will not be processed.
        let role = self.config.role;
        for id in self.streams.ids() {
            if !id.is_initiated_by(role) && id > last {
                self.mux
                    .push_control(Frame::rst_stream(id, ErrorCode::RefusedStream));
                self.close_stream(
                    id,
                    CloseReason::ResetLocally(ErrorCode::RefusedStream),
                    H2Error::GoingAway,
                );
            }
        }
        self.fail_pending_opens(H2Error::GoingAway, CloseReason::Voided);
        self.check_quiesced();
        Ok(())
    }

    fn goaway_last_stream_id(&self, requested: Option<StreamId>) -> StreamId {
        let last = requested.unwrap_or_else(|| self.streams.max_peer_id());
        self.goaway_sent.map_or(last, |prev| prev.min(last))
    }

    /// Serialize everything currently sendable.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.flush_to(&mut out);
        out
    }

    pub fn flush_to<S: FrameSink>(&mut self, sink: &mut S) {
        self.activate_pending();
        let mut out = std::mem::take(&mut self.preface);
        let mut ctx = FlushContext {
            streams: &mut self.streams,
            conn_window: &mut self.conn_send,
            encoder: &mut self.encoder,
            max_frame_size: self.remote_settings.max_frame_size,
        };
        let opened = self.mux.flush(&mut ctx, &mut out);
        for id in opened {
            if let Some(completion) = self.streams.get(id).and_then(|s| s.opened.as_ref()) {
                completion.complete(Ok(id));
            }
        }
        self.reap();
        if !out.is_empty() {
            sink.send_bytes(&out);
        }
        sink.flush();
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn poll_event(&mut self) -> Option<H2Event> {
        self.events.pop_front()
    }

    /// Drain all queued events into `observer`.
    pub fn dispatch_events<O: EventObserver>(&mut self, observer: &mut O) {
        while let Some(event) = self.events.pop_front() {
            match event {
                H2Event::Stream { stream_id, event } => observer.on_stream_event(stream_id, event),
                H2Event::Connection(event) => observer.on_connection_event(event),
            }
        }
    }

    fn push_stream_event(&mut self, stream_id: StreamId, event: StreamEvent) {
        self.events.push_back(H2Event::Stream { stream_id, event });
    }

    // ------------------------------------------------------------------
    // Stream bookkeeping
    // ------------------------------------------------------------------

    fn new_stream(&self, id: StreamId, initiator: Initiator) -> Stream {
        Stream::new(
            id,
            initiator,
            self.remote_settings.initial_window_size,
            self.local_settings.initial_window_size,
            self.config.window_update_divisor,
        )
    }

    fn check_outbound_headers(&self, headers: &[H2Header]) -> Result<(), H2Error> {
        validate_header_block(headers).map_err(UserError::MalformedHeaders)?;
        if let Some(limit) = self.remote_settings.max_header_list_size {
            let size = header_list_size(headers);
            if size > limit as usize {
                return Err(UserError::HeaderListTooLarge { size, limit }.into());
            }
        }
        Ok(())
    }

    /// Move queued requests into open streams while the peer's concurrency
    /// limit allows. Ids are allocated here so they stay increasing on the
    /// wire.
    fn activate_pending(&mut self) {
        while self.state == ConnState::Active {
            if let Some(max) = self.remote_settings.max_concurrent_streams {
                if self.streams.active_count(Initiator::Local) >= max as usize {
                    break;
                }
            }
            let Some(open) = self.pending_opens.pop_front() else {
                break;
            };
            let id = match self.ids.allocate() {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "cannot open stream");
                    open.handle.opened.complete(Err(e));
                    open.handle.closed.complete(CloseReason::Voided);
                    continue;
                }
            };
            let mut stream = self.new_stream(id, Initiator::Local);
            if let Err(t) = stream.send_headers(open.end_stream) {
                warn!(stream_id = %id, state = ?t.state, "new stream rejected HEADERS");
                continue;
            }
            stream.opened = Some(open.handle.opened.clone());
            stream.closed = open.handle.closed.clone();
            stream
                .pending
                .push_back(headers_item(open.headers, open.end_stream));
            open.handle.assigned.complete(id);
            self.streams.insert(stream);
            debug!(stream_id = %id, "stream opened");
        }
    }

    fn fail_pending_opens(&mut self, err: H2Error, reason: CloseReason) {
        for open in self.pending_opens.drain(..) {
            open.handle.opened.complete(Err(err.clone()));
            open.handle.closed.complete(reason.clone());
        }
    }

    /// Remove a stream, resolving its completions and emitting `Closed`.
    fn close_stream(&mut self, id: StreamId, reason: CloseReason, open_error: H2Error) {
        let Some(mut stream) = self.streams.remove(id, Instant::now()) else {
            return;
        };
        // A stream that already closed with a reason keeps it.
        stream.reset(reason).ok();
        let reason = stream.finish(|| open_error);
        debug!(stream_id = %id, ?reason, "stream closed");
        self.push_stream_event(id, StreamEvent::Closed(reason));
        self.check_quiesced();
    }

    fn close_all(&mut self, reason: CloseReason, open_error: H2Error) {
        for id in self.streams.ids() {
            self.close_stream(id, reason.clone(), open_error.clone());
        }
        self.fail_pending_opens(open_error, reason);
    }

    /// Retire streams that are closed and fully flushed.
    fn reap(&mut self) {
        let finished: Vec<StreamId> = self
            .streams
            .ids()
            .into_iter()
            .filter(|id| self.streams.get(*id).is_some_and(Stream::is_finished))
            .collect();
        for id in finished {
            self.close_stream(id, CloseReason::Completed, H2Error::ConnectionClosed);
        }
    }

    /// After GOAWAY, the connection closes once no streams remain. A local
    /// GOAWAY that still admits every stream id keeps it open for requests
    /// the peer may have in flight, until a second GOAWAY lowers the id.
    fn check_quiesced(&mut self) {
        let quiescing = match self.state {
            ConnState::GoAwaySent { last_stream_id } => last_stream_id != StreamId::MAX,
            ConnState::GoAwayReceived { .. } => true,
            ConnState::Active | ConnState::Closed => false,
        };
        if quiescing && self.streams.is_empty() && self.pending_opens.is_empty() {
            debug!("connection quiesced");
            self.state = ConnState::Closed;
            self.quiesced = true;
            self.events.push_back(H2Event::Connection(ConnectionEvent::Closed));
        }
    }
}

fn recv_error(id: StreamId, t: IllegalTransition, what: &str) -> H2Error {
    H2Error::stream(
        id,
        t.state.recv_error_code(),
        format!("{} not allowed in state {:?}", what, t.state),
    )
}

fn send_error(id: StreamId, t: IllegalTransition) -> H2Error {
    match t.state {
        StreamState::HalfClosedLocal | StreamState::Closed => UserError::SendAfterEndStream(id).into(),
        _ => UserError::InvalidStreamState(id).into(),
    }
}
