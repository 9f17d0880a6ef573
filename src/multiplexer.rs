//! Outbound frame scheduling.
//!
//! Control frames leave first in queue order. Stream frames follow, in
//! submission order within a stream and interleaved across streams according
//! to [`FlushOrder`]. Header blocks are HPACK-encoded here, at serialization
//! time, so the peer's decoder sees blocks in the same order our encoder
//! produced them.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::FlushOrder;
use crate::flow_control::{sendable, FlowControlWindow};
use crate::frame::{Frame, FramePayload, PrioritySpec};
use crate::hpack::{HeaderBlock, HpackEncoder};
use crate::stream::{Outbound, StreamStore};
use crate::stream_id::StreamId;

/// Everything a flush needs to borrow from the connection.
pub(crate) struct FlushContext<'a> {
    pub streams: &'a mut StreamStore,
    pub conn_window: &'a mut FlowControlWindow,
    pub encoder: &'a mut HpackEncoder,
    pub max_frame_size: u32,
}

/// Outcome of writing one stream's next item.
enum Step {
    Wrote,
    /// DATA is waiting for flow-control credit.
    Blocked,
    /// Nothing queued, or (in the header pass) the next item is DATA.
    Idle,
}

#[derive(Debug)]
pub(crate) struct Multiplexer {
    control: VecDeque<Frame>,
    order: FlushOrder,
}

impl Multiplexer {
    pub(crate) fn new(order: FlushOrder) -> Self {
        Self {
            control: VecDeque::new(),
            order,
        }
    }

    pub(crate) fn push_control(&mut self, frame: Frame) {
        self.control.push_back(frame);
    }

    /// Serialize everything that may be sent now into `out`. Returns the
    /// ids of streams whose opening frame was written by this call.
    pub(crate) fn flush(&mut self, ctx: &mut FlushContext<'_>, out: &mut Vec<u8>) -> Vec<StreamId> {
        while let Some(frame) = self.control.pop_front() {
            write_frame(&frame, out);
        }

        let mut opened = Vec::new();
        let ids = ctx.streams.ids();
        match self.order {
            FlushOrder::HeadersFirst => {
                for &id in &ids {
                    while let Step::Wrote = write_next(ctx, id, true, out, &mut opened) {}
                }
                round_robin(ctx, &ids, out, &mut opened);
            }
            FlushOrder::PerStream => {
                for &id in &ids {
                    while let Step::Wrote = write_next(ctx, id, false, out, &mut opened) {}
                }
            }
        }
        opened
    }
}

/// One item per stream per turn until no stream can make progress.
fn round_robin(ctx: &mut FlushContext<'_>, ids: &[StreamId], out: &mut Vec<u8>, opened: &mut Vec<StreamId>) {
    loop {
        let mut progress = false;
        for &id in ids {
            if let Step::Wrote = write_next(ctx, id, false, out, opened) {
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }
}

fn write_frame(frame: &Frame, out: &mut Vec<u8>) {
    trace!(
        stream_id = %frame.stream_id,
        frame_type = frame.frame_type(),
        flags = frame.flags.bits(),
        length = frame.payload.len(),
        "encoded frame"
    );
    frame.encode(out);
}

/// Write the next queued item of stream `id`. With `headers_only` DATA is
/// left in place.
fn write_next(
    ctx: &mut FlushContext<'_>,
    id: StreamId,
    headers_only: bool,
    out: &mut Vec<u8>,
    opened: &mut Vec<StreamId>,
) -> Step {
    let max_frame = ctx.max_frame_size;
    let Some(stream) = ctx.streams.get_mut(id) else {
        return Step::Idle;
    };
    if stream.pushed && !stream.on_wire {
        // held until the associated stream writes the PUSH_PROMISE
        return Step::Idle;
    }
    let Some(front) = stream.pending.front_mut() else {
        return Step::Idle;
    };
    if headers_only && !front.is_header_type() {
        return Step::Idle;
    }

    if let Outbound::Data { data, end_stream } = front {
        let end_stream = *end_stream;
        if data.is_empty() {
            write_frame(&Frame::data(id, Vec::new(), end_stream), out);
            stream.pending.pop_front();
            return Step::Wrote;
        }
        let n = sendable(ctx.conn_window, &stream.send_window, max_frame) as usize;
        if n == 0 {
            debug!(
                stream_id = %id,
                queued = data.len(),
                stream_window = stream.send_window.window(),
                conn_window = ctx.conn_window.window(),
                "DATA deferred awaiting flow-control credit"
            );
            return Step::Blocked;
        }
        let n = n.min(data.len());
        let chunk: Vec<u8> = data.drain(..n).collect();
        let last = data.is_empty();
        let conn_ok = ctx.conn_window.consume(n as u32).is_ok();
        let stream_ok = stream.send_window.consume(n as u32).is_ok();
        debug_assert!(conn_ok && stream_ok, "DATA chunk of {} exceeds a send window", n);
        write_frame(&Frame::data(id, chunk, end_stream && last), out);
        if last {
            stream.pending.pop_front();
        }
        return Step::Wrote;
    }

    let Some(item) = stream.pending.pop_front() else {
        return Step::Idle;
    };
    match item {
        Outbound::Headers {
            headers,
            end_stream,
            priority,
        } => {
            let block = ctx.encoder.encode(&headers);
            write_header_block(id, HeaderKind::Headers { end_stream, priority }, block, max_frame, out);
            if !stream.on_wire {
                stream.on_wire = true;
                opened.push(id);
            }
        }
        Outbound::PushPromise { promised, headers } => {
            let block = ctx.encoder.encode(&headers);
            write_header_block(id, HeaderKind::PushPromise(promised), block, max_frame, out);
            if let Some(p) = ctx.streams.get_mut(promised) {
                p.on_wire = true;
            }
            opened.push(promised);
        }
        Outbound::Priority(spec) => write_frame(&Frame::priority(id, spec), out),
        Outbound::Data { .. } => {}
    }
    Step::Wrote
}

enum HeaderKind {
    Headers {
        end_stream: bool,
        priority: Option<PrioritySpec>,
    },
    PushPromise(StreamId),
}

/// Write a header block as HEADERS / PUSH_PROMISE followed by as many
/// CONTINUATION frames as the peer's max frame size requires.
fn write_header_block(id: StreamId, kind: HeaderKind, block: Vec<u8>, max_frame: u32, out: &mut Vec<u8>) {
    let max_frame = max_frame as usize;
    let overhead = match &kind {
        HeaderKind::Headers { priority, .. } => priority.map_or(0, |_| 5),
        HeaderKind::PushPromise(_) => 4,
    };
    let first_len = block.len().min(max_frame - overhead);
    let mut rest = block;
    let first: Vec<u8> = rest.drain(..first_len).collect();
    let end_headers = rest.is_empty();

    let mut frame = match kind {
        HeaderKind::Headers {
            end_stream,
            priority,
        } => {
            let mut f = Frame::headers(id, first, end_stream, end_headers);
            if let FramePayload::Headers { priority: p, .. } = &mut f.payload {
                *p = priority;
            }
            f
        }
        HeaderKind::PushPromise(promised) => Frame::push_promise(id, promised, first, end_headers),
    };
    write_frame(&frame, out);

    while !rest.is_empty() {
        let len = rest.len().min(max_frame);
        let fragment: Vec<u8> = rest.drain(..len).collect();
        frame = Frame::continuation(id, fragment, rest.is_empty());
        write_frame(&frame, out);
    }
}

/// A HEADERS item without priority.
pub(crate) fn headers_item(headers: HeaderBlock, end_stream: bool) -> Outbound {
    Outbound::Headers {
        headers,
        end_stream,
        priority: None,
    }
}
