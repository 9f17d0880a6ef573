//! Tests for request/response exchanges and outbound frame ordering

use h2_mux::{
    frame_type, CloseReason, ConnectionEvent, EventObserver, FlushOrder, H2Config, H2Event, H2Header, StreamCommand,
    StreamEvent, StreamId, StreamIntent, StreamState,
};

use super::{drain, frames, request, response, Pair};

#[test]
fn test_request_response_round_trip() {
    let mut pair = Pair::connected();
    let handle = pair.get("/index.html");
    assert_eq!(handle.stream_id(), Some(StreamId::new(1)));
    pair.pump();

    assert_eq!(handle.opened.get(), Some(Ok(StreamId::new(1))));
    let server_events = drain(&mut pair.server);
    assert_eq!(
        server_events,
        vec![H2Event::Stream {
            stream_id: StreamId::new(1),
            event: StreamEvent::Headers {
                headers: request("/index.html"),
                end_stream: true,
            },
        }]
    );
    assert_eq!(
        pair.server.stream_state(StreamId::new(1)),
        Some(StreamState::HalfClosedRemote)
    );

    pair.respond(StreamId::new(1), b"hello");
    pair.pump();

    let client_events = drain(&mut pair.client);
    let id = StreamId::new(1);
    assert_eq!(
        client_events,
        vec![
            H2Event::Stream {
                stream_id: id,
                event: StreamEvent::Headers {
                    headers: response("200"),
                    end_stream: false,
                },
            },
            H2Event::Stream {
                stream_id: id,
                event: StreamEvent::Data {
                    data: b"hello".to_vec(),
                    end_stream: true,
                },
            },
            H2Event::Stream {
                stream_id: id,
                event: StreamEvent::Closed(CloseReason::Completed),
            },
        ]
    );
    assert_eq!(handle.closed.get(), Some(CloseReason::Completed));
    assert_eq!(pair.client.active_stream_count(), 0);
    assert_eq!(pair.server.active_stream_count(), 0);
}

#[test]
fn test_request_with_body_and_trailers() {
    let mut pair = Pair::connected();
    let handle = pair
        .client
        .submit(StreamIntent::Request {
            headers: request("/upload"),
            end_stream: false,
        })
        .unwrap();
    let id = handle.stream_id().unwrap();
    pair.client
        .send(
            id,
            StreamCommand::Data {
                data: b"payload".to_vec(),
                end_stream: false,
            },
        )
        .unwrap();
    pair.client
        .send(
            id,
            StreamCommand::Headers {
                headers: vec![H2Header::new("x-checksum", "abc")],
                end_stream: true,
            },
        )
        .unwrap();
    pair.pump();

    let events: Vec<StreamEvent> = drain(&mut pair.server)
        .into_iter()
        .filter_map(|e| match e {
            H2Event::Stream { event, .. } => Some(event),
            H2Event::Connection(_) => None,
        })
        .collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], StreamEvent::Data { end_stream: false, .. }));
    assert_eq!(
        events[2],
        StreamEvent::Headers {
            headers: vec![H2Header::new("x-checksum", "abc")],
            end_stream: true,
        }
    );
    assert_eq!(pair.server.stream_state(id), Some(StreamState::HalfClosedRemote));
}

fn queue_uploads(pair: &mut Pair, count: usize, body_len: usize) {
    for _ in 0..count {
        let handle = pair
            .client
            .submit(StreamIntent::Request {
                headers: request("/upload"),
                end_stream: false,
            })
            .unwrap();
        pair.client
            .send(
                handle.stream_id().unwrap(),
                StreamCommand::Data {
                    data: vec![0x55; body_len],
                    end_stream: true,
                },
            )
            .unwrap();
    }
}

#[test]
fn test_headers_first_sends_all_headers_before_data() {
    let mut pair = Pair::connected();
    queue_uploads(&mut pair, 3, 20_000);

    let sent = frames(&pair.client.flush());
    let kinds: Vec<(u8, u32)> = sent.iter().map(|f| (f.frame_type(), f.stream_id.value())).collect();
    assert_eq!(
        kinds,
        vec![
            (frame_type::HEADERS, 1),
            (frame_type::HEADERS, 3),
            (frame_type::HEADERS, 5),
            (frame_type::DATA, 1),
            (frame_type::DATA, 3),
            (frame_type::DATA, 5),
            (frame_type::DATA, 1),
            (frame_type::DATA, 3),
            (frame_type::DATA, 5),
        ]
    );
    assert_eq!(sent[3].flow_controlled_len(), 16_384);
    assert!(sent[8].flags.end_stream());
}

#[test]
fn test_per_stream_order_drains_each_stream() {
    let client = H2Config::client().with_flush_order(FlushOrder::PerStream);
    let mut pair = Pair::connected_with(client, H2Config::server());
    queue_uploads(&mut pair, 2, 20_000);

    let sent = frames(&pair.client.flush());
    let kinds: Vec<(u8, u32)> = sent.iter().map(|f| (f.frame_type(), f.stream_id.value())).collect();
    assert_eq!(
        kinds,
        vec![
            (frame_type::HEADERS, 1),
            (frame_type::DATA, 1),
            (frame_type::DATA, 1),
            (frame_type::HEADERS, 3),
            (frame_type::DATA, 3),
            (frame_type::DATA, 3),
        ]
    );
}

#[test]
fn test_large_header_block_split_into_continuation() {
    let mut pair = Pair::connected();
    let mut headers = request("/big");
    headers.push(H2Header::new("x-blob", "z".repeat(40_000)));
    pair.client
        .submit(StreamIntent::Request {
            headers: headers.clone(),
            end_stream: true,
        })
        .unwrap();

    let out = pair.client.flush();
    let sent = frames(&out);
    assert_eq!(sent[0].frame_type(), frame_type::HEADERS);
    assert!(!sent[0].flags.end_headers());
    assert!(sent[1..].iter().all(|f| f.frame_type() == frame_type::CONTINUATION));
    assert!(sent.last().unwrap().flags.end_headers());

    pair.server.receive(&out).unwrap();
    assert!(drain(&mut pair.server).contains(&H2Event::Stream {
        stream_id: StreamId::new(1),
        event: StreamEvent::Headers {
            headers,
            end_stream: true,
        },
    }));
}

#[test]
fn test_requests_wait_for_concurrency_slot() {
    let server = H2Config::server().with_max_concurrent_streams(1);
    let mut pair = Pair::connected_with(H2Config::client(), server);

    let first = pair.get("/a");
    let second = pair.get("/b");
    assert_eq!(first.stream_id(), Some(StreamId::new(1)));
    assert_eq!(second.stream_id(), None);
    assert_eq!(pair.client.pending_open_count(), 1);

    pair.pump();
    assert!(!second.opened.is_complete());

    pair.respond(StreamId::new(1), b"a");
    pair.pump();
    assert_eq!(first.closed.get(), Some(CloseReason::Completed));
    assert_eq!(second.stream_id(), Some(StreamId::new(3)));
    assert_eq!(second.opened.get(), Some(Ok(StreamId::new(3))));
    assert_eq!(pair.client.pending_open_count(), 0);
}

#[derive(Default)]
struct Recorder {
    streams: Vec<(StreamId, StreamEvent)>,
    connection: Vec<ConnectionEvent>,
}

impl EventObserver for Recorder {
    fn on_stream_event(&mut self, stream_id: StreamId, event: StreamEvent) {
        self.streams.push((stream_id, event));
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        self.connection.push(event);
    }
}

#[test]
fn test_dispatch_events_to_observer() {
    let mut pair = Pair::new();
    pair.pump();
    pair.get("/");
    pair.pump();

    let mut recorder = Recorder::default();
    pair.server.dispatch_events(&mut recorder);
    assert!(recorder
        .connection
        .iter()
        .any(|e| matches!(e, ConnectionEvent::SettingsReceived(_))));
    assert_eq!(recorder.streams.len(), 1);
    assert_eq!(recorder.streams[0].0, StreamId::new(1));
    assert!(pair.server.poll_event().is_none());
}
