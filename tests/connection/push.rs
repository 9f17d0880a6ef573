//! Tests for server push

use h2_mux::{
    frame_type, CloseReason, ErrorCode, FlushOrder, H2Config, H2Error, H2Event, StreamCommand, StreamEvent, StreamId,
    StreamIntent, StreamState, UserError,
};

use super::{drain, frames, raw_connected_client, request, response, Pair, RawServer};

fn push_enabled_pair() -> Pair {
    Pair::connected_with(H2Config::client().with_enable_push(true), H2Config::server())
}

#[test]
fn test_server_push_delivers_promised_response() {
    let mut pair = push_enabled_pair();
    pair.get("/index.html");
    pair.pump();
    drain(&mut pair.server);

    let push = pair
        .server
        .submit(StreamIntent::Push {
            associated: StreamId::new(1),
            headers: request("/style.css"),
        })
        .unwrap();
    let promised = push.stream_id().unwrap();
    assert_eq!(promised, StreamId::new(2));
    assert_eq!(pair.server.stream_state(promised), Some(StreamState::ReservedLocal));

    pair.respond(promised, b"body { }");
    pair.respond(StreamId::new(1), b"<html>");

    let out = pair.server.flush();
    let sent = frames(&out);
    assert_eq!(sent[0].frame_type(), frame_type::PUSH_PROMISE);
    assert_eq!(push.opened.get(), Some(Ok(promised)));
    pair.client.receive(&out).unwrap();
    pair.pump();

    let events = drain(&mut pair.client);
    assert_eq!(
        events[0],
        H2Event::Stream {
            stream_id: StreamId::new(1),
            event: StreamEvent::PushPromise {
                promised_stream_id: promised,
                headers: request("/style.css"),
            },
        }
    );
    assert!(events.contains(&H2Event::Stream {
        stream_id: promised,
        event: StreamEvent::Data {
            data: b"body { }".to_vec(),
            end_stream: true,
        },
    }));
    assert!(events.contains(&H2Event::Stream {
        stream_id: promised,
        event: StreamEvent::Closed(CloseReason::Completed),
    }));
    assert_eq!(push.closed.get(), Some(CloseReason::Completed));
}

#[test]
fn test_push_rejected_when_peer_disabled_it() {
    let mut pair = Pair::connected();
    pair.get("/");
    pair.pump();
    let err = pair
        .server
        .submit(StreamIntent::Push {
            associated: StreamId::new(1),
            headers: request("/style.css"),
        })
        .unwrap_err();
    assert_eq!(err, H2Error::User(UserError::PushDisabled));
}

#[test]
fn test_client_cannot_push() {
    let mut pair = push_enabled_pair();
    let err = pair
        .client
        .submit(StreamIntent::Push {
            associated: StreamId::new(1),
            headers: request("/"),
        })
        .unwrap_err();
    assert_eq!(err, H2Error::User(UserError::WrongRole));
}

#[test]
fn test_push_on_unknown_stream_rejected() {
    let mut pair = push_enabled_pair();
    let err = pair
        .server
        .submit(StreamIntent::Push {
            associated: StreamId::new(9),
            headers: request("/"),
        })
        .unwrap_err();
    assert_eq!(err, H2Error::User(UserError::UnknownStream(StreamId::new(9))));
}

#[test]
fn test_reset_unsent_push_drops_promise() {
    let mut pair = push_enabled_pair();
    pair.get("/");
    pair.pump();

    let push = pair
        .server
        .submit(StreamIntent::Push {
            associated: StreamId::new(1),
            headers: request("/style.css"),
        })
        .unwrap();
    let promised = push.stream_id().unwrap();
    pair.server
        .send(promised, StreamCommand::Reset(ErrorCode::Cancel))
        .unwrap();

    assert!(pair.server.flush().is_empty());
    assert!(matches!(push.opened.get(), Some(Err(_))));
    assert_eq!(push.closed.get(), Some(CloseReason::ResetLocally(ErrorCode::Cancel)));
}

#[test]
fn test_push_promise_while_disabled_is_connection_error() {
    let mut client = raw_connected_client(H2Config::client());
    client
        .submit(StreamIntent::Request {
            headers: request("/"),
            end_stream: true,
        })
        .unwrap();
    client.flush();

    let mut server = RawServer::new();
    let err = client
        .receive(&server.push_promise(1, 2, &request("/style.css")))
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
}

#[test]
fn test_client_cancels_promised_stream() {
    let mut pair = push_enabled_pair();
    pair.get("/");
    pair.pump();
    let push = pair
        .server
        .submit(StreamIntent::Push {
            associated: StreamId::new(1),
            headers: request("/style.css"),
        })
        .unwrap();
    pair.pump();
    let promised = push.stream_id().unwrap();
    assert_eq!(pair.client.stream_state(promised), Some(StreamState::ReservedRemote));

    pair.client
        .send(promised, StreamCommand::Reset(ErrorCode::Cancel))
        .unwrap();
    pair.pump();
    assert_eq!(push.closed.get(), Some(CloseReason::ResetByPeer(ErrorCode::Cancel)));

    // the response on the associated stream is unaffected
    pair.server
        .send(
            StreamId::new(1),
            StreamCommand::Headers {
                headers: response("200"),
                end_stream: true,
            },
        )
        .unwrap();
    pair.pump();
    assert_eq!(pair.client.stream_state(StreamId::new(1)), None);
    assert_eq!(pair.server.active_stream_count(), 0);
}

/// Queue a response with an unfinished body on stream 1, then push a
/// response that is ready at once.
fn push_behind_queued_data(pair: &mut Pair) -> h2_mux::StreamHandle {
    pair.get("/index.html");
    pair.pump();
    drain(&mut pair.server);

    let id = StreamId::new(1);
    pair.server
        .send(
            id,
            StreamCommand::Headers {
                headers: response("200"),
                end_stream: false,
            },
        )
        .unwrap();
    pair.server
        .send(
            id,
            StreamCommand::Data {
                data: b"<html>".to_vec(),
                end_stream: false,
            },
        )
        .unwrap();
    let push = pair
        .server
        .submit(StreamIntent::Push {
            associated: id,
            headers: request("/style.css"),
        })
        .unwrap();
    pair.server
        .send(
            push.stream_id().unwrap(),
            StreamCommand::Headers {
                headers: response("200"),
                end_stream: true,
            },
        )
        .unwrap();
    push
}

fn check_promise_precedes_pushed_headers(order: FlushOrder) {
    let server = H2Config::server().with_flush_order(order);
    let mut pair = Pair::connected_with(H2Config::client().with_enable_push(true), server);
    let push = push_behind_queued_data(&mut pair);

    let out = pair.server.flush();
    let sent: Vec<(u32, u8)> = frames(&out)
        .iter()
        .map(|f| (f.stream_id.value(), f.frame_type()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (1, frame_type::HEADERS),
            (1, frame_type::DATA),
            (1, frame_type::PUSH_PROMISE),
            (2, frame_type::HEADERS),
        ]
    );

    pair.client.receive(&out).unwrap();
    assert!(!pair.client.is_closed());
    assert_eq!(push.closed.get(), Some(CloseReason::Completed));
}

#[test]
fn test_push_promise_precedes_pushed_headers_headers_first() {
    check_promise_precedes_pushed_headers(FlushOrder::HeadersFirst);
}

#[test]
fn test_push_promise_precedes_pushed_headers_per_stream() {
    check_promise_precedes_pushed_headers(FlushOrder::PerStream);
}

#[test]
fn test_pushed_stream_waits_while_associated_data_is_blocked() {
    // two bytes of stream window for the server's response body
    let client = H2Config::client()
        .with_enable_push(true)
        .with_initial_window_size(2);
    let mut pair = Pair::connected_with(client, H2Config::server());
    let push = push_behind_queued_data(&mut pair);

    let out = pair.server.flush();
    let sent = frames(&out);
    assert!(sent.iter().all(|f| f.stream_id == StreamId::new(1)));
    assert!(sent.iter().all(|f| f.frame_type() != frame_type::PUSH_PROMISE));
    assert_eq!(push.opened.get(), None);

    pair.client.receive(&out).unwrap();
    pair.pump();
    assert!(!pair.client.is_closed());
    assert_eq!(push.opened.get(), Some(Ok(StreamId::new(2))));
    assert_eq!(push.closed.get(), Some(CloseReason::Completed));
}
