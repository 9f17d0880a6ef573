//! Tests for the connection preface and SETTINGS exchange

use h2_mux::{
    settings_id, ConnState, Connection, ConnectionEvent, ErrorCode, Frame, FramePayload, H2Event, Setting,
    CONNECTION_PREFACE,
};

use super::{drain, frames, Pair};

#[test]
fn test_client_preface_starts_with_magic() {
    let mut client = Connection::client();
    let out = client.flush();
    assert!(out.starts_with(CONNECTION_PREFACE));

    let sent = frames(&out);
    let FramePayload::Settings(pairs) = &sent[0].payload else {
        panic!("expected SETTINGS, got {:?}", sent[0]);
    };
    assert!(pairs.contains(&Setting::new(settings_id::ENABLE_PUSH, 0)));
}

#[test]
fn test_server_preface_is_settings_only() {
    let mut server = Connection::server();
    let out = server.flush();
    assert!(!out.starts_with(CONNECTION_PREFACE));
    let sent = frames(&out);
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].payload, FramePayload::Settings(_)));
}

#[test]
fn test_settings_exchanged_and_acknowledged() {
    let mut pair = Pair::new();
    pair.pump();

    assert!(pair.client.settings_acknowledged());
    assert!(pair.server.settings_acknowledged());
    assert_eq!(pair.client.remote_settings().max_concurrent_streams, Some(100));
    assert!(!pair.server.remote_settings().enable_push);
    assert_eq!(pair.client.state(), ConnState::Active);

    let events = drain(&mut pair.client);
    assert!(events
        .iter()
        .any(|e| matches!(e, H2Event::Connection(ConnectionEvent::SettingsReceived(_)))));
    assert!(events.contains(&H2Event::Connection(ConnectionEvent::SettingsAcknowledged)));
}

#[test]
fn test_bad_preface_is_protocol_error() {
    let mut server = Connection::server();
    server.flush();
    let err = server.receive(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    assert!(server.is_closed());

    let sent = frames(&server.flush());
    assert!(matches!(
        sent.last().map(|f| &f.payload),
        Some(FramePayload::GoAway {
            error_code: ErrorCode::ProtocolError,
            ..
        })
    ));
}

#[test]
fn test_preface_split_across_reads() {
    let mut client = Connection::client();
    let out = client.flush();
    let mut server = Connection::server();
    for chunk in out.chunks(5) {
        server.receive(chunk).unwrap();
    }
    assert!(server.remote_settings().max_concurrent_streams.is_none());
    let sent = frames(&server.flush());
    assert!(sent.contains(&Frame::settings_ack()));
}

#[test]
fn test_input_after_connection_error_is_ignored() {
    let mut client = Connection::client();
    client.flush();
    assert!(client.receive(&Frame::ping([0; 8]).to_bytes()).is_err());
    let events = drain(&mut client);
    assert!(matches!(events[0], H2Event::Connection(ConnectionEvent::Error(_))));
    assert_eq!(events[1], H2Event::Connection(ConnectionEvent::Closed));

    client.flush();
    assert!(client.receive(&Frame::settings(Vec::new()).to_bytes()).is_ok());
    assert!(client.flush().is_empty());
    assert!(drain(&mut client).is_empty());
}
