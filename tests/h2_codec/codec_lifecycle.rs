//! Tests for H2Codec lifecycle (preface, incremental decode, recovery)

use h2_mux::{Decoded, ErrorCode, Frame, H2Codec, H2Error, Role, StreamId, CONNECTION_PREFACE};

use super::client_codec;

#[test]
fn test_server_codec_expects_preface() {
    let codec = H2Codec::new(Role::Server);
    assert!(!codec.preface_received());
    assert!(client_codec().preface_received());
}

#[test]
fn test_bad_preface_is_protocol_error() {
    let mut codec = H2Codec::new(Role::Server);
    let err = codec.process(b"GET / HTTP/1.1\r\n").unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
}

#[test]
fn test_preface_skipped_when_marked_received() {
    let mut codec = H2Codec::new(Role::Server);
    codec.set_preface_received(true);
    let frames = codec.process(&Frame::ping([7; 8]).to_bytes()).unwrap();
    assert_eq!(frames, vec![Frame::ping([7; 8])]);
}

#[test]
fn test_decode_one_frame_at_a_time() {
    let mut codec = H2Codec::new(Role::Server);
    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend_from_slice(&Frame::settings(Vec::new()).to_bytes());
    data.extend_from_slice(&Frame::window_update(StreamId::ROOT, 10).to_bytes());
    codec.feed(&data);

    assert_eq!(codec.decode().unwrap(), Decoded::Frame(Frame::settings(Vec::new())));
    assert_eq!(
        codec.decode().unwrap(),
        Decoded::Frame(Frame::window_update(StreamId::ROOT, 10))
    );
    assert_eq!(codec.decode().unwrap(), Decoded::NeedMoreData);
}

#[test]
fn test_stream_error_does_not_poison_buffer() {
    let mut codec = client_codec();
    // PRIORITY with a 4-byte payload, followed by a valid PING
    let mut data = vec![0, 0, 4, 2, 0, 0, 0, 0, 1, 0, 0, 0, 0];
    data.extend_from_slice(&Frame::ping([1; 8]).to_bytes());
    codec.feed(&data);

    match codec.decode() {
        Err(H2Error::Stream {
            stream_id, code, ..
        }) => {
            assert_eq!(stream_id, StreamId::new(1));
            assert_eq!(code, ErrorCode::FrameSizeError);
        }
        other => panic!("Expected stream error, got {:?}", other),
    }
    assert_eq!(codec.decode().unwrap(), Decoded::Frame(Frame::ping([1; 8])));
}

#[test]
fn test_max_frame_size_is_adjustable() {
    let mut codec = client_codec();
    let frame = Frame::data(StreamId::new(1), vec![0; 20_000], false).to_bytes();

    let err = codec.process(&frame).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));

    let mut codec = client_codec();
    codec.set_max_frame_size(32_768);
    assert_eq!(codec.max_frame_size(), 32_768);
    assert_eq!(codec.process(&frame).unwrap().len(), 1);
}
