//! Connection-level tests: two endpoints wired back to back, or one endpoint
//! driven with hand-built frames.

mod handshake;
mod push;
mod requests;

use h2_mux::{
    Connection, Frame, H2Codec, H2Config, H2Event, H2Header, HeaderBlock, HpackEncoder, Role, Settings, StreamCommand,
    StreamHandle, StreamId, StreamIntent, CONNECTION_PREFACE,
};

pub fn request(path: &str) -> HeaderBlock {
    vec![
        H2Header::new(":method", "GET"),
        H2Header::new(":scheme", "https"),
        H2Header::new(":authority", "example.com"),
        H2Header::new(":path", path),
    ]
}

pub fn response(status: &str) -> HeaderBlock {
    vec![
        H2Header::new(":status", status),
        H2Header::new("content-type", "text/plain"),
    ]
}

/// Decode frames an endpoint wrote, skipping the client magic if present.
pub fn frames(bytes: &[u8]) -> Vec<Frame> {
    frames_with_max_size(bytes, 16_384)
}

pub fn frames_with_max_size(bytes: &[u8], max_frame_size: u32) -> Vec<Frame> {
    let bytes = bytes.strip_prefix(CONNECTION_PREFACE).unwrap_or(bytes);
    let mut codec = H2Codec::new(Role::Client);
    codec.set_max_frame_size(max_frame_size);
    codec.process(bytes).unwrap()
}

pub fn drain(conn: &mut Connection) -> Vec<H2Event> {
    std::iter::from_fn(|| conn.poll_event()).collect()
}

/// A client and a server connected in memory.
pub struct Pair {
    pub client: Connection,
    pub server: Connection,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_configs(H2Config::client(), H2Config::server())
    }

    pub fn with_configs(client: H2Config, server: H2Config) -> Self {
        Self {
            client: Connection::new(client).unwrap(),
            server: Connection::new(server).unwrap(),
        }
    }

    /// A pair that has exchanged and acknowledged SETTINGS, with events
    /// drained.
    pub fn connected() -> Self {
        Self::connected_with(H2Config::client(), H2Config::server())
    }

    pub fn connected_with(client: H2Config, server: H2Config) -> Self {
        let mut pair = Self::with_configs(client, server);
        pair.pump();
        drain(&mut pair.client);
        drain(&mut pair.server);
        pair
    }

    /// Shuttle bytes both ways until neither side has anything to send.
    pub fn pump(&mut self) {
        loop {
            let to_server = self.client.flush();
            if !to_server.is_empty() {
                self.server.receive(&to_server).unwrap();
            }
            let to_client = self.server.flush();
            if !to_client.is_empty() {
                self.client.receive(&to_client).unwrap();
            }
            if to_server.is_empty() && to_client.is_empty() {
                break;
            }
        }
    }

    pub fn get(&mut self, path: &str) -> StreamHandle {
        self.client
            .submit(StreamIntent::Request {
                headers: request(path),
                end_stream: true,
            })
            .unwrap()
    }

    /// Answer a request with a single-frame body.
    pub fn respond(&mut self, id: StreamId, body: &[u8]) {
        self.server
            .send(
                id,
                StreamCommand::Headers {
                    headers: response("200"),
                    end_stream: false,
                },
            )
            .unwrap();
        self.server
            .send(
                id,
                StreamCommand::Data {
                    data: body.to_vec(),
                    end_stream: true,
                },
            )
            .unwrap();
    }
}

/// The server side of a connection, written by hand.
pub struct RawServer {
    pub encoder: HpackEncoder,
}

impl RawServer {
    pub fn new() -> Self {
        Self {
            encoder: HpackEncoder::new(),
        }
    }

    pub fn settings(&self, settings: &Settings) -> Vec<u8> {
        Frame::settings(settings.to_pairs()).to_bytes()
    }

    pub fn headers(&mut self, id: u32, headers: &[H2Header], end_stream: bool) -> Vec<u8> {
        let block = self.encoder.encode(headers);
        Frame::headers(StreamId::new(id), block, end_stream, true).to_bytes()
    }

    pub fn push_promise(&mut self, id: u32, promised: u32, headers: &[H2Header]) -> Vec<u8> {
        let block = self.encoder.encode(headers);
        Frame::push_promise(StreamId::new(id), StreamId::new(promised), block, true).to_bytes()
    }
}

/// A client whose preface SETTINGS were already received by the raw server.
pub fn raw_connected_client(config: H2Config) -> Connection {
    let mut client = Connection::new(config).unwrap();
    client.flush();
    client
        .receive(&Frame::settings(Vec::new()).to_bytes())
        .unwrap();
    client.flush();
    drain(&mut client);
    client
}

/// A server that has seen the client preface and an empty SETTINGS frame.
pub fn raw_connected_server(config: H2Config) -> Connection {
    let mut server = Connection::new(config).unwrap();
    let mut preface = CONNECTION_PREFACE.to_vec();
    preface.extend_from_slice(&Frame::settings(Vec::new()).to_bytes());
    server.receive(&preface).unwrap();
    server.flush();
    drain(&mut server);
    server
}
