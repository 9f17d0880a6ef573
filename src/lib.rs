//! h2-mux: a sans-I/O HTTP/2 connection core
//!
//! This crate implements the connection-level half of HTTP/2 (RFC 7540) with
//! header compression (RFC 7541): framing, HPACK, flow control, the stream
//! state machine and an outbound multiplexer. It never touches a socket.
//!
//! # Features
//!
//! - **Sans-I/O Design**: bytes in through [`Connection::receive`], bytes out
//!   through [`Connection::flush`]; no async runtime required
//! - **Client and Server**: one state machine, parameterised by [`Role`]
//! - **Flow Control**: connection and stream windows, WINDOW_UPDATE batching,
//!   negative windows after a SETTINGS shrink
//! - **Multiplexing**: header frames of every stream go out ahead of DATA so
//!   one large body cannot stall the others
//! - **GOAWAY**: graceful quiescing and voiding of streams the peer never saw
//! - **Push Promise**: reservation and delivery in both directions
//!
//! # Quick Start
//!
//! ```rust
//! use h2_mux::{CloseReason, Connection, H2Event, H2Header, StreamCommand, StreamEvent, StreamIntent};
//!
//! fn pump(client: &mut Connection, server: &mut Connection) -> Result<(), h2_mux::H2Error> {
//!     loop {
//!         let to_server = client.flush();
//!         let to_client = server.flush();
//!         if to_server.is_empty() && to_client.is_empty() {
//!             return Ok(());
//!         }
//!         server.receive(&to_server)?;
//!         client.receive(&to_client)?;
//!     }
//! }
//!
//! let mut client = Connection::client();
//! let mut server = Connection::server();
//!
//! let request = client.submit(StreamIntent::Request {
//!     headers: vec![
//!         H2Header::new(":method", "GET"),
//!         H2Header::new(":scheme", "https"),
//!         H2Header::new(":authority", "example.com"),
//!         H2Header::new(":path", "/"),
//!     ],
//!     end_stream: true,
//! })?;
//! pump(&mut client, &mut server)?;
//!
//! while let Some(event) = server.poll_event() {
//!     if let H2Event::Stream { stream_id, event: StreamEvent::Headers { .. } } = event {
//!         server.send(stream_id, StreamCommand::Headers {
//!             headers: vec![H2Header::new(":status", "200")],
//!             end_stream: false,
//!         })?;
//!         server.send(stream_id, StreamCommand::Data {
//!             data: b"hello".to_vec(),
//!             end_stream: true,
//!         })?;
//!     }
//! }
//! pump(&mut client, &mut server)?;
//!
//! assert_eq!(request.closed.get(), Some(CloseReason::Completed));
//! # Ok::<(), h2_mux::H2Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`h2_codec`] splits bytes into validated [`Frame`]s
//! - [`hpack`] compresses and decompresses header blocks
//! - [`connection`] owns the streams and applies protocol rules
//! - the multiplexer serializes queued work in a fair order
//!
//! It does NOT provide:
//! - TCP transport or TLS (you provide the bytes)
//! - HTTP semantics beyond pseudo-header ordering
//! - Priority-tree scheduling (PRIORITY frames are relayed, not acted on)

pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod flow_control;
pub mod frame;
pub mod h2_codec;
pub mod hpack;
pub mod hpack_table;
mod multiplexer;
pub mod settings;
pub mod stream;
pub mod stream_id;

pub use completion::{Canceled, Completion};
pub use config::{FlushOrder, H2Config, Role, MAX_HEADER_BLOCK_SIZE};
pub use connection::{ConnState, Connection, GoAwayReason, StreamCommand, StreamHandle, StreamIntent};
pub use error::{ConfigError, ErrorCode, H2Error, UserError};
pub use event::{CloseReason, ConnectionEvent, EventObserver, FrameSink, H2Event, StreamEvent};
pub use flow_control::{FlowControlWindow, ReceiveWindow, WindowError};
pub use frame::{flags, frame_type, Frame, FrameFlags, FrameHeader, FramePayload, PrioritySpec};
pub use h2_codec::{is_h2c_preface, Decoded, H2Codec, CONNECTION_PREFACE};
pub use hpack::{H2Header, HeaderBlock, HpackDecoder, HpackEncoder};
pub use settings::{settings_id, Setting, Settings};
pub use stream::{Initiator, StreamState};
pub use stream_id::{StreamId, StreamIdAllocator};
