//! HTTP/2 protocol implementation
//!
//! A synchronous HTTP/2 engine (RFC 7540, RFC 7541) for both ends of a
//! connection, plus the GZIPPED_DATA and DROPPED_FRAME extension frames.
//!
//! # Architecture
//!
//! The layers, bottom-up:
//!
//! - [`frames`] and [`codec`]: frame types and the byte-level framing
//! - [`headers_hook`]: reassembly of HEADERS/PUSH_PROMISE + CONTINUATION
//! - [`hpack`]: header compression with static/dynamic tables and Huffman
//! - [`stream`], [`priority`], [`flow_control`], [`settings`]: per-stream
//!   and per-connection state
//! - [`agent`]: the connection engine tying the above together
//! - [`client`] and [`server`]: role-specific handles that run an agent
//!   on a reader thread
//!
//! # Examples
//!
//! ## HTTP/2 Client
//!
//! ```no_run
//! use h2engine::http::h2::H2ClientBuilder;
//! use h2engine::http::{Request, TcpTransport};
//! use std::net::TcpStream;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080")?;
//! let client = H2ClientBuilder::new()
//!     .on_response(|id, response| println!("{}: {}", id, response.status()))
//!     .connect(Box::new(TcpTransport::new(stream)))?;
//!
//! let request = Request::builder().path("/").authority("localhost").build();
//! client.request(&request)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## HTTP/2 Server
//!
//! ```no_run
//! use h2engine::http::h2::H2ServerBuilder;
//! use h2engine::http::{Response, Status, TcpTransport};
//! use std::net::TcpListener;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TcpListener::bind("127.0.0.1:8080")?;
//! let (stream, _) = listener.accept()?;
//! let mut server = H2ServerBuilder::new().build()?;
//! let responder = server.agent();
//! let handle = responder.clone();
//! responder.on_request(move |id, _request| {
//!     let response = Response::builder().status(Status::OK).body("hello").build();
//!     let _ = handle.respond(id, &response);
//! });
//! server.serve(Box::new(TcpTransport::new(stream)))?;
//! server.join()?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod client;
pub mod codec;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod headers_hook;
pub mod hpack;
pub mod priority;
pub mod server;
pub mod settings;
pub mod stream;

pub use agent::{Agent, AgentConfig, PayloadCodec, Role};
pub use client::{H2Client, H2ClientBuilder};
pub use codec::{FrameDeserializer, FrameSerializer};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame};
pub use hpack::{HPack, HeaderField, IndexPolicy};
pub use server::{H2Server, H2ServerBuilder};
pub use settings::{Settings, SettingsBuilder, SettingsParameter};
pub use stream::{StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Initial window size we advertise for inbound DATA
pub const LOCAL_INITIAL_WINDOW_SIZE: u32 = 0x20000;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
