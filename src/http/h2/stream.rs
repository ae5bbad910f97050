//! HTTP/2 stream management
//!
//! This module implements stream management as defined in RFC 7540 Section 5.1.
//!
//! A stream tracks its two directions separately: `local` (what we send)
//! and `remote` (what the peer sends). The RFC's composite states are
//! derived from the pair. Halves only move forward, idle to open to
//! closed; asking for any other transition is a local fault.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::Window;
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID};
use crate::http::Headers;
use std::collections::HashMap;
use tracing::debug;

/// Stream ID type
pub type StreamId = u32;

/// State of one direction of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    Idle,
    Open,
    Closed,
}

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Reserved (local): PUSH_PROMISE sent
    ReservedLocal,
    /// Reserved (remote): PUSH_PROMISE received
    ReservedRemote,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Derive the composite state from the two halves
    pub fn from_halves(local: HalfState, remote: HalfState) -> Self {
        use HalfState::*;
        match (local, remote) {
            (Idle, Idle) => StreamState::Idle,
            (Open, Idle) => StreamState::ReservedLocal,
            (Idle, Open) => StreamState::ReservedRemote,
            (Open, Open) => StreamState::Open,
            (Closed, Open) => StreamState::HalfClosedLocal,
            (Open, Closed) => StreamState::HalfClosedRemote,
            (Closed, _) | (_, Closed) => StreamState::Closed,
        }
    }

    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedRemote | StreamState::ReservedLocal
        )
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Which kind of message a header block must describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn mandatory(&self) -> &'static [&'static str] {
        match self {
            MessageKind::Request => &[":method", ":scheme", ":path"],
            MessageKind::Response => &[":status"],
        }
    }

    fn allowed(&self) -> &'static [&'static str] {
        match self {
            MessageKind::Request => &[":method", ":scheme", ":path", ":authority"],
            MessageKind::Response => &[":status"],
        }
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct Stream {
    /// Stream ID
    id: StreamId,
    local: HalfState,
    remote: HalfState,
    /// Received headers, in arrival order
    headers: Headers,
    /// Header blocks received so far (a second one is a trailer)
    header_blocks: usize,
    /// A regular header has been seen in the current message
    regular_seen: bool,
    /// First malformation found while decoding, reported after the block
    malformed: Option<String>,
    /// Accumulated body data
    body: Vec<u8>,
    /// Outbound flow control
    send_window: Window,
}

impl Stream {
    /// Create an idle stream
    pub fn new(id: StreamId, initial_window_size: u32) -> Self {
        Stream {
            id,
            local: HalfState::Idle,
            remote: HalfState::Idle,
            headers: Headers::new(),
            header_blocks: 0,
            regular_seen: false,
            malformed: None,
            body: Vec::new(),
            send_window: Window::new(id, initial_window_size),
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        StreamState::from_halves(self.local, self.remote)
    }

    pub fn local(&self) -> HalfState {
        self.local
    }

    pub fn remote(&self) -> HalfState {
        self.remote
    }

    pub fn is_open_local(&self) -> bool {
        self.local == HalfState::Open
    }

    pub fn is_open_remote(&self) -> bool {
        self.remote == HalfState::Open
    }

    /// Open both halves, or the remaining half of a reserved stream
    pub fn open(&mut self) -> Result<()> {
        if self.local != HalfState::Idle && self.remote != HalfState::Idle {
            return Err(self.fault("open"));
        }
        if self.local == HalfState::Idle {
            self.local = HalfState::Open;
        }
        if self.remote == HalfState::Idle {
            self.remote = HalfState::Open;
        }
        Ok(())
    }

    /// Reserve for a push we promise (PUSH_PROMISE sent)
    pub fn reserve_local(&mut self) -> Result<()> {
        if self.state() != StreamState::Idle {
            return Err(self.fault("reserve_local"));
        }
        self.local = HalfState::Open;
        Ok(())
    }

    /// Reserve for a push the peer promises (PUSH_PROMISE received)
    pub fn reserve_remote(&mut self) -> Result<()> {
        if self.state() != StreamState::Idle {
            return Err(self.fault("reserve_remote"));
        }
        self.remote = HalfState::Open;
        Ok(())
    }

    /// We have sent END_STREAM
    pub fn close_local(&mut self) -> Result<()> {
        if self.local != HalfState::Open {
            return Err(self.fault("close_local"));
        }
        self.local = HalfState::Closed;
        Ok(())
    }

    /// The peer has sent END_STREAM
    pub fn close_remote(&mut self) -> Result<()> {
        if self.remote != HalfState::Open {
            return Err(self.fault("close_remote"));
        }
        self.remote = HalfState::Closed;
        Ok(())
    }

    /// Close both halves (RST_STREAM sent or received)
    pub fn reset(&mut self) {
        self.local = HalfState::Closed;
        self.remote = HalfState::Closed;
        self.body.clear();
    }

    fn fault(&self, transition: &str) -> Error {
        Error::Internal(format!(
            "stream {}: {} not allowed in state {:?}",
            self.id,
            transition,
            self.state()
        ))
    }

    /// Check that the peer may send DATA on this stream
    pub fn check_receive_data(&self) -> Result<()> {
        match self.state() {
            StreamState::Open | StreamState::HalfClosedLocal => Ok(()),
            StreamState::HalfClosedRemote | StreamState::Closed => Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("DATA on (half-)closed stream {}", self.id),
            )),
            state => Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("DATA on stream {} in state {:?}", self.id, state),
            )),
        }
    }

    /// Outbound window
    pub fn send_window(&self) -> &Window {
        &self.send_window
    }

    /// Mutable outbound window
    pub fn send_window_mut(&mut self) -> &mut Window {
        &mut self.send_window
    }

    /// Start a new header block; returns true if it is a trailer block
    pub fn begin_header_block(&mut self) -> bool {
        self.header_blocks += 1;
        self.header_blocks > 1
    }

    /// True once the first header block has been received
    pub fn has_headers(&self) -> bool {
        self.header_blocks > 0
    }

    /// Record one decoded header.
    ///
    /// Malformations are remembered rather than returned so that the
    /// rest of the block is still decoded and HPACK state stays in sync.
    pub fn add_header(&mut self, name: String, value: String) {
        if self.malformed.is_none() {
            self.malformed = self.check_header(&name, &value);
        }
        if !name.starts_with(':') {
            self.regular_seen = true;
        }
        self.headers.insert(name, value);
    }

    fn check_header(&self, name: &str, value: &str) -> Option<String> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Some(format!("uppercase header name {:?}", name));
        }
        if name.starts_with(':') {
            if self.header_blocks > 1 {
                return Some(format!("pseudo-header {} in trailers", name));
            }
            if self.regular_seen {
                return Some(format!("pseudo-header {} after regular header", name));
            }
            if self.headers.contains(name) {
                return Some(format!("duplicate pseudo-header {}", name));
            }
            return None;
        }
        match name {
            "connection" => Some("connection-specific header field".to_string()),
            "te" if !value.is_empty() && value != "trailers" => {
                Some(format!("te header with value {:?}", value))
            }
            _ => None,
        }
    }

    /// Validate the first header block once it is fully decoded
    pub fn validate_headers(&mut self, kind: MessageKind) -> Result<()> {
        if let Some(reason) = self.malformed.take() {
            return Err(self.malformed_error(reason));
        }
        if self.header_blocks > 1 {
            return Ok(());
        }
        for (name, _) in self.headers.iter() {
            if name.starts_with(':') && !kind.allowed().contains(&name) {
                return Err(self.malformed_error(format!("unexpected pseudo-header {}", name)));
            }
        }
        for name in kind.mandatory() {
            if !self.headers.contains(name) {
                return Err(self.malformed_error(format!("missing pseudo-header {}", name)));
            }
        }
        Ok(())
    }

    /// Validate content-length against the received body
    pub fn validate_content_length(&self) -> Result<()> {
        let Some(declared) = self.headers.get("content-length") else {
            return Ok(());
        };
        match declared.trim().parse::<usize>() {
            Ok(n) if n == self.body.len() => Ok(()),
            _ => Err(self.malformed_error(format!(
                "content-length {:?} does not match body of {} bytes",
                declared,
                self.body.len()
            ))),
        }
    }

    fn malformed_error(&self, reason: String) -> Error {
        Error::stream(self.id, ErrorCode::ProtocolError, format!("malformed message: {}", reason))
    }

    /// Received headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get accumulated body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Append body bytes
    pub fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Take the completed message out of the stream
    pub fn take_message(&mut self) -> (Headers, Vec<u8>) {
        (std::mem::take(&mut self.headers), std::mem::take(&mut self.body))
    }
}

/// Where an id stands relative to the streams we know about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Present in the stream map
    Active,
    /// Used earlier and since removed
    Closed,
    /// Never used
    Idle,
}

/// Stream manager
///
/// Manages all streams for a connection. Fully closed streams are removed
/// from the map; ids are kept in order, so an absent id at or below the
/// highest one used for its parity is known to be closed.
#[derive(Debug)]
pub struct StreamManager {
    /// Live streams
    streams: HashMap<StreamId, Stream>,
    is_client: bool,
    /// Next stream ID we initiate (client: odd, server: even)
    next_local_id: StreamId,
    /// Highest stream ID the peer initiated
    last_remote_id: StreamId,
    /// Peer's SETTINGS_MAX_CONCURRENT_STREAMS
    max_concurrent_streams: Option<u32>,
    /// Peer's SETTINGS_INITIAL_WINDOW_SIZE
    initial_window_size: u32,
}

impl StreamManager {
    /// Create a new stream manager
    ///
    /// # Arguments
    /// * `is_client` - True if this is a client (odd stream IDs), false for server (even)
    /// * `initial_window_size` - Send window for new streams
    pub fn new(is_client: bool, initial_window_size: u32) -> Self {
        StreamManager {
            streams: HashMap::new(),
            is_client,
            next_local_id: if is_client { 1 } else { 2 },
            last_remote_id: 0,
            max_concurrent_streams: None,
            initial_window_size,
        }
    }

    /// Set maximum concurrent streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Get maximum concurrent streams
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE to every stream
    pub fn set_initial_window_size(&mut self, size: u32) -> Result<()> {
        let delta = size as i64 - self.initial_window_size as i64;
        self.initial_window_size = size;
        for stream in self.streams.values_mut() {
            stream.send_window_mut().adjust(delta)?;
        }
        Ok(())
    }

    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    /// True if `id` has the parity of streams we initiate
    pub fn is_local_id(&self, id: StreamId) -> bool {
        (id % 2 == 1) == self.is_client
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_local_id
    }

    /// Highest peer-initiated stream ID seen
    pub fn last_remote_id(&self) -> StreamId {
        self.last_remote_id
    }

    fn allocate(&mut self) -> Result<StreamId> {
        if let Some(max) = self.max_concurrent_streams {
            let active = self
                .streams
                .values()
                .filter(|s| self.is_local_id(s.id()) && !s.state().is_closed())
                .count();
            if active >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }
        let stream_id = self.next_local_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::Internal("stream identifiers exhausted".into()));
        }
        self.next_local_id += 2;
        self.streams
            .insert(stream_id, Stream::new(stream_id, self.initial_window_size));
        Ok(stream_id)
    }

    /// Start a stream we initiate, with both halves open
    pub fn open_local(&mut self) -> Result<StreamId> {
        let stream_id = self.allocate()?;
        self.get_mut(stream_id)
            .ok_or_else(|| Error::Internal(format!("stream {} vanished", stream_id)))?
            .open()?;
        debug!(stream_id, "opened local stream");
        Ok(stream_id)
    }

    /// Reserve a stream for a server push
    pub fn reserve_local(&mut self) -> Result<StreamId> {
        let stream_id = self.allocate()?;
        self.get_mut(stream_id)
            .ok_or_else(|| Error::Internal(format!("stream {} vanished", stream_id)))?
            .reserve_local()?;
        debug!(stream_id, "reserved local stream");
        Ok(stream_id)
    }

    /// Register a stream the peer is opening with HEADERS.
    ///
    /// Stream 0, the wrong parity, and ids not above the previous peer
    /// stream are connection PROTOCOL_ERRORs.
    pub fn accept_remote(&mut self, stream_id: StreamId) -> Result<&mut Stream> {
        if stream_id == 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "HEADERS must be sent on stream >0",
            ));
        }
        if self.is_local_id(stream_id) {
            let who = if self.is_client { "server" } else { "client" };
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("stream {} has the wrong parity for the {}", stream_id, who),
            ));
        }
        if stream_id <= self.last_remote_id {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!(
                    "new stream id {} not greater than previous stream id {}",
                    stream_id, self.last_remote_id
                ),
            ));
        }
        self.last_remote_id = stream_id;
        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| Stream::new(stream_id, self.initial_window_size)))
    }

    /// Classify a stream id
    pub fn lookup(&self, stream_id: StreamId) -> Lookup {
        if self.streams.contains_key(&stream_id) {
            return Lookup::Active;
        }
        let used = if self.is_local_id(stream_id) {
            stream_id < self.next_local_id
        } else {
            stream_id <= self.last_remote_id
        };
        if used {
            Lookup::Closed
        } else {
            Lookup::Idle
        }
    }

    /// Get a stream by ID
    pub fn get(&self, stream_id: StreamId) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream if both halves are closed
    pub fn remove_if_closed(&mut self, stream_id: StreamId) -> bool {
        if self.streams.get(&stream_id).is_some_and(|s| s.state().is_closed()) {
            self.streams.remove(&stream_id);
            return true;
        }
        false
    }

    /// Get number of streams not yet closed
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Get all stream IDs
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new(true, DEFAULT_INITIAL_WINDOW_SIZE)
    }
}
