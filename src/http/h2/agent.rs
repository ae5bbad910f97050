//! Connection agent
//!
//! An [`Agent`] drives one HTTP/2 connection in either role. A reader
//! thread feeds received bytes to [`Agent::receive`]; frames are decoded,
//! reassembled and dispatched under the connection lock, which is also
//! the write lock, so frame bytes from different callers never interleave.
//! Completed messages are handed to the registered handlers only after
//! the lock is released, which lets a handler respond on the same
//! connection.
//!
//! Connection errors end in GOAWAY and closing the transport. Stream
//! errors end in RST_STREAM and the rest of the connection carries on.
//! Anything else (a broken transport, a missing handler, a state machine
//! fault) is returned to the caller after the transport is closed.

use super::codec::{FrameDeserializer, FrameSerializer};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{credit, Window, WindowQueue};
use super::frames::{
    DataFrame, DroppedFrame, Frame, FrameFlags, FrameType, GoawayFrame, HeadersFrame, PingFrame,
    PriorityFrame, PushPromiseFrame, RstStreamFrame, WindowUpdateFrame,
};
use super::headers_hook::HeadersHook;
use super::hpack::{Decoder, Encoder, HPack, IndexPolicy};
use super::priority::PriorityTree;
use super::settings::Settings;
use super::stream::{Lookup, MessageKind, Stream, StreamId, StreamManager};
use super::{
    CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE, LOCAL_INITIAL_WINDOW_SIZE,
};
use crate::http::{Message, PeerDescriptor, Request, Response, Transport};
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Size of the reader's receive buffer
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Which end of the connection this agent is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(self) -> bool {
        self == Role::Client
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Payload compression used for GZIPPED_DATA frames.
///
/// No codec ships with the crate; without one the agent neither
/// advertises nor sends compressed frames.
pub trait PayloadCodec: Send + Sync + fmt::Debug {
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>>;
    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>>;
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// HEADER_TABLE_SIZE advertised for our decoder
    pub header_table_size: u32,
    /// INITIAL_WINDOW_SIZE advertised for peer-sent DATA
    pub initial_window_size: u32,
    /// Largest frame we accept
    pub max_frame_size: u32,
    /// MAX_CONCURRENT_STREAMS advertised, and enforced on the peer
    pub max_concurrent_streams: Option<u32>,
    /// HPACK indexing policy for outbound headers
    pub index_policy: IndexPolicy,
    /// Codec for GZIPPED_DATA frames
    pub codec: Option<Arc<dyn PayloadCodec>>,
    /// Advertise ACCEPT_GZIPPED_DATA (needs a codec)
    pub accept_gzip: bool,
    /// Send GZIPPED_DATA once the peer accepts it
    pub send_gzip: bool,
    /// Pad every outbound message, not just those asking for it
    pub pad: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            initial_window_size: LOCAL_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
            index_policy: IndexPolicy::default(),
            codec: None,
            accept_gzip: true,
            send_gzip: true,
            pad: false,
        }
    }
}

impl AgentConfig {
    /// The SETTINGS frame sent when the connection starts
    pub fn local_settings(&self, role: Role) -> Settings {
        let mut settings = Settings::new();
        if self.header_table_size != DEFAULT_HEADER_TABLE_SIZE {
            settings.header_table_size = Some(self.header_table_size);
        }
        if role.is_client() {
            settings.enable_push = Some(false);
        }
        settings.max_concurrent_streams = self.max_concurrent_streams;
        settings.initial_window_size = Some(self.initial_window_size);
        settings.max_frame_size = Some(self.max_frame_size);
        if self.codec.is_some() && self.accept_gzip {
            settings.accept_gzipped_data = Some(true);
        }
        settings
    }

    /// Check that the advertised values are legal
    pub fn validate(&self) -> Result<()> {
        self.local_settings(Role::Server).validate()
    }
}

pub type RequestHandler = Box<dyn FnMut(StreamId, Request) + Send>;
pub type ResponseHandler = Box<dyn FnMut(StreamId, Response) + Send>;
pub type CancelHandler = Box<dyn FnMut(StreamId, u32) + Send>;

#[derive(Default)]
struct Handlers {
    request: Option<RequestHandler>,
    response: Option<ResponseHandler>,
    cancel: Option<CancelHandler>,
}

/// Work for the handlers, collected under the connection lock
enum Event {
    Request(StreamId, Request),
    Response(StreamId, Response),
    Cancel(StreamId, u32),
}

#[derive(Debug, Default)]
struct GzipState {
    /// Local wish to send compressed frames
    send: bool,
    /// Peer advertised ACCEPT_GZIPPED_DATA=1
    peer_accepts: bool,
    /// We currently advertise acceptance
    recv: bool,
    /// A bad payload was received; never accept again
    veto: bool,
}

/// HTTP/2 connection agent
pub struct Agent {
    role: Role,
    conn: Mutex<Connection>,
    /// Signalled once the initial SETTINGS is out (or the connection died)
    ready: Condvar,
    handlers: Mutex<Handlers>,
}

impl Agent {
    /// Create an agent; nothing is sent until [`Agent::start`] or [`Agent::run`]
    pub fn new(role: Role, config: AgentConfig) -> Self {
        Agent {
            role,
            conn: Mutex::new(Connection::new(role, config)),
            ready: Condvar::new(),
            handlers: Mutex::new(Handlers::default()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Register the handler for complete inbound requests (server role)
    pub fn on_request<F>(&self, handler: F)
    where
        F: FnMut(StreamId, Request) + Send + 'static,
    {
        self.handlers().request = Some(Box::new(handler));
    }

    /// Register the handler for complete inbound responses (client role)
    pub fn on_response<F>(&self, handler: F)
    where
        F: FnMut(StreamId, Response) + Send + 'static,
    {
        self.handlers().response = Some(Box::new(handler));
    }

    /// Register the handler for streams reset by the peer; it receives
    /// the raw error code
    pub fn on_cancel<F>(&self, handler: F)
    where
        F: FnMut(StreamId, u32) + Send + 'static,
    {
        self.handlers().cancel = Some(Box::new(handler));
    }

    /// Run the connection on `transport` until it closes.
    ///
    /// Sends the preface (client) and initial SETTINGS, then reads and
    /// dispatches until EOF, an I/O error or a fatal fault.
    pub fn run(&self, transport: Box<dyn Transport>) -> Result<()> {
        let peer = transport.peer();
        let result = transport
            .try_clone()
            .map_err(Error::from)
            .and_then(|writer| self.start(writer))
            .and_then(|()| self.read_loop(transport));
        if let Err(e) = &result {
            error!(peer = %peer, error = %e, "connection terminated");
        }
        self.close();
        result
    }

    /// Attach the write half and send the connection preamble.
    ///
    /// Callers blocked waiting for the first SETTINGS are released.
    pub fn start(&self, writer: Box<dyn Transport>) -> Result<()> {
        let result = self.lock()?.start(writer);
        self.ready.notify_all();
        result
    }

    fn read_loop(&self, mut transport: Box<dyn Transport>) -> Result<()> {
        let peer = transport.peer();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        while !self.is_closed() {
            let n = match transport.read(&mut buf) {
                Ok(0) => {
                    info!(peer = %peer, "peer closed the connection");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.is_closed() {
                        debug!(peer = %peer, error = %e, "read ended after close");
                        return Ok(());
                    }
                    warn!(peer = %peer, error = %e, "read failed");
                    return Err(e.into());
                }
            };
            self.receive(&buf[..n])?;
        }
        Ok(())
    }

    /// Process received bytes.
    ///
    /// Protocol errors are answered on the wire and do not show up here;
    /// an `Err` means the connection has been closed on a local fault.
    pub fn receive(&self, bytes: &[u8]) -> Result<()> {
        let events = {
            let mut conn = self.lock()?;
            match conn.receive(bytes) {
                Ok(events) => events,
                Err(e) => {
                    conn.close_transport();
                    return Err(e);
                }
            }
        };
        let result = self.dispatch(events);
        if result.is_err() {
            self.close();
        }
        result
    }

    fn dispatch(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut handlers = self.handlers();
        for event in events {
            match event {
                Event::Request(stream_id, request) => {
                    let handler = handlers
                        .request
                        .as_mut()
                        .ok_or_else(|| Error::Internal("no request handler registered".into()))?;
                    guarded(stream_id, "request", || handler(stream_id, request));
                }
                Event::Response(stream_id, response) => {
                    let handler = handlers
                        .response
                        .as_mut()
                        .ok_or_else(|| Error::Internal("no response handler registered".into()))?;
                    guarded(stream_id, "response", || handler(stream_id, response));
                }
                Event::Cancel(stream_id, code) => match handlers.cancel.as_mut() {
                    Some(handler) => guarded(stream_id, "cancel", || handler(stream_id, code)),
                    None => debug!(stream_id, code, "no cancel handler registered"),
                },
            }
        }
        Ok(())
    }

    /// Send a message on an existing stream and close our half of it
    pub fn deliver(&self, stream_id: StreamId, message: &dyn Message) -> Result<()> {
        let mut conn = self.lock_ready()?;
        let result = conn.deliver(stream_id, message);
        conn.after_send(&result);
        result
    }

    /// Open a new stream and send a request on it (client role)
    pub fn request(&self, request: &Request) -> Result<StreamId> {
        self.require(Role::Client, "request")?;
        let mut conn = self.lock_ready()?;
        conn.check_open()?;
        if conn.goaway.is_some() {
            return Err(Error::ShutDown);
        }
        let stream_id = conn.streams.open_local()?;
        let result = conn.deliver(stream_id, request);
        conn.after_send(&result);
        result.map(|()| stream_id)
    }

    /// Send the response for a request stream (server role)
    pub fn respond(&self, stream_id: StreamId, response: &Response) -> Result<()> {
        self.require(Role::Server, "respond")?;
        self.deliver(stream_id, response)
    }

    /// Promise `request` on `parent` and deliver `response` on the new
    /// stream (server role). Returns the promised stream id.
    pub fn push(&self, parent: StreamId, request: &Request, response: &Response) -> Result<StreamId> {
        self.require(Role::Server, "push")?;
        let mut conn = self.lock_ready()?;
        conn.check_open()?;
        if !conn.push_to_peer {
            return Err(Error::Internal("peer has disabled server push".into()));
        }
        let result = conn
            .promise(parent, request)
            .and_then(|promised| conn.deliver(promised, response).map(|()| promised));
        conn.after_send(&result);
        result
    }

    /// Send a PING. The payload is zero-padded or truncated to 8 bytes;
    /// without one the current time is used.
    pub fn ping(&self, payload: Option<&[u8]>) -> Result<()> {
        let data = match payload {
            Some(bytes) => {
                let mut data = [0u8; 8];
                let n = bytes.len().min(8);
                data[..n].copy_from_slice(&bytes[..n]);
                data
            }
            None => clock_payload(),
        };
        let mut conn = self.lock_ready()?;
        conn.check_open()?;
        conn.pings.push((data, Instant::now()));
        conn.send_frame(PingFrame::new(data).to_frame())
    }

    /// Send GOAWAY(NO_ERROR) and close the transport. Idempotent.
    pub fn shut_down(&self) -> Result<()> {
        {
            let mut conn = self.lock()?;
            if !conn.shutting_down {
                info!(peer = %conn.peer, last_stream_id = conn.last_stream, "shutting down");
                conn.die(ErrorCode::NoError, "");
            }
        }
        self.ready.notify_all();
        Ok(())
    }

    /// Advertise acceptance of GZIPPED_DATA again. Ignored after a veto.
    pub fn accept_gzip(&self) -> Result<()> {
        self.lock_ready()?.set_accept_gzip(true)
    }

    /// Withdraw acceptance of GZIPPED_DATA
    pub fn no_accept_gzip(&self) -> Result<()> {
        self.lock_ready()?.set_accept_gzip(false)
    }

    /// Send compressed bodies when the peer accepts them
    pub fn send_gzip(&self) -> Result<()> {
        self.lock()?.gzip.send = true;
        Ok(())
    }

    /// Stop sending compressed bodies
    pub fn no_send_gzip(&self) -> Result<()> {
        self.lock()?.gzip.send = false;
        Ok(())
    }

    /// True once GZIPPED_DATA would be used for the next body
    pub fn sends_gzip(&self) -> bool {
        self.lock().map(|c| c.sends_gzip()).unwrap_or(false)
    }

    /// True while we accept GZIPPED_DATA
    pub fn accepts_gzip(&self) -> bool {
        self.lock().map(|c| c.accepts_gzip()).unwrap_or(false)
    }

    /// True once the agent refuses new work
    pub fn is_shut_down(&self) -> bool {
        self.lock().map(|c| c.shutting_down).unwrap_or(true)
    }

    /// True once the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().map(|c| c.closed).unwrap_or(true)
    }

    /// True once the peer has sent GOAWAY
    pub fn peer_went_away(&self) -> bool {
        self.lock().map(|c| c.goaway.is_some()).unwrap_or(true)
    }

    /// Highest peer-initiated stream handed to the application
    pub fn last_stream(&self) -> StreamId {
        self.lock().map(|c| c.last_stream).unwrap_or(0)
    }

    /// Streams not yet fully closed
    pub fn active_streams(&self) -> usize {
        self.lock().map(|c| c.streams.active_stream_count()).unwrap_or(0)
    }

    /// Whether the peer allows server push
    pub fn push_enabled(&self) -> bool {
        self.lock().map(|c| c.push_to_peer).unwrap_or(false)
    }

    /// Parent and weight of a stream in the priority tree
    pub fn priority_of(&self, stream_id: StreamId) -> Option<(StreamId, u16)> {
        let conn = self.lock().ok()?;
        Some((conn.priority.parent(stream_id)?, conn.priority.weight(stream_id)?))
    }

    fn close(&self) {
        if let Ok(mut conn) = self.lock() {
            conn.close_transport();
        }
        self.ready.notify_all();
    }

    fn require(&self, role: Role, operation: &str) -> Result<()> {
        if self.role != role {
            return Err(Error::Internal(format!("{} is only available to a {}", operation, role)));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("connection lock poisoned".into()))
    }

    /// Lock once the initial SETTINGS has been sent
    fn lock_ready(&self) -> Result<MutexGuard<'_, Connection>> {
        let conn = self.lock()?;
        self.ready
            .wait_while(conn, |c| !c.settings_sent && !c.closed)
            .map_err(|_| Error::Internal("connection lock poisoned".into()))
    }

    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn guarded(stream_id: StreamId, kind: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(stream_id, handler = kind, "handler panicked");
    }
}

fn clock_payload() -> [u8; 8] {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&(now.as_secs() as u32).to_be_bytes());
    data[4..].copy_from_slice(&now.subsec_micros().to_be_bytes());
    data
}

fn missing(stream_id: StreamId) -> Error {
    Error::Internal(format!("stream {} is not in the stream map", stream_id))
}

/// Split into chunks of at most `size` bytes; an empty input gives one
/// empty chunk
fn split(bytes: &Bytes, size: usize) -> Vec<Bytes> {
    if bytes.is_empty() {
        return vec![Bytes::new()];
    }
    (0..bytes.len())
        .step_by(size.max(1))
        .map(|start| bytes.slice(start..(start + size).min(bytes.len())))
        .collect()
}

/// Padding that brings a frame payload to a multiple of 256 bytes
/// without exceeding `max_frame_size`
fn padding_for(len: usize, max_frame_size: usize) -> Option<u8> {
    let mut pad = 255 - (len % 256) as i64;
    if (len as i64) + 1 + pad > max_frame_size as i64 {
        pad = max_frame_size as i64 - len as i64 - 1;
    }
    u8::try_from(pad).ok()
}

/// Compress `body` into chunks whose compressed size fits `budget`,
/// taking the largest prefix that fits each time. `None` if even a
/// single byte does not fit.
fn compress_chunks(codec: &dyn PayloadCodec, body: &[u8], budget: usize) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut chunks = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let Some((taken, compressed)) = largest_fitting(codec, rest, budget)? else {
            return Ok(None);
        };
        chunks.push(compressed);
        rest = &rest[taken..];
    }
    Ok(Some(chunks))
}

fn largest_fitting(codec: &dyn PayloadCodec, input: &[u8], budget: usize) -> io::Result<Option<(usize, Vec<u8>)>> {
    let whole = codec.compress(input)?;
    if whole.len() <= budget {
        return Ok(Some((input.len(), whole)));
    }
    let (mut low, mut high) = (1, input.len() - 1);
    let mut best = None;
    while low <= high {
        let mid = low + (high - low) / 2;
        let compressed = codec.compress(&input[..mid])?;
        if compressed.len() <= budget {
            best = Some((mid, compressed));
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }
    Ok(best)
}

/// Connection state; the mutex around it is the write lock
struct Connection {
    role: Role,
    config: AgentConfig,
    writer: Option<Box<dyn Transport>>,
    peer: PeerDescriptor,
    serializer: FrameSerializer,
    deserializer: FrameDeserializer,
    hook: HeadersHook,
    hpack: HPack,
    streams: StreamManager,
    priority: PriorityTree,
    /// Connection-level send window
    window: Window,
    queue: WindowQueue,
    peer_max_frame_size: usize,
    push_to_peer: bool,
    pings: Vec<([u8; 8], Instant)>,
    /// Server side: preface bytes received so far
    preface: Option<Vec<u8>>,
    settings_sent: bool,
    awaiting_settings: bool,
    /// Last stream id from the peer's GOAWAY
    goaway: Option<StreamId>,
    shutting_down: bool,
    closed: bool,
    last_stream: StreamId,
    gzip: GzipState,
    dropped_sent: HashSet<u8>,
    dropped_by_peer: HashSet<u8>,
}

impl Connection {
    fn new(role: Role, config: AgentConfig) -> Self {
        let mut decoder = Decoder::new(DEFAULT_HEADER_TABLE_SIZE as usize);
        // until our SETTINGS is acknowledged the peer may use either size
        decoder.set_max_allowed((config.header_table_size.max(DEFAULT_HEADER_TABLE_SIZE)) as usize);
        let hpack = HPack {
            encoder: Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize).with_policy(config.index_policy),
            decoder,
        };
        let gzip = GzipState {
            send: config.send_gzip,
            peer_accepts: false,
            recv: config.codec.is_some() && config.accept_gzip,
            veto: false,
        };
        Connection {
            role,
            writer: None,
            peer: PeerDescriptor::new("<unattached>"),
            serializer: FrameSerializer::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE as usize),
            deserializer: FrameDeserializer::with_max_frame_size(config.max_frame_size as usize),
            hook: HeadersHook::new(),
            hpack,
            streams: StreamManager::new(role.is_client(), DEFAULT_INITIAL_WINDOW_SIZE),
            priority: PriorityTree::new(),
            window: Window::connection(),
            queue: WindowQueue::new(),
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            push_to_peer: !role.is_client(),
            pings: Vec::new(),
            preface: if role.is_client() { None } else { Some(Vec::new()) },
            settings_sent: false,
            awaiting_settings: true,
            goaway: None,
            shutting_down: false,
            closed: false,
            last_stream: 0,
            gzip,
            dropped_sent: HashSet::new(),
            dropped_by_peer: HashSet::new(),
            config,
        }
    }

    fn start(&mut self, writer: Box<dyn Transport>) -> Result<()> {
        if self.writer.is_some() {
            return Err(Error::Internal("connection already started".into()));
        }
        self.peer = writer.peer();
        if self.closed {
            debug!(peer = %self.peer, "shut down before the transport was attached");
            let mut writer = writer;
            if let Err(e) = writer.shutdown() {
                debug!(peer = %self.peer, error = %e, "transport shutdown failed");
            }
            return Ok(());
        }
        self.writer = Some(writer);
        let result = self.send_preamble();
        if result.is_err() {
            self.close_transport();
        }
        result
    }

    fn send_preamble(&mut self) -> Result<()> {
        if self.role.is_client() {
            self.write_raw(CONNECTION_PREFACE)?;
        }
        let settings = self.config.local_settings(self.role);
        debug!(peer = %self.peer, role = %self.role, settings = ?settings, "sending initial SETTINGS");
        self.write_frame(&settings.to_frame())?;
        self.settings_sent = true;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.shutting_down {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    /// Common tail of the send operations: a dead transport closes the
    /// connection, and a drained connection shuts down
    fn after_send<T>(&mut self, result: &Result<T>) {
        if let Err(Error::Io(e)) = result {
            warn!(peer = %self.peer, error = %e, "write failed");
            self.close_transport();
        }
        self.finish_drain();
    }

    // ---- output ----

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Internal("connection has no transport".into()))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            trace!(frame = %frame, "not sending on closed connection");
            return Ok(());
        }
        let bytes = self.serializer.encode(frame)?;
        trace!(peer = %self.peer, frame = %frame, "sending frame");
        self.write_raw(&bytes)
    }

    /// Send a frame, or queue it behind flow control.
    ///
    /// Only DATA-class frames use window credit, but every stream-level
    /// DATA, HEADERS or CONTINUATION frame waits behind frames already
    /// queued for its stream.
    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let ordered = matches!(
            frame.frame_type(),
            Some(FrameType::Data | FrameType::Headers | FrameType::Continuation | FrameType::GzippedData)
        );
        if !ordered || frame.stream_id == 0 {
            return self.write_frame(&frame);
        }
        if self.queue.is_blocked(frame.stream_id) {
            self.queue.push(frame);
            return self.release_queue();
        }
        let needed = credit(&frame);
        if needed > 0 {
            let stream = self
                .streams
                .get_mut(frame.stream_id)
                .ok_or_else(|| missing(frame.stream_id))?;
            if !(self.window.can_send(needed) && stream.send_window().can_send(needed)) {
                // whatever credit is left goes out now, the rest waits
                self.queue.push(frame);
                return self.release_queue();
            }
            stream.send_window_mut().consume(needed);
            self.window.consume(needed);
        }
        self.write_frame(&frame)
    }

    fn release_queue(&mut self) -> Result<()> {
        let frames = self.queue.release(&mut self.window, &mut self.streams);
        let mut touched = Vec::new();
        for frame in frames {
            if touched.last() != Some(&frame.stream_id) {
                touched.push(frame.stream_id);
            }
            self.write_frame(&frame)?;
        }
        for stream_id in touched {
            self.cleanup(stream_id);
        }
        Ok(())
    }

    /// Forget a stream once both halves are closed and nothing is queued
    fn cleanup(&mut self, stream_id: StreamId) {
        if !self.queue.is_blocked(stream_id) && self.streams.remove_if_closed(stream_id) {
            trace!(stream_id, "stream closed");
        }
    }

    fn reset_stream(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset();
        }
        let dropped = self.queue.discard(stream_id);
        if dropped > 0 {
            debug!(stream_id, dropped, "discarded queued frames");
        }
        self.streams.remove_if_closed(stream_id);
    }

    /// Send GOAWAY if we may still send, then close
    fn die(&mut self, code: ErrorCode, reason: &str) {
        if self.closed {
            return;
        }
        self.shutting_down = true;
        if self.settings_sent {
            let goaway = GoawayFrame::new(self.last_stream, code, Bytes::copy_from_slice(reason.as_bytes()));
            if let Err(e) = self.write_frame(&goaway.to_frame()) {
                debug!(peer = %self.peer, error = %e, "could not send GOAWAY");
            }
        }
        self.close_transport();
    }

    fn close_transport(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutting_down = true;
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.shutdown() {
                debug!(peer = %self.peer, error = %e, "transport shutdown failed");
            }
        }
        info!(peer = %self.peer, "connection closed");
    }

    /// After the peer's GOAWAY, shut down once the last stream is done
    fn finish_drain(&mut self) {
        if self.goaway.is_some()
            && !self.closed
            && self.streams.active_stream_count() == 0
            && self.queue.is_empty()
        {
            info!(peer = %self.peer, "peer went away and no streams remain");
            self.die(ErrorCode::NoError, "");
        }
    }

    fn deliver(&mut self, stream_id: StreamId, message: &dyn Message) -> Result<()> {
        self.check_open()?;
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| Error::Internal(format!("stream {} does not exist", stream_id)))?;
        if !stream.is_open_local() {
            return Err(Error::Internal(format!(
                "stream {} is not open for sending ({:?})",
                stream_id,
                stream.state()
            )));
        }

        let budget = self.send_budget(stream_id);
        let pad = message.pad() || self.config.pad;
        let body = message.body();
        let block = Bytes::from(self.hpack.encode(message.header_list()));
        debug!(stream_id, header_block = block.len(), body = body.len(), "delivering message");

        let header_budget = budget.unwrap_or(self.peer_max_frame_size);
        for frame in self.header_frames(stream_id, &block, body.is_empty(), header_budget, pad) {
            self.send_frame(frame)?;
        }
        if !body.is_empty() {
            for frame in self.data_frames(stream_id, body, budget, pad) {
                self.send_frame(frame)?;
            }
        }

        self.streams
            .get_mut(stream_id)
            .ok_or_else(|| missing(stream_id))?
            .close_local()?;
        self.cleanup(stream_id);
        Ok(())
    }

    /// Largest chunk the windows allow right now: the smallest of the
    /// peer's frame size, the connection window and the stream window.
    /// `None` once either window is exhausted.
    fn send_budget(&self, stream_id: StreamId) -> Option<usize> {
        let stream_window = self
            .streams
            .get(stream_id)
            .map_or(0, |s| s.send_window().size());
        let budget = (self.peer_max_frame_size as i64)
            .min(stream_window)
            .min(self.window.size());
        usize::try_from(budget).ok().filter(|&b| b > 0)
    }

    fn header_frames(&self, stream_id: StreamId, block: &Bytes, end_stream: bool, budget: usize, pad: bool) -> Vec<Frame> {
        let chunks = split(block, budget);
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let end_headers = i == last;
                if i == 0 {
                    let mut headers = HeadersFrame::new(stream_id, chunk, end_stream, end_headers);
                    if pad && end_headers {
                        if let Some(padding) = padding_for(headers.header_block.len(), self.peer_max_frame_size) {
                            headers = headers.with_padding(padding);
                        }
                    }
                    headers.to_frame()
                } else {
                    let mut flags = FrameFlags::empty();
                    if end_headers {
                        flags.set(FrameFlags::END_HEADERS);
                    }
                    Frame::new(FrameType::Continuation, flags, stream_id, chunk)
                }
            })
            .collect()
    }

    fn data_frames(&self, stream_id: StreamId, body: &[u8], budget: Option<usize>, pad: bool) -> Vec<Frame> {
        if let Some(limit) = budget {
            if let Some(chunks) = self.compressed_chunks(stream_id, body, limit) {
                let last = chunks.len() - 1;
                return chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, chunk)| {
                        let mut data = DataFrame::new(stream_id, Bytes::from(chunk), i == last);
                        if pad {
                            if let Some(padding) = padding_for(data.data.len(), limit) {
                                data = data.with_padding(padding);
                            }
                        }
                        data.to_gzipped_frame()
                    })
                    .collect();
            }
        }

        // the first chunk fits the windows; later chunks are cut to the
        // credit available when the queue releases them
        let body = Bytes::copy_from_slice(body);
        let first_limit = budget.unwrap_or(self.peer_max_frame_size);
        let first = first_limit.min(body.len());
        let mut chunks = vec![body.slice(..first)];
        if first < body.len() {
            chunks.extend(split(&body.slice(first..), self.peer_max_frame_size));
        }
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut data = DataFrame::new(stream_id, chunk, i == last);
                if pad && i == last {
                    let limit = if i == 0 { first_limit } else { self.peer_max_frame_size };
                    if let Some(padding) = padding_for(data.data.len(), limit) {
                        data = data.with_padding(padding);
                    }
                }
                data.to_frame()
            })
            .collect()
    }

    fn compressed_chunks(&self, stream_id: StreamId, body: &[u8], budget: usize) -> Option<Vec<Vec<u8>>> {
        if !self.sends_gzip() {
            return None;
        }
        let codec = self.config.codec.as_ref()?;
        match compress_chunks(codec.as_ref(), body, budget) {
            Ok(Some(chunks)) => Some(chunks),
            Ok(None) => {
                debug!(stream_id, budget, "body does not compress into the send budget, using DATA");
                None
            }
            Err(e) => {
                warn!(stream_id, error = %e, "compression failed, using DATA");
                None
            }
        }
    }

    /// Reserve a stream and send PUSH_PROMISE for it on `parent`
    fn promise(&mut self, parent: StreamId, request: &Request) -> Result<StreamId> {
        if !self.streams.get(parent).is_some_and(|s| s.is_open_local()) {
            return Err(Error::Internal(format!("cannot push on stream {}", parent)));
        }
        let promised = self.streams.reserve_local()?;
        let block = Bytes::from(self.hpack.encode(request.header_list()));
        // the promised id shares the first frame with the block
        let chunks = split(&block, self.peer_max_frame_size - 4);
        let last = chunks.len() - 1;
        debug!(parent, promised, "promising stream");
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame = if i == 0 {
                PushPromiseFrame {
                    stream_id: parent,
                    promised_stream_id: promised,
                    header_block: chunk,
                    end_headers: i == last,
                    padding: None,
                }
                .to_frame()
            } else {
                let mut flags = FrameFlags::empty();
                if i == last {
                    flags.set(FrameFlags::END_HEADERS);
                }
                Frame::new(FrameType::Continuation, flags, parent, chunk)
            };
            // the whole block goes out together, ahead of anything queued
            self.write_frame(&frame)?;
        }
        Ok(promised)
    }

    fn sends_gzip(&self) -> bool {
        self.config.codec.is_some()
            && self.gzip.send
            && self.gzip.peer_accepts
            && !self.dropped_by_peer.contains(&FrameType::GzippedData.as_u8())
    }

    fn accepts_gzip(&self) -> bool {
        self.config.codec.is_some() && self.gzip.recv && !self.gzip.veto
    }

    fn set_accept_gzip(&mut self, accept: bool) -> Result<()> {
        if self.gzip.veto {
            debug!(peer = %self.peer, "compressed DATA is vetoed for this peer");
            return Ok(());
        }
        if accept && self.config.codec.is_none() {
            debug!(peer = %self.peer, "no payload codec configured");
            return Ok(());
        }
        if self.gzip.recv == accept {
            return Ok(());
        }
        self.gzip.recv = accept;
        self.advertise_gzip(accept)
    }

    fn advertise_gzip(&mut self, accept: bool) -> Result<()> {
        let settings = Settings {
            accept_gzipped_data: Some(accept),
            ..Settings::default()
        };
        self.send_frame(settings.to_frame())
    }

    fn veto_gzip(&mut self) -> Result<()> {
        if self.gzip.veto {
            return Ok(());
        }
        self.gzip.veto = true;
        if self.gzip.recv {
            self.gzip.recv = false;
            self.advertise_gzip(false)?;
        }
        Ok(())
    }

    /// Answer an unsupported frame type, once per type
    fn drop_frame(&mut self, type_byte: u8) -> Result<()> {
        if !self.dropped_sent.insert(type_byte) {
            return Ok(());
        }
        debug!(peer = %self.peer, frame_type = type_byte, "dropping unsupported frame type");
        self.send_frame(DroppedFrame { dropped_type: type_byte }.to_frame())
    }

    // ---- input ----

    fn receive(&mut self, bytes: &[u8]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        if self.closed {
            return Ok(events);
        }

        let mut input = bytes;
        if let Some(seen) = self.preface.as_mut() {
            let take = (CONNECTION_PREFACE.len() - seen.len()).min(input.len());
            seen.extend_from_slice(&input[..take]);
            input = &input[take..];
            let valid = CONNECTION_PREFACE.starts_with(seen);
            let complete = seen.len() == CONNECTION_PREFACE.len();
            if !valid {
                self.fail(Error::connection(ErrorCode::ProtocolError, "invalid connection preface"))?;
                return Ok(events);
            }
            if !complete {
                return Ok(events);
            }
            debug!(peer = %self.peer, "received connection preface");
            self.preface = None;
        }

        let (frames, framing_error) = self.deserializer.decode_until_error(input);
        for frame in frames {
            if self.closed {
                break;
            }
            trace!(peer = %self.peer, frame = %frame, "received frame");
            let result = match self.hook.push(frame) {
                Ok(Some(frame)) => self.recv_frame(frame, &mut events),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.fail(e)?;
            }
            self.finish_drain();
        }
        if let Some(e) = framing_error {
            if !self.closed {
                self.fail(e)?;
            }
        }
        Ok(events)
    }

    /// Answer a protocol error on the wire; anything else is returned
    fn fail(&mut self, err: Error) -> Result<()> {
        match err {
            Error::Connection { code, reason } => {
                warn!(peer = %self.peer, code = %code, reason = %reason, "connection error");
                self.die(code, &reason);
                Ok(())
            }
            Error::Stream {
                stream_id,
                code,
                reason,
            } => {
                info!(peer = %self.peer, stream_id, code = %code, reason = %reason, "stream error");
                self.reset_stream(stream_id);
                self.write_frame(&RstStreamFrame::new(stream_id, code).to_frame())
            }
            other => Err(other),
        }
    }

    fn recv_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<()> {
        if self.awaiting_settings {
            if !frame.is(FrameType::Settings) || frame.flags.is_ack() {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!("expected SETTINGS as the first frame, received {}", frame.type_name()),
                ));
            }
            self.awaiting_settings = false;
        }

        let frame_type = frame.frame_type();
        if self.goaway.is_some()
            && !matches!(
                frame_type,
                Some(
                    FrameType::Data
                        | FrameType::Headers
                        | FrameType::PushPromise
                        | FrameType::Continuation
                        | FrameType::GzippedData
                )
            )
        {
            warn!(peer = %self.peer, frame = %frame, "ignoring frame after GOAWAY");
            return Ok(());
        }

        match frame_type {
            Some(FrameType::Data) => self.on_data(&frame, events),
            Some(FrameType::Headers) => self.on_headers(&frame, events),
            Some(FrameType::Priority) => self.on_priority(&frame),
            Some(FrameType::RstStream) => self.on_rst_stream(&frame, events),
            Some(FrameType::Settings) => self.on_settings(&frame),
            Some(FrameType::PushPromise) => Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("PUSH_PROMISE not accepted by a {}", self.role),
            )),
            Some(FrameType::Ping) => self.on_ping(&frame),
            Some(FrameType::Goaway) => self.on_goaway(&frame),
            Some(FrameType::WindowUpdate) => self.on_window_update(&frame),
            Some(FrameType::Continuation) => Err(Error::Internal("CONTINUATION escaped reassembly".into())),
            Some(FrameType::GzippedData) => self.on_gzipped_data(&frame, events),
            Some(FrameType::DroppedFrame) => self.on_dropped_frame(&frame),
            None => self.drop_frame(frame.type_byte),
        }
    }

    /// DATA-class frames need a stream that exists or existed
    fn check_data_stream(&self, frame: &Frame) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("{} on stream 0", frame.type_name()),
            ));
        }
        if self.streams.lookup(frame.stream_id) == Lookup::Idle {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("{} on idle stream {}", frame.type_name(), frame.stream_id),
            ));
        }
        Ok(())
    }

    fn receiving_stream(&mut self, stream_id: StreamId) -> Result<&mut Stream> {
        match self.streams.get_mut(stream_id) {
            Some(stream) => {
                stream.check_receive_data()?;
                Ok(stream)
            }
            None => Err(Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                format!("data on closed stream {}", stream_id),
            )),
        }
    }

    /// Give the peer back the credit it just used
    fn grant(&mut self, stream_id: StreamId, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        self.send_frame(WindowUpdateFrame::new(stream_id, size as u32).to_frame())
    }

    fn on_data(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let stream_id = frame.stream_id;
        self.check_data_stream(frame)?;
        let size = frame.payload.len();
        self.grant(0, size)?;
        let data = DataFrame::parse(frame)?;
        self.receiving_stream(stream_id)?.append_body(&data.data);
        self.grant(stream_id, size)?;
        if data.end_stream {
            self.emit_message(stream_id, events)?;
        }
        Ok(())
    }

    fn on_gzipped_data(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        if !self.accepts_gzip() {
            return self.drop_frame(frame.type_byte);
        }
        let stream_id = frame.stream_id;
        self.check_data_stream(frame)?;
        let size = frame.payload.len();
        self.grant(0, size)?;
        let data = DataFrame::parse(frame)?;
        self.receiving_stream(stream_id)?;

        let body = if data.data.is_empty() {
            Vec::new()
        } else {
            let codec = self
                .config
                .codec
                .clone()
                .ok_or_else(|| Error::Internal("compressed DATA accepted without a codec".into()))?;
            match codec.decompress(&data.data) {
                Ok(body) => body,
                Err(e) => {
                    warn!(peer = %self.peer, stream_id, error = %e, "undecodable compressed DATA, refusing more");
                    self.veto_gzip()?;
                    return Err(Error::stream(
                        stream_id,
                        ErrorCode::DataEncodingError,
                        format!("compressed payload does not decode: {}", e),
                    ));
                }
            }
        };
        self.receiving_stream(stream_id)?.append_body(&body);
        self.grant(stream_id, size)?;
        if data.end_stream {
            self.emit_message(stream_id, events)?;
        }
        Ok(())
    }

    fn on_headers(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let stream_id = frame.stream_id;
        if stream_id == 0 {
            return Err(Error::connection(ErrorCode::ProtocolError, "HEADERS on stream 0"));
        }
        let headers = HeadersFrame::parse(frame)?;
        match self.streams.lookup(stream_id) {
            Lookup::Active => self.on_header_block(headers, events),
            Lookup::Idle => self.on_new_stream(headers, events),
            Lookup::Closed => {
                // keep the decoder in step with the peer's encoder
                self.decode_block(&headers.header_block)?;
                Err(Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS on closed stream {}", stream_id),
                ))
            }
        }
    }

    fn decode_block(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let fields = self.hpack.decode(block)?;
        Ok(fields
            .into_iter()
            .map(|f| {
                (
                    String::from_utf8_lossy(&f.name).into_owned(),
                    String::from_utf8_lossy(&f.value).into_owned(),
                )
            })
            .collect())
    }

    fn apply_priority(&mut self, headers: &HeadersFrame) -> Result<()> {
        match headers.priority {
            Some(p) => self
                .priority
                .add(headers.stream_id, p.stream_dependency, p.weight, p.exclusive),
            None => Ok(()),
        }
    }

    fn on_new_stream(&mut self, headers: HeadersFrame, events: &mut Vec<Event>) -> Result<()> {
        let stream_id = headers.stream_id;
        self.streams.accept_remote(stream_id)?;
        let fields = self.decode_block(&headers.header_block)?;
        self.apply_priority(&headers)?;

        if self.goaway.is_some() {
            debug!(peer = %self.peer, stream_id, "ignoring new stream after GOAWAY");
            self.reset_stream(stream_id);
            return Ok(());
        }
        if let Some(max) = self.config.max_concurrent_streams {
            let open = self
                .streams
                .stream_ids()
                .into_iter()
                .filter(|&id| id != stream_id && !self.streams.is_local_id(id))
                .filter(|&id| self.streams.get(id).is_some_and(|s| !s.state().is_closed()))
                .count();
            if open >= max as usize {
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::RefusedStream,
                    format!("more than {} concurrent streams", max),
                ));
            }
        }

        self.streams
            .get_mut(stream_id)
            .ok_or_else(|| missing(stream_id))?
            .open()?;
        debug!(peer = %self.peer, stream_id, "peer opened stream");
        self.on_fields(stream_id, fields, headers.end_stream, events)
    }

    fn on_header_block(&mut self, headers: HeadersFrame, events: &mut Vec<Event>) -> Result<()> {
        let stream_id = headers.stream_id;
        let fields = self.decode_block(&headers.header_block)?;
        self.apply_priority(&headers)?;

        let is_server = self.role == Role::Server;
        let stream = self.streams.get_mut(stream_id).ok_or_else(|| missing(stream_id))?;
        if is_server && stream.has_headers() && !headers.end_stream {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "trailers without END_STREAM",
            ));
        }
        if !stream.is_open_remote() {
            return Err(Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                format!("HEADERS on stream {} in state {:?}", stream_id, stream.state()),
            ));
        }
        self.on_fields(stream_id, fields, headers.end_stream, events)
    }

    fn on_fields(
        &mut self,
        stream_id: StreamId,
        fields: Vec<(String, String)>,
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let kind = match self.role {
            Role::Server => MessageKind::Request,
            Role::Client => MessageKind::Response,
        };
        let stream = self.streams.get_mut(stream_id).ok_or_else(|| missing(stream_id))?;
        stream.begin_header_block();
        for (name, value) in fields {
            stream.add_header(name, value);
        }
        stream.validate_headers(kind)?;
        if end_stream {
            self.emit_message(stream_id, events)?;
        }
        Ok(())
    }

    /// The peer finished a message: close its half and queue the handler call
    fn emit_message(&mut self, stream_id: StreamId, events: &mut Vec<Event>) -> Result<()> {
        let stream = self.streams.get_mut(stream_id).ok_or_else(|| missing(stream_id))?;
        stream.close_remote()?;
        stream.validate_content_length()?;
        let (headers, body) = stream.take_message();

        let malformed = |e: crate::http::Error| {
            Error::stream(stream_id, ErrorCode::ProtocolError, format!("malformed message: {}", e))
        };
        let event = match self.role {
            Role::Server => Event::Request(stream_id, Request::from_parts(headers, body).map_err(malformed)?),
            Role::Client => Event::Response(stream_id, Response::from_parts(headers, body).map_err(malformed)?),
        };
        if !self.streams.is_local_id(stream_id) {
            self.last_stream = self.last_stream.max(stream_id);
        }
        debug!(peer = %self.peer, stream_id, "message complete");
        events.push(event);
        self.cleanup(stream_id);
        Ok(())
    }

    fn on_priority(&mut self, frame: &Frame) -> Result<()> {
        let priority = PriorityFrame::parse(frame)?;
        let spec = priority.priority;
        self.priority
            .add(priority.stream_id, spec.stream_dependency, spec.weight, spec.exclusive)
    }

    fn on_rst_stream(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        if frame.stream_id != 0 && self.streams.lookup(frame.stream_id) == Lookup::Idle {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("RST_STREAM on idle stream {}", frame.stream_id),
            ));
        }
        let rst = RstStreamFrame::parse(frame)?;
        let name = rst.code().map_or("UNKNOWN", |c| c.name());
        info!(peer = %self.peer, stream_id = rst.stream_id, code = rst.error_code, name, "stream reset by peer");
        if self.streams.get(rst.stream_id).is_none() {
            return Ok(());
        }
        self.reset_stream(rst.stream_id);
        events.push(Event::Cancel(rst.stream_id, rst.error_code));
        Ok(())
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<()> {
        if frame.stream_id != 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("SETTINGS on stream {}", frame.stream_id),
            ));
        }
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::connection(
                    ErrorCode::FrameSizeError,
                    "SETTINGS ACK with a payload",
                ));
            }
            self.hpack
                .decoder
                .set_max_allowed(self.config.header_table_size as usize);
            debug!(peer = %self.peer, "peer acknowledged our SETTINGS");
            return Ok(());
        }

        let settings = Settings::from_frame(frame)?;
        debug!(peer = %self.peer, settings = ?settings, "received SETTINGS");
        if let Some(size) = settings.header_table_size {
            self.hpack.encoder.set_max_size(size as usize);
        }
        if let Some(push) = settings.enable_push {
            self.push_to_peer = push;
        }
        if settings.max_concurrent_streams.is_some() {
            self.streams
                .set_max_concurrent_streams(settings.max_concurrent_streams);
        }
        if let Some(size) = settings.max_frame_size {
            self.peer_max_frame_size = size as usize;
            self.serializer.set_max_frame_size(size as usize);
        }
        if let Some(accept) = settings.accept_gzipped_data {
            self.gzip.peer_accepts = accept;
        }
        self.send_frame(Settings::ack_frame())?;

        if let Some(size) = settings.initial_window_size {
            self.streams.set_initial_window_size(size)?;
            self.release_queue()?;
        }
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<()> {
        let ping = PingFrame::parse(frame)?;
        if !ping.ack {
            return self.send_frame(PingFrame::ack(ping.data).to_frame());
        }
        match self.pings.iter().position(|(data, _)| *data == ping.data) {
            Some(i) => {
                let (_, sent) = self.pings.remove(i);
                debug!(peer = %self.peer, rtt_us = sent.elapsed().as_micros() as u64, "ping acknowledged");
                Ok(())
            }
            None => Err(Error::connection(
                ErrorCode::ProtocolError,
                "PING ACK without a matching PING",
            )),
        }
    }

    fn on_goaway(&mut self, frame: &Frame) -> Result<()> {
        let goaway = GoawayFrame::parse(frame)?;
        let name = goaway.code().map_or("UNKNOWN", |c| c.name());
        info!(
            peer = %self.peer,
            last_stream_id = goaway.last_stream_id,
            code = goaway.error_code,
            name,
            debug_data = %String::from_utf8_lossy(&goaway.debug_data),
            "peer sent GOAWAY"
        );
        self.goaway = Some(goaway.last_stream_id);
        Ok(())
    }

    fn on_window_update(&mut self, frame: &Frame) -> Result<()> {
        let stream_id = frame.stream_id;
        if stream_id != 0 && self.streams.lookup(stream_id) == Lookup::Idle {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("WINDOW_UPDATE on idle stream {}", stream_id),
            ));
        }
        let update = WindowUpdateFrame::parse(frame)?;
        if stream_id == 0 {
            let size = self.window.increase(update.size_increment)?;
            trace!(size, "connection window");
        } else if let Some(stream) = self.streams.get_mut(stream_id) {
            let size = stream.send_window_mut().increase(update.size_increment)?;
            trace!(stream_id, size, "stream window");
        } else {
            trace!(stream_id, "WINDOW_UPDATE for a closed stream");
            return Ok(());
        }
        self.release_queue()
    }

    fn on_dropped_frame(&mut self, frame: &Frame) -> Result<()> {
        let dropped = DroppedFrame::parse(frame)?;
        info!(peer = %self.peer, frame_type = dropped.dropped_type, "peer dropped a frame type");
        self.dropped_by_peer.insert(dropped.dropped_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::codec::encode_header;
    use crate::http::h2::settings::SettingsParameter;
    use crate::http::{Method, Status};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory transport recording everything written
    #[derive(Clone, Default)]
    struct Wire {
        out: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
    }

    impl Transport for Wire {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.out.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn peer(&self) -> PeerDescriptor {
            PeerDescriptor::new("test")
        }

        fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
            Ok(Box::new(self.clone()))
        }
    }

    impl Wire {
        /// Every frame written so far, header blocks reassembled
        fn frames(&self, skip_preface: bool) -> Vec<Frame> {
            let out = self.out.lock().unwrap().clone();
            let start = if skip_preface { CONNECTION_PREFACE.len() } else { 0 };
            let mut deserializer = FrameDeserializer::with_max_frame_size(0xFF_FFFF);
            let mut hook = HeadersHook::new();
            deserializer
                .decode(&out[start..])
                .unwrap()
                .into_iter()
                .filter_map(|f| hook.push(f).unwrap())
                .collect()
        }

        fn of_type(&self, frame_type: FrameType) -> Vec<Frame> {
            self.frames(false)
                .into_iter()
                .filter(|f| f.is(frame_type))
                .collect()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Reversing codec with a marker byte
    #[derive(Debug)]
    struct Reverse;

    impl PayloadCodec for Reverse {
        fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
            let mut out = vec![0xC0];
            out.extend(input.iter().rev());
            Ok(out)
        }

        fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
            match input.split_first() {
                Some((0xC0, rest)) => Ok(rest.iter().rev().copied().collect()),
                _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad marker")),
            }
        }
    }

    fn encode(frames: &[Frame]) -> Vec<u8> {
        let mut serializer = FrameSerializer::with_max_frame_size(0xFF_FFFF);
        frames
            .iter()
            .flat_map(|f| serializer.encode(f).unwrap().to_vec())
            .collect()
    }

    fn settings(pairs: &[(SettingsParameter, u32)]) -> Frame {
        let mut settings = Settings::new();
        for &(parameter, value) in pairs {
            settings.set_raw(parameter.as_u16(), value).unwrap();
        }
        settings.to_frame()
    }

    fn request_block(hpack: &mut HPack, path: &str) -> Bytes {
        Bytes::from(hpack.encode([
            (":method", "GET"),
            (":scheme", "https"),
            (":path", path),
        ]))
    }

    struct Server {
        agent: Agent,
        wire: Wire,
        hpack: HPack,
        requests: Arc<Mutex<Vec<(StreamId, Request)>>>,
        cancels: Arc<Mutex<Vec<(StreamId, u32)>>>,
    }

    impl Server {
        fn with_config(config: AgentConfig, peer_settings: &[(SettingsParameter, u32)]) -> Self {
            let agent = Agent::new(Role::Server, config);
            let requests = Arc::new(Mutex::new(Vec::new()));
            let cancels = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&requests);
            agent.on_request(move |id, request| sink.lock().unwrap().push((id, request)));
            let sink = Arc::clone(&cancels);
            agent.on_cancel(move |id, code| sink.lock().unwrap().push((id, code)));

            let wire = Wire::default();
            agent.start(Box::new(wire.clone())).unwrap();
            let mut preamble = CONNECTION_PREFACE.to_vec();
            preamble.extend(encode(&[settings(peer_settings)]));
            agent.receive(&preamble).unwrap();

            Server {
                agent,
                wire,
                hpack: HPack::default(),
                requests,
                cancels,
            }
        }

        fn new() -> Self {
            Self::with_config(AgentConfig::default(), &[])
        }

        fn send(&self, frames: &[Frame]) {
            self.agent.receive(&encode(frames)).unwrap();
        }

        fn open(&mut self, stream_id: StreamId, end_stream: bool) {
            let block = request_block(&mut self.hpack, "/");
            let frame = HeadersFrame::new(stream_id, block, end_stream, true).to_frame();
            self.send(&[frame]);
        }

        fn goaway_code(&self) -> Option<u32> {
            self.wire
                .of_type(FrameType::Goaway)
                .first()
                .map(|f| GoawayFrame::parse(f).unwrap().error_code)
        }
    }

    #[test]
    fn test_server_sends_settings_first() {
        let server = Server::new();
        let frames = server.wire.frames(false);
        assert!(frames[0].is(FrameType::Settings));
        assert!(!frames[0].flags.is_ack());
        let settings = Settings::from_frame(&frames[0]).unwrap();
        assert_eq!(settings.initial_window_size, Some(LOCAL_INITIAL_WINDOW_SIZE));
        assert_eq!(settings.accept_gzipped_data, None);
        // the peer's SETTINGS is acknowledged
        assert!(frames[1].is(FrameType::Settings) && frames[1].flags.is_ack());
    }

    #[test]
    fn test_bad_preface_is_connection_error() {
        let agent = Agent::new(Role::Server, AgentConfig::default());
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        agent.receive(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

        let goaway = GoawayFrame::parse(&wire.of_type(FrameType::Goaway)[0]).unwrap();
        assert_eq!(goaway.code(), Some(ErrorCode::ProtocolError));
        assert!(wire.is_closed());
        assert!(agent.is_shut_down());
    }

    #[test]
    fn test_first_frame_must_be_settings() {
        let agent = Agent::new(Role::Server, AgentConfig::default());
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        let mut bytes = CONNECTION_PREFACE.to_vec();
        bytes.extend(encode(&[PingFrame::new([0; 8]).to_frame()]));
        agent.receive(&bytes).unwrap();

        assert_eq!(wire.of_type(FrameType::Goaway).len(), 1);
        assert!(wire.of_type(FrameType::Ping).is_empty());
        assert!(wire.is_closed());
    }

    #[test]
    fn test_preface_split_across_reads() {
        let agent = Agent::new(Role::Server, AgentConfig::default());
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        let mut bytes = CONNECTION_PREFACE.to_vec();
        bytes.extend(encode(&[settings(&[])]));
        for chunk in bytes.chunks(5) {
            agent.receive(chunk).unwrap();
        }
        assert!(wire.of_type(FrameType::Goaway).is_empty());
        assert_eq!(wire.of_type(FrameType::Settings).len(), 2);
    }

    #[test]
    fn test_request_dispatched_with_window_credit() {
        let mut server = Server::new();
        server.open(1, false);
        server.send(&[DataFrame::new(1, Bytes::from_static(b"hello"), true).to_frame()]);

        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (id, request) = &requests[0];
        assert_eq!(*id, 1);
        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(Message::body(request), b"hello");

        let updates: Vec<_> = server
            .wire
            .of_type(FrameType::WindowUpdate)
            .iter()
            .map(|f| WindowUpdateFrame::parse(f).unwrap())
            .map(|u| (u.stream_id, u.size_increment))
            .collect();
        assert_eq!(updates, vec![(0, 5), (1, 5)]);
        assert_eq!(server.agent.last_stream(), 1);
    }

    #[test]
    fn test_respond_splits_body_and_closes_stream() {
        let mut server = Server::new();
        server.open(1, true);
        let response = Response::builder()
            .status(Status::OK)
            .body(vec![7u8; 40_000])
            .build();
        server.agent.respond(1, &response).unwrap();

        let frames: Vec<_> = server
            .wire
            .frames(false)
            .into_iter()
            .filter(|f| f.stream_id == 1)
            .collect();
        assert!(frames[0].is(FrameType::Headers));
        assert!(!frames[0].flags.is_end_stream());
        let data: Vec<_> = frames[1..].iter().collect();
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|f| f.is(FrameType::Data) && f.payload.len() <= 16384));
        assert!(data[2].flags.is_end_stream());
        assert_eq!(data.iter().map(|f| f.payload.len()).sum::<usize>(), 40_000);
        assert_eq!(server.agent.active_streams(), 0);
    }

    #[test]
    fn test_flow_control_queues_until_window_update() {
        let mut server = Server::with_config(
            AgentConfig::default(),
            &[(SettingsParameter::InitialWindowSize, 10)],
        );
        server.open(1, true);
        let response = Response::builder()
            .status(Status::OK)
            .body(vec![1u8; 25])
            .build();
        server.agent.respond(1, &response).unwrap();

        let sent = server.wire.of_type(FrameType::Data);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.len(), 10);

        // credit smaller than what is queued still moves bytes
        server.send(&[WindowUpdateFrame::new(1, 5).to_frame()]);
        let sent = server.wire.of_type(FrameType::Data);
        assert_eq!(sent.iter().map(|f| f.payload.len()).collect::<Vec<_>>(), vec![10, 5]);
        assert!(!sent[1].flags.is_end_stream());

        server.send(&[WindowUpdateFrame::new(1, 10).to_frame()]);
        let sent = server.wire.of_type(FrameType::Data);
        assert_eq!(sent.iter().map(|f| f.payload.len()).collect::<Vec<_>>(), vec![10, 5, 10]);
        assert!(sent[2].flags.is_end_stream());
        assert_eq!(server.agent.active_streams(), 0);
    }

    #[test]
    fn test_small_connection_window_still_sends() {
        let mut server = Server::new();
        server.open(1, true);
        server.open(3, true);
        let data_on = |server: &Server, stream_id: StreamId| -> Vec<Frame> {
            server
                .wire
                .of_type(FrameType::Data)
                .into_iter()
                .filter(|f| f.stream_id == stream_id)
                .collect()
        };

        // leave 500 bytes of the 65535 connection window
        let big = Response::builder().status(Status::OK).body(vec![1u8; 65_035]).build();
        server.agent.respond(1, &big).unwrap();
        assert_eq!(data_on(&server, 1).iter().map(|f| f.payload.len()).sum::<usize>(), 65_035);

        let small = Response::builder().status(Status::OK).body(vec![2u8; 2000]).build();
        server.agent.respond(3, &small).unwrap();
        let sent = data_on(&server, 3);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.len(), 500);

        server.send(&[WindowUpdateFrame::new(0, 1000).to_frame()]);
        let sent = data_on(&server, 3);
        assert_eq!(sent.iter().map(|f| f.payload.len()).collect::<Vec<_>>(), vec![500, 1000]);
        assert!(sent.iter().all(|f| !f.flags.is_end_stream()));

        server.send(&[WindowUpdateFrame::new(0, 600).to_frame()]);
        let sent = data_on(&server, 3);
        assert_eq!(sent.iter().map(|f| f.payload.len()).sum::<usize>(), 2000);
        assert!(sent.last().unwrap().flags.is_end_stream());
        assert_eq!(server.agent.active_streams(), 0);
    }

    #[test]
    fn test_initial_window_increase_releases_queue() {
        let mut server = Server::with_config(
            AgentConfig::default(),
            &[(SettingsParameter::InitialWindowSize, 0)],
        );
        server.open(1, true);
        let response = Response::builder().status(Status::OK).body("abc").build();
        server.agent.respond(1, &response).unwrap();
        assert!(server.wire.of_type(FrameType::Data).is_empty());

        server.send(&[settings(&[(SettingsParameter::InitialWindowSize, 100)])]);
        let sent = server.wire.of_type(FrameType::Data);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].payload[..], b"abc");
    }

    #[test]
    fn test_data_on_idle_stream_is_connection_error() {
        let server = Server::new();
        server.send(&[DataFrame::new(3, Bytes::from_static(b"x"), false).to_frame()]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::ProtocolError.as_u32()));
        assert!(server.wire.is_closed());
    }

    #[test]
    fn test_data_on_closed_stream_is_reset() {
        let mut server = Server::new();
        server.open(1, true);
        server.agent.respond(1, &Response::new(Status::OK)).unwrap();
        server.send(&[DataFrame::new(1, Bytes::from_static(b"late"), false).to_frame()]);

        let rst = RstStreamFrame::parse(&server.wire.of_type(FrameType::RstStream)[0]).unwrap();
        assert_eq!(rst.stream_id, 1);
        assert_eq!(rst.code(), Some(ErrorCode::StreamClosed));
        assert!(!server.wire.is_closed());
    }

    #[test]
    fn test_malformed_request_is_reset() {
        let mut server = Server::new();
        let block = Bytes::from(server.hpack.encode([(":method", "GET"), (":path", "/")]));
        server.send(&[HeadersFrame::new(1, block, true, true).to_frame()]);

        assert!(server.requests.lock().unwrap().is_empty());
        let rst = RstStreamFrame::parse(&server.wire.of_type(FrameType::RstStream)[0]).unwrap();
        assert_eq!(rst.code(), Some(ErrorCode::ProtocolError));
        // the connection still serves other streams
        server.open(3, true);
        assert_eq!(server.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_trailers_require_end_stream() {
        let mut server = Server::new();
        server.open(1, false);
        let block = Bytes::from(server.hpack.encode([("x-trailer", "1")]));
        server.send(&[HeadersFrame::new(1, block, false, true).to_frame()]);

        let rst = RstStreamFrame::parse(&server.wire.of_type(FrameType::RstStream)[0]).unwrap();
        assert_eq!(rst.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn test_trailers_are_merged() {
        let mut server = Server::new();
        server.open(1, false);
        let block = Bytes::from(server.hpack.encode([("x-checksum", "abc")]));
        server.send(&[HeadersFrame::new(1, block, true, true).to_frame()]);

        let requests = server.requests.lock().unwrap();
        assert_eq!(requests[0].1.headers().get("x-checksum"), Some("abc"));
    }

    #[test]
    fn test_stream_ids_must_increase() {
        let mut server = Server::new();
        server.open(5, true);
        server.open(3, true);
        assert_eq!(server.goaway_code(), Some(ErrorCode::ProtocolError.as_u32()));
        let goaway = GoawayFrame::parse(&server.wire.of_type(FrameType::Goaway)[0]).unwrap();
        assert_eq!(goaway.last_stream_id, 5);
    }

    #[test]
    fn test_headers_priority_applied() {
        let mut server = Server::new();
        let block = request_block(&mut server.hpack, "/");
        let frame = HeadersFrame::new(1, block, true, true)
            .with_priority(crate::http::h2::frames::PrioritySpec::new(0, false, 200))
            .to_frame();
        server.send(&[frame]);
        assert_eq!(server.agent.priority_of(1), Some((0, 200)));
    }

    #[test]
    fn test_ping_round_trip() {
        let server = Server::new();
        server.agent.ping(Some(&b"abc"[..])).unwrap();
        let ping = PingFrame::parse(&server.wire.of_type(FrameType::Ping)[0]).unwrap();
        assert!(!ping.ack);
        assert_eq!(&ping.data, b"abc\0\0\0\0\0");

        server.send(&[PingFrame::ack(ping.data).to_frame()]);
        assert!(server.goaway_code().is_none());

        // the same ACK again no longer matches
        server.send(&[PingFrame::ack(ping.data).to_frame()]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::ProtocolError.as_u32()));
    }

    #[test]
    fn test_ping_is_answered() {
        let server = Server::new();
        server.send(&[PingFrame::new(*b"12345678").to_frame()]);
        let pong = PingFrame::parse(&server.wire.of_type(FrameType::Ping)[0]).unwrap();
        assert!(pong.ack);
        assert_eq!(&pong.data, b"12345678");
    }

    #[test]
    fn test_frames_ahead_of_oversize_frame_are_processed() {
        let server = Server::new();
        let mut bytes = encode(&[PingFrame::new(*b"in-front").to_frame()]);
        bytes.extend_from_slice(&encode_header(FrameType::Data.as_u8(), FrameFlags::empty(), 1, 16385));
        server.agent.receive(&bytes).unwrap();

        let frames = server.wire.frames(false);
        let pong = frames.iter().position(|f| f.is(FrameType::Ping)).unwrap();
        let goaway = frames.iter().position(|f| f.is(FrameType::Goaway)).unwrap();
        assert!(pong < goaway);
        assert_eq!(&PingFrame::parse(&frames[pong]).unwrap().data, b"in-front");
        assert_eq!(server.goaway_code(), Some(ErrorCode::FrameSizeError.as_u32()));
        assert!(server.wire.is_closed());
    }

    #[test]
    fn test_rst_stream_invokes_cancel() {
        let mut server = Server::new();
        server.open(1, false);
        server.send(&[RstStreamFrame::new(1, ErrorCode::Cancel).to_frame()]);

        assert_eq!(*server.cancels.lock().unwrap(), vec![(1, ErrorCode::Cancel.as_u32())]);
        assert_eq!(server.agent.active_streams(), 0);
        assert!(server.agent.respond(1, &Response::new(Status::OK)).is_err());
    }

    #[test]
    fn test_rst_stream_on_idle_stream() {
        let server = Server::new();
        server.send(&[RstStreamFrame::new(7, ErrorCode::Cancel).to_frame()]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::ProtocolError.as_u32()));
    }

    #[test]
    fn test_unknown_frame_dropped_once() {
        let server = Server::new();
        let unknown = Frame::from_raw(0x77, FrameFlags::empty(), 0, Bytes::from_static(b"?"));
        server.send(&[unknown.clone(), unknown]);

        let dropped = server.wire.of_type(FrameType::DroppedFrame);
        assert_eq!(dropped.len(), 1);
        assert_eq!(DroppedFrame::parse(&dropped[0]).unwrap().dropped_type, 0x77);
    }

    #[test]
    fn test_push_promise_rejected() {
        let server = Server::new();
        let promise = PushPromiseFrame {
            stream_id: 1,
            promised_stream_id: 2,
            header_block: Bytes::new(),
            end_headers: true,
            padding: None,
        };
        server.send(&[promise.to_frame()]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::ProtocolError.as_u32()));
    }

    #[test]
    fn test_settings_ack_with_payload() {
        let server = Server::new();
        let ack = Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            Bytes::from_static(&[0, 1, 0, 0, 0, 0]),
        );
        server.send(&[ack]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::FrameSizeError.as_u32()));
    }

    #[test]
    fn test_window_overflow_is_flow_control_error() {
        let server = Server::new();
        server.send(&[WindowUpdateFrame::new(0, 0x7FFF_FFFF).to_frame()]);
        assert_eq!(server.goaway_code(), Some(ErrorCode::FlowControlError.as_u32()));
    }

    #[test]
    fn test_zero_stream_increment_is_stream_error() {
        let mut server = Server::new();
        server.open(1, false);
        server.send(&[WindowUpdateFrame::new(1, 0).to_frame()]);
        let rst = RstStreamFrame::parse(&server.wire.of_type(FrameType::RstStream)[0]).unwrap();
        assert_eq!(rst.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn test_goaway_drains_open_streams() {
        let mut server = Server::new();
        server.open(1, false);
        server.send(&[GoawayFrame::new(0, ErrorCode::NoError, Bytes::new()).to_frame()]);
        assert!(server.agent.peer_went_away());

        // a new stream is decoded but ignored
        server.open(3, true);
        // frames other than header and data frames are dropped
        server.send(&[PingFrame::new([1; 8]).to_frame()]);
        assert!(server.wire.of_type(FrameType::Ping).is_empty());

        server.send(&[DataFrame::new(1, Bytes::from_static(b"body"), true).to_frame()]);
        {
            let requests = server.requests.lock().unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].0, 1);
        }
        assert!(!server.wire.is_closed());

        server.agent.respond(1, &Response::new(Status::OK)).unwrap();
        assert_eq!(server.goaway_code(), Some(ErrorCode::NoError.as_u32()));
        assert!(server.wire.is_closed());
    }

    #[test]
    fn test_shut_down_is_idempotent_and_final() {
        let mut server = Server::new();
        server.open(1, true);
        server.agent.shut_down().unwrap();
        server.agent.shut_down().unwrap();

        assert_eq!(server.wire.of_type(FrameType::Goaway).len(), 1);
        let goaway = GoawayFrame::parse(&server.wire.of_type(FrameType::Goaway)[0]).unwrap();
        assert_eq!(goaway.last_stream_id, 1);
        assert!(matches!(
            server.agent.respond(1, &Response::new(Status::OK)),
            Err(Error::ShutDown)
        ));
        assert!(matches!(server.agent.ping(None), Err(Error::ShutDown)));
    }

    #[test]
    fn test_padding_rounds_to_256() {
        let mut server = Server::new();
        server.open(1, true);
        let response = Response::builder()
            .status(Status::OK)
            .body(vec![0u8; 1000])
            .pad(true)
            .build();
        server.agent.respond(1, &response).unwrap();

        let headers = &server.wire.of_type(FrameType::Headers)[0];
        assert!(headers.flags.is_padded());
        assert_eq!(headers.payload.len() % 256, 0);
        let data = &server.wire.of_type(FrameType::Data)[0];
        assert!(data.flags.is_padded());
        assert_eq!(data.payload.len(), 1024);
        assert_eq!(DataFrame::parse(data).unwrap().data.len(), 1000);
    }

    #[test]
    fn test_padding_limits() {
        assert_eq!(padding_for(0, 16384), Some(255));
        assert_eq!(padding_for(255, 16384), Some(0));
        assert_eq!(padding_for(256, 16384), Some(255));
        assert_eq!(padding_for(16300, 16384), Some(83));
        assert_eq!(padding_for(16384, 16384), None);
    }

    #[test]
    fn test_push_promise_and_response() {
        let mut server = Server::new();
        server.open(1, true);
        let request = Request::builder().path("/style.css").build();
        let promised = server
            .agent
            .push(1, &request, &Response::builder().status(Status::OK).body("css").build())
            .unwrap();
        assert_eq!(promised, 2);

        let frames = server.wire.frames(false);
        let promise = frames.iter().find(|f| f.is(FrameType::PushPromise)).unwrap();
        let promise = PushPromiseFrame::parse(promise).unwrap();
        assert_eq!((promise.stream_id, promise.promised_stream_id), (1, 2));
        let pushed: Vec<_> = frames.iter().filter(|f| f.stream_id == 2).collect();
        assert!(pushed[0].is(FrameType::Headers));
        assert!(pushed.last().unwrap().flags.is_end_stream());
    }

    #[test]
    fn test_push_refused_when_disabled() {
        let mut server = Server::with_config(
            AgentConfig::default(),
            &[(SettingsParameter::EnablePush, 0)],
        );
        server.open(1, true);
        let request = Request::builder().path("/a").build();
        let result = server.agent.push(1, &request, &Response::new(Status::OK));
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    fn gzip_config() -> AgentConfig {
        AgentConfig {
            codec: Some(Arc::new(Reverse)),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_gzipped_data_is_decoded() {
        let mut server = Server::with_config(gzip_config(), &[]);
        let advertised = Settings::from_frame(&server.wire.frames(false)[0]).unwrap();
        assert_eq!(advertised.accept_gzipped_data, Some(true));

        server.open(1, false);
        let compressed = Reverse.compress(b"compressed body").unwrap();
        server.send(&[DataFrame::new(1, Bytes::from(compressed), true).to_gzipped_frame()]);

        let requests = server.requests.lock().unwrap();
        assert_eq!(Message::body(&requests[0].1), b"compressed body");
    }

    #[test]
    fn test_bad_gzipped_data_vetoes_compression() {
        let mut server = Server::with_config(gzip_config(), &[]);
        server.open(1, false);
        server.send(&[DataFrame::new(1, Bytes::from_static(b"junk"), true).to_gzipped_frame()]);

        let rst = RstStreamFrame::parse(&server.wire.of_type(FrameType::RstStream)[0]).unwrap();
        assert_eq!(rst.code(), Some(ErrorCode::DataEncodingError));
        let withdrawn = server
            .wire
            .of_type(FrameType::Settings)
            .iter()
            .filter(|f| !f.flags.is_ack())
            .filter_map(|f| Settings::from_frame(f).ok())
            .any(|s| s.accept_gzipped_data == Some(false));
        assert!(withdrawn);
        assert!(!server.agent.accepts_gzip());

        // accept_gzip cannot undo the veto; further frames are dropped
        server.agent.accept_gzip().unwrap();
        assert!(!server.agent.accepts_gzip());
        server.open(3, false);
        server.send(&[DataFrame::new(3, Bytes::from_static(b"x"), true).to_gzipped_frame()]);
        assert_eq!(server.wire.of_type(FrameType::DroppedFrame).len(), 1);
    }

    #[test]
    fn test_sends_gzip_when_peer_accepts() {
        let mut server = Server::with_config(
            gzip_config(),
            &[(SettingsParameter::AcceptGzippedData, 1)],
        );
        assert!(server.agent.sends_gzip());
        server.open(1, true);
        let response = Response::builder().status(Status::OK).body("hello").build();
        server.agent.respond(1, &response).unwrap();

        let frames = server.wire.of_type(FrameType::GzippedData);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].flags.is_end_stream());
        assert_eq!(Reverse.decompress(&frames[0].payload).unwrap(), b"hello");

        // the peer dropping the type stops compression
        server.send(&[DroppedFrame { dropped_type: 0xF0 }.to_frame()]);
        assert!(!server.agent.sends_gzip());
    }

    #[test]
    fn test_gzip_chunks_fit_budget() {
        let body = vec![9u8; 100];
        let chunks = compress_chunks(&Reverse, &body, 30).unwrap().unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 30));
        let total: usize = chunks.iter().map(|c| c.len() - 1).sum();
        assert_eq!(total, 100);
        assert!(compress_chunks(&Reverse, &body, 1).unwrap().is_none());
    }

    #[test]
    fn test_missing_handler_is_fatal() {
        let agent = Agent::new(Role::Server, AgentConfig::default());
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        let mut hpack = HPack::default();
        let mut bytes = CONNECTION_PREFACE.to_vec();
        bytes.extend(encode(&[
            settings(&[]),
            HeadersFrame::new(1, request_block(&mut hpack, "/"), true, true).to_frame(),
        ]));
        assert!(matches!(agent.receive(&bytes), Err(Error::Internal(_))));
        assert!(wire.is_closed());
    }

    #[test]
    fn test_handler_panic_is_isolated() {
        let mut server = Server::new();
        server.agent.on_request(|_, _| panic!("handler bug"));
        server.open(1, true);
        server.open(3, true);
        assert!(!server.wire.is_closed());
    }

    #[test]
    fn test_client_request_and_response() {
        let agent = Agent::new(Role::Client, AgentConfig::default());
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&responses);
        agent.on_response(move |id, response| sink.lock().unwrap().push((id, response)));
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        assert!(wire.out.lock().unwrap().starts_with(CONNECTION_PREFACE));

        let advertised = Settings::from_frame(&wire.frames(true)[0]).unwrap();
        assert_eq!(advertised.enable_push, Some(false));

        let request = Request::builder().path("/index.html").authority("example.com").build();
        assert_eq!(agent.request(&request).unwrap(), 1);
        assert_eq!(agent.request(&request).unwrap(), 3);

        let mut hpack = HPack::default();
        let block = Bytes::from(hpack.encode([(":status", "200")]));
        agent
            .receive(&encode(&[
                settings(&[]),
                HeadersFrame::new(1, block, false, true).to_frame(),
                DataFrame::new(1, Bytes::from_static(b"<html>"), true).to_frame(),
            ]))
            .unwrap();

        let responses = responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, 1);
        assert_eq!(responses[0].1.status().code(), 200);
        assert_eq!(Message::body(&responses[0].1), b"<html>");
        assert_eq!(agent.active_streams(), 1);
    }

    #[test]
    fn test_role_misuse() {
        let agent = Agent::new(Role::Client, AgentConfig::default());
        agent.start(Box::new(Wire::default())).unwrap();
        assert!(matches!(
            agent.respond(1, &Response::new(Status::OK)),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_request_refused_after_goaway() {
        let agent = Agent::new(Role::Client, AgentConfig::default());
        agent.on_response(|_, _| {});
        let wire = Wire::default();
        agent.start(Box::new(wire.clone())).unwrap();
        let request = Request::new(Method::Get, "/");
        agent.request(&request).unwrap();
        agent
            .receive(&encode(&[
                settings(&[]),
                GoawayFrame::new(1, ErrorCode::NoError, Bytes::new()).to_frame(),
            ]))
            .unwrap();
        assert!(matches!(agent.request(&request), Err(Error::ShutDown)));
    }

    #[test]
    fn test_header_table_size_update_sent() {
        let mut server = Server::with_config(
            AgentConfig::default(),
            &[(SettingsParameter::HeaderTableSize, 256)],
        );
        server.open(1, true);
        server.agent.respond(1, &Response::new(Status::OK)).unwrap();

        let headers = &server.wire.of_type(FrameType::Headers)[0];
        // dynamic table size update prefix 001xxxxx
        assert_eq!(headers.payload[0] & 0xE0, 0x20);
    }
}
