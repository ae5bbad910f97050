//! HTTP/2 client
//!
//! [`H2Client`] runs a client-role [`Agent`] on a dedicated reader thread.
//! Requests are sent from any thread; responses arrive on the reader
//! thread through the handler given to the builder.

use super::agent::{Agent, AgentConfig, PayloadCodec, Role};
use super::error::{Error, Result};
use super::hpack::IndexPolicy;
use super::stream::StreamId;
use crate::http::{Request, Response, Transport};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// HTTP/2 client connection
pub struct H2Client {
    agent: Arc<Agent>,
    reader: Option<JoinHandle<Result<()>>>,
}

impl H2Client {
    /// Connect over `transport` with default settings
    pub fn connect(transport: Box<dyn Transport>) -> Result<Self> {
        H2ClientBuilder::new().connect(transport)
    }

    /// Send a request on a new stream; returns its id
    pub fn request(&self, request: &Request) -> Result<StreamId> {
        self.agent.request(request)
    }

    /// Send a PING; `None` sends the current time
    pub fn ping(&self, payload: Option<&[u8]>) -> Result<()> {
        self.agent.ping(payload)
    }

    /// Send GOAWAY and close the connection
    pub fn shut_down(&self) -> Result<()> {
        self.agent.shut_down()
    }

    pub fn accept_gzip(&self) -> Result<()> {
        self.agent.accept_gzip()
    }

    pub fn no_accept_gzip(&self) -> Result<()> {
        self.agent.no_accept_gzip()
    }

    pub fn send_gzip(&self) -> Result<()> {
        self.agent.send_gzip()
    }

    pub fn no_send_gzip(&self) -> Result<()> {
        self.agent.no_send_gzip()
    }

    /// The underlying connection agent
    pub fn agent(&self) -> Arc<Agent> {
        Arc::clone(&self.agent)
    }

    /// Wait for the reader thread to finish
    pub fn join(mut self) -> Result<()> {
        join_reader(self.reader.take())
    }
}

pub(crate) fn join_reader(reader: Option<JoinHandle<Result<()>>>) -> Result<()> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| Error::Internal("reader thread panicked".into()))?,
        None => Ok(()),
    }
}

/// Start `agent` on a named reader thread
pub(crate) fn spawn_reader(agent: &Arc<Agent>, transport: Box<dyn Transport>) -> Result<JoinHandle<Result<()>>> {
    let name = format!("h2-{}-{}", agent.role(), transport.peer());
    debug!(thread = %name, "starting reader");
    let runner = Arc::clone(agent);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || runner.run(transport))?;
    Ok(handle)
}

/// HTTP/2 client builder
pub struct H2ClientBuilder {
    config: AgentConfig,
    on_response: Option<Box<dyn FnMut(StreamId, Response) + Send>>,
    on_cancel: Option<Box<dyn FnMut(StreamId, u32) + Send>>,
}

impl H2ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        H2ClientBuilder {
            config: AgentConfig::default(),
            on_response: None,
            on_cancel: None,
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = Some(max);
        self
    }

    /// Set the HPACK indexing policy for requests
    pub fn index_policy(mut self, policy: IndexPolicy) -> Self {
        self.config.index_policy = policy;
        self
    }

    /// Use `codec` for GZIPPED_DATA frames
    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.config.codec = Some(codec);
        self
    }

    /// Advertise acceptance of GZIPPED_DATA
    pub fn accept_gzip(mut self, accept: bool) -> Self {
        self.config.accept_gzip = accept;
        self
    }

    /// Compress request bodies when the server accepts it
    pub fn send_gzip(mut self, send: bool) -> Self {
        self.config.send_gzip = send;
        self
    }

    /// Pad every request
    pub fn pad(mut self, pad: bool) -> Self {
        self.config.pad = pad;
        self
    }

    /// Handle complete responses
    pub fn on_response<F>(mut self, handler: F) -> Self
    where
        F: FnMut(StreamId, Response) + Send + 'static,
    {
        self.on_response = Some(Box::new(handler));
        self
    }

    /// Handle streams reset by the server
    pub fn on_cancel<F>(mut self, handler: F) -> Self
    where
        F: FnMut(StreamId, u32) + Send + 'static,
    {
        self.on_cancel = Some(Box::new(handler));
        self
    }

    /// The configuration the agent will be created with
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start the connection over `transport`
    pub fn connect(self, transport: Box<dyn Transport>) -> Result<H2Client> {
        self.config.validate()?;
        let agent = Arc::new(Agent::new(Role::Client, self.config));
        if let Some(handler) = self.on_response {
            agent.on_response(handler);
        }
        if let Some(handler) = self.on_cancel {
            agent.on_cancel(handler);
        }
        let reader = spawn_reader(&agent, transport)?;
        Ok(H2Client {
            agent,
            reader: Some(reader),
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
