//! HTTP/2 server
//!
//! [`H2Server`] runs a server-role [`Agent`] for one accepted connection.
//! Requests reach the handler on the reader thread; responses and pushes
//! may be sent from the handler itself or from any other thread.

use super::agent::{Agent, AgentConfig, PayloadCodec, Role};
use super::client::{join_reader, spawn_reader};
use super::error::{Error, Result};
use super::hpack::IndexPolicy;
use super::stream::StreamId;
use crate::http::{Request, Response, Transport};
use std::sync::Arc;
use std::thread::JoinHandle;

/// HTTP/2 server connection
pub struct H2Server {
    agent: Arc<Agent>,
    reader: Option<JoinHandle<Result<()>>>,
}

impl H2Server {
    /// Serve `transport` with default settings
    pub fn accept(transport: Box<dyn Transport>) -> Result<Self> {
        H2ServerBuilder::new().accept(transport)
    }

    /// Start the reader thread on `transport`
    pub fn serve(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.reader.is_some() {
            return Err(Error::Internal("server is already running".into()));
        }
        self.reader = Some(spawn_reader(&self.agent, transport)?);
        Ok(())
    }

    /// Send the response for a request stream
    pub fn respond(&self, stream_id: StreamId, response: &Response) -> Result<()> {
        self.agent.respond(stream_id, response)
    }

    /// Push `response` for `request` on a stream promised on `parent`
    pub fn push(&self, parent: StreamId, request: &Request, response: &Response) -> Result<StreamId> {
        self.agent.push(parent, request, response)
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

    /// Wait for the connection to end
    pub fn join(mut self) -> Result<()> {
        join_reader(self.reader.take())
    }
}

/// HTTP/2 server builder
pub struct H2ServerBuilder {
    config: AgentConfig,
    on_request: Option<Box<dyn FnMut(StreamId, Request) + Send>>,
    on_cancel: Option<Box<dyn FnMut(StreamId, u32) + Send>>,
}

impl H2ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        H2ServerBuilder {
            config: AgentConfig::default(),
            on_request: None,
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

    /// Limit how many streams the client may have open
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = Some(max);
        self
    }

    /// Set the HPACK indexing policy for responses
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

    /// Compress response bodies when the client accepts it
    pub fn send_gzip(mut self, send: bool) -> Self {
        self.config.send_gzip = send;
        self
    }

    /// Pad every response
    pub fn pad(mut self, pad: bool) -> Self {
        self.config.pad = pad;
        self
    }

    /// Handle complete requests
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: FnMut(StreamId, Request) + Send + 'static,
    {
        self.on_request = Some(Box::new(handler));
        self
    }

    /// Handle streams reset by the client
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

    /// Create the server without starting it, so handlers can capture
    /// its agent before the first request arrives
    pub fn build(self) -> Result<H2Server> {
        self.config.validate()?;
        let agent = Arc::new(Agent::new(Role::Server, self.config));
        if let Some(handler) = self.on_request {
            agent.on_request(handler);
        }
        if let Some(handler) = self.on_cancel {
            agent.on_cancel(handler);
        }
        Ok(H2Server {
            agent,
            reader: None,
        })
    }

    /// Start serving `transport`
    pub fn accept(self, transport: Box<dyn Transport>) -> Result<H2Server> {
        let mut server = self.build()?;
        server.serve(transport)?;
        Ok(server)
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
