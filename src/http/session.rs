//! Transport abstraction
//!
//! An HTTP/2 connection runs over any duplex byte stream. [`Transport`]
//! is the only thing the connection knows about it: blocking reads and
//! writes, shutdown, a second handle for the writer side, and a
//! [`PeerDescriptor`] for log lines. Plain TCP and TLS sessions look the
//! same from here.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Duplex byte stream carrying one connection
pub trait Transport: Send {
    /// Read available bytes; `Ok(0)` means the peer closed
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write every byte or fail
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Shut down both directions
    fn shutdown(&mut self) -> io::Result<()>;

    /// Describe the remote end for logging
    fn peer(&self) -> PeerDescriptor;

    /// Second handle onto the same stream, used as the write half
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Printable identity of the remote end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor(String);

impl PeerDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        PeerDescriptor(description.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Plain TCP transport
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }

    /// Set the read timeout; `None` blocks indefinitely
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // already closed by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer(&self) -> PeerDescriptor {
        match self.stream.peer_addr() {
            Ok(addr) => PeerDescriptor::new(addr.to_string()),
            Err(_) => PeerDescriptor::new("<unconnected>"),
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::new(self.stream.try_clone()?)))
    }
}

impl From<TcpStream> for TcpTransport {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}
