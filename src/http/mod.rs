//! HTTP messages and transports for h2engine
//!
//! This module holds the protocol-independent pieces the HTTP/2 engine in
//! [`h2`] builds on: header lists, request/response messages and the
//! transport abstraction.
//!
//! # Architecture
//!
//! The connection engine never touches sockets directly:
//!
//! - [`Transport`] defines the operations (read, write, shutdown, clone)
//! - [`TcpTransport`] implements them for plain TCP
//! - Any other duplex stream (TLS, in-memory pipes) plugs in the same way
//!
//! # Examples
//!
//! ```
//! use h2engine::http::{Message, Method, Request};
//!
//! let request = Request::builder()
//!     .method(Method::Post)
//!     .path("/upload")
//!     .authority("example.com")
//!     .header("content-type", "text/plain")
//!     .body("hello")
//!     .build();
//!
//! assert_eq!(request.header_list()[0], (":method".to_string(), "POST".to_string()));
//! assert_eq!(request.body(), b"hello");
//! ```

pub mod h2;
pub mod headers;
pub mod message;
pub mod session;

pub use headers::Headers;
pub use message::{Message, Method, Request, RequestBuilder, Response, ResponseBuilder, Status};
pub use session::{PeerDescriptor, TcpTransport, Transport};

/// Result type for message operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message construction errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
