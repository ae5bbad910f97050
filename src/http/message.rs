//! HTTP message types
//!
//! This module defines the request and response types exchanged over an
//! HTTP/2 connection. Both implement [`Message`], which is all the
//! connection needs to put one on the wire: an ordered header list with
//! pseudo-headers first, a body, and whether to pad.

use super::{Error, Headers, Result};
use std::fmt;

/// Anything that can be delivered on a stream
pub trait Message {
    /// Full header list, pseudo-headers first, names lowercased
    fn header_list(&self) -> Vec<(String, String)>;

    /// Message body
    fn body(&self) -> &[u8];

    /// Pad the final frames to a 256-byte boundary
    fn pad(&self) -> bool;
}

/// HTTP methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Any other token
    Extension(String),
}

impl Method {
    /// Parse method from string
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "CONNECT" => Method::Connect,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            _ if is_token(s) => Method::Extension(s.to_string()),
            _ => return Err(Error::InvalidMethod(s.to_string())),
        })
    }

    /// Convert method to string
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Extension(s) => s,
        }
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Parse the value of a `:status` pseudo-header
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 3 {
            return Err(Error::InvalidStatus(s.to_string()));
        }
        let code = s
            .parse::<u16>()
            .map_err(|_| Error::InvalidStatus(s.to_string()))?;
        Self::new(code)
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            421 => "Misdirected Request",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    // Common status codes as constants
    pub const OK: Status = Status { code: 200 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

fn regular_headers(headers: &Headers, out: &mut Vec<(String, String)>) {
    for (name, value) in headers.regular() {
        out.push((name.to_ascii_lowercase(), value.to_string()));
    }
}

/// HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    scheme: String,
    path: String,
    authority: Option<String>,
    headers: Headers,
    body: Vec<u8>,
    pad: bool,
}

impl Request {
    /// Create a new request for `path` over https
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            scheme: "https".to_string(),
            path: path.into(),
            authority: None,
            headers: Headers::new(),
            body: Vec::new(),
            pad: false,
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Rebuild a request from a received header list.
    ///
    /// The pseudo-headers are taken out of `headers`; the rest are kept.
    pub fn from_parts(mut headers: Headers, body: Vec<u8>) -> Result<Self> {
        let method = headers
            .take(":method")
            .ok_or_else(|| Error::InvalidHeader("missing :method".into()))?;
        let scheme = headers
            .take(":scheme")
            .ok_or_else(|| Error::InvalidHeader("missing :scheme".into()))?;
        let path = headers
            .take(":path")
            .ok_or_else(|| Error::InvalidHeader("missing :path".into()))?;
        let authority = headers.take(":authority");
        Ok(Request {
            method: Method::parse(&method)?,
            scheme,
            path,
            authority,
            headers,
            body,
            pad: false,
        })
    }

    /// Get the request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the request scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Get the request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the request authority
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Set the body
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Enable or disable padding
    pub fn set_pad(&mut self, pad: bool) {
        self.pad = pad;
    }
}

impl Message for Request {
    fn header_list(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (":method".to_string(), self.method.to_string()),
            (":scheme".to_string(), self.scheme.clone()),
            (":path".to_string(), self.path.clone()),
        ];
        if let Some(authority) = &self.authority {
            out.push((":authority".to_string(), authority.clone()));
        }
        regular_headers(&self.headers, &mut out);
        out
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn pad(&self) -> bool {
        self.pad
    }
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    scheme: Option<String>,
    path: Option<String>,
    authority: Option<String>,
    headers: Headers,
    body: Vec<u8>,
    pad: bool,
}

impl RequestBuilder {
    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Set the path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the authority
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Pad the final frames
    pub fn pad(mut self, pad: bool) -> Self {
        self.pad = pad;
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        Request {
            method: self.method.unwrap_or(Method::Get),
            scheme: self.scheme.unwrap_or_else(|| "https".to_string()),
            path: self.path.unwrap_or_else(|| "/".to_string()),
            authority: self.authority,
            headers: self.headers,
            body: self.body,
            pad: self.pad,
        }
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    headers: Headers,
    body: Vec<u8>,
    pad: bool,
}

impl Response {
    /// Create a new HTTP response
    pub fn new(status: Status) -> Self {
        Response {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            pad: false,
        }
    }

    /// Create a builder for constructing responses
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// Rebuild a response from a received header list
    pub fn from_parts(mut headers: Headers, body: Vec<u8>) -> Result<Self> {
        let status = headers
            .take(":status")
            .ok_or_else(|| Error::InvalidHeader("missing :status".into()))?;
        Ok(Response {
            status: Status::parse(&status)?,
            headers,
            body,
            pad: false,
        })
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Set the body
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Enable or disable padding
    pub fn set_pad(&mut self, pad: bool) {
        self.pad = pad;
    }
}

impl Message for Response {
    fn header_list(&self) -> Vec<(String, String)> {
        let mut out = vec![(":status".to_string(), self.status.code().to_string())];
        regular_headers(&self.headers, &mut out);
        out
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn pad(&self) -> bool {
        self.pad
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    status: Option<Status>,
    headers: Headers,
    body: Vec<u8>,
    pad: bool,
}

impl ResponseBuilder {
    /// Set the status code
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Pad the final frames
    pub fn pad(mut self, pad: bool) -> Self {
        self.pad = pad;
        self
    }

    /// Build the response
    pub fn build(self) -> Response {
        Response {
            status: self.status.unwrap_or(Status::OK),
            headers: self.headers,
            body: self.body,
            pad: self.pad,
        }
    }
}
