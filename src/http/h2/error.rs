//! HTTP/2 error types
//!
//! This module defines error types for HTTP/2 operations, mapping to
//! the error codes defined in RFC 7540 Section 7.
//!
//! Peer misbehaviour is reported as either a connection error (answered
//! with GOAWAY) or a stream error (answered with RST_STREAM). Everything
//! else is a local fault and is never translated into a wire error.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection-fatal protocol error (RFC 7540 Section 5.4.1)
    #[error("Connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Stream-scoped protocol error (RFC 7540 Section 5.4.2)
    #[error("Stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// Local programming fault (state machine precondition, missing handler)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation attempted after the connection was shut down locally
    #[error("Connection shut down")]
    ShutDown,

    /// Peer's SETTINGS_MAX_CONCURRENT_STREAMS reached
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),
}

impl Error {
    /// Build a connection error
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Connection {
            code,
            reason: reason.into(),
        }
    }

    /// Build a stream error
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// Wire error code, for errors that are sent to the peer
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Connection { code, .. } | Error::Stream { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for connection-fatal protocol errors
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// True for stream-scoped protocol errors
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Error::Stream { .. })
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
    /// Compressed payload could not be decoded (non-standard)
    DataEncodingError = 0xf000_0000,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            0xf000_0000 => Some(ErrorCode::DataEncodingError),
            _ => None,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
            ErrorCode::DataEncodingError => "DATA_ENCODING_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::ProtocolError.as_u32(), 0x1);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);
        assert_eq!(ErrorCode::DataEncodingError.as_u32(), 0xf000_0000);

        assert_eq!(ErrorCode::from_u32(0x0), Some(ErrorCode::NoError));
        assert_eq!(ErrorCode::from_u32(0x6), Some(ErrorCode::FrameSizeError));
        assert_eq!(ErrorCode::from_u32(0xf000_0000), Some(ErrorCode::DataEncodingError));
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_error_code_name() {
        assert_eq!(ErrorCode::NoError.name(), "NO_ERROR");
        assert_eq!(ErrorCode::FlowControlError.name(), "FLOW_CONTROL_ERROR");
        assert_eq!(ErrorCode::DataEncodingError.name(), "DATA_ENCODING_ERROR");
    }

    #[test]
    fn test_error_classification() {
        let err = Error::connection(ErrorCode::FrameSizeError, "too big");
        assert!(err.is_connection_error());
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));

        let err = Error::stream(3, ErrorCode::StreamClosed, "closed");
        assert!(err.is_stream_error());
        assert_eq!(err.code(), Some(ErrorCode::StreamClosed));

        assert_eq!(Error::Internal("bug".into()).code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::stream(42, ErrorCode::StreamClosed, "DATA after END_STREAM");
        assert_eq!(
            err.to_string(),
            "Stream 42 error STREAM_CLOSED (0x5): DATA after END_STREAM"
        );

        let err = Error::Internal("test error".to_string());
        assert_eq!(err.to_string(), "Internal error: test error");
    }
}
