//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6,
//! plus the two extension frames used to negotiate compressed DATA.
//!
//! [`Frame`] is the raw wire unit. The typed structs below build a
//! [`Frame`] with `to_frame()` and interpret one with `parse()`.

use super::error::{Error, ErrorCode, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Reserved high bit of a stream identifier
pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
    /// GZIPPED_DATA frame (0xF0) - DATA whose payload is compressed
    GzippedData = 0xF0,
    /// DROPPED_FRAME frame (0xF1) - Tells the peer an extension frame type was ignored
    DroppedFrame = 0xF1,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            0xF0 => Some(FrameType::GzippedData),
            0xF1 => Some(FrameType::DroppedFrame),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
            FrameType::GzippedData => "GZIPPED_DATA",
            FrameType::DroppedFrame => "DROPPED_FRAME",
        }
    }

    /// DATA-class frames consume flow-control credit
    pub fn is_flow_controlled(&self) -> bool {
        matches!(self, FrameType::Data | FrameType::GzippedData)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear a flag
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    // Common flags

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Generic HTTP/2 frame
///
/// The type is kept as the raw byte so that frames of unknown extension
/// types survive decoding and can be reported back to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame type byte
    pub type_byte: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: u32,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Self::from_raw(frame_type.as_u8(), flags, stream_id, payload)
    }

    /// Create a frame from a raw type byte
    pub fn from_raw(type_byte: u8, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            type_byte,
            flags,
            stream_id,
            payload,
        }
    }

    /// Known frame type, if any
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.type_byte)
    }

    /// True if this frame has the given type
    pub fn is(&self, frame_type: FrameType) -> bool {
        self.type_byte == frame_type.as_u8()
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Append a header block fragment from a CONTINUATION frame
    pub fn append_payload(&mut self, fragment: &[u8]) {
        let mut buf = BytesMut::with_capacity(self.payload.len() + fragment.len());
        buf.put_slice(&self.payload);
        buf.put_slice(fragment);
        self.payload = buf.freeze();
    }

    /// Human-readable type for logs
    pub fn type_name(&self) -> String {
        match self.frame_type() {
            Some(t) => t.name().to_string(),
            None => format!("UNKNOWN(0x{:x})", self.type_byte),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stream={} flags=0x{:x} len={}",
            self.type_name(),
            self.stream_id,
            self.flags.as_u8(),
            self.payload.len()
        )
    }
}

/// Remove the pad-length byte and trailing padding of a PADDED frame.
///
/// A pad length reaching past the end of the payload is a connection error.
pub fn strip_padding(frame: &Frame) -> Result<Bytes> {
    if !frame.flags.is_padded() {
        return Ok(frame.payload.clone());
    }
    if frame.payload.is_empty() {
        return Err(Error::connection(
            ErrorCode::ProtocolError,
            "PADDED frame without pad length",
        ));
    }
    let pad_len = frame.payload[0] as usize;
    let body_len = frame.payload.len() - 1;
    if pad_len > body_len {
        return Err(Error::connection(
            ErrorCode::ProtocolError,
            format!("pad length {} exceeds payload of {}", pad_len, body_len),
        ));
    }
    Ok(frame.payload.slice(1..1 + body_len - pad_len))
}

fn pad_payload(body: &[u8], padding: Option<u8>) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 256);
    if let Some(pad_len) = padding {
        buf.put_u8(pad_len);
        buf.put_slice(body);
        buf.put_bytes(0, pad_len as usize);
    } else {
        buf.put_slice(body);
    }
    buf.freeze()
}

/// DATA frame (RFC 7540 Section 6.1)
///
/// Also used for GZIPPED_DATA, which shares the layout.
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Get total frame size including padding
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize; // 1 byte for pad length field + padding
        }
        size
    }

    /// Build a DATA frame
    pub fn to_frame(&self) -> Frame {
        self.to_frame_as(FrameType::Data)
    }

    /// Build a GZIPPED_DATA frame; `data` must already be compressed
    pub fn to_gzipped_frame(&self) -> Frame {
        self.to_frame_as(FrameType::GzippedData)
    }

    fn to_frame_as(&self, frame_type: FrameType) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if self.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }
        Frame::new(
            frame_type,
            flags,
            self.stream_id,
            pad_payload(&self.data, self.padding),
        )
    }

    /// Interpret a DATA or GZIPPED_DATA frame, stripping any padding
    pub fn parse(frame: &Frame) -> Result<Self> {
        let data = strip_padding(frame)?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding: if frame.flags.is_padded() {
                Some(frame.payload[0])
            } else {
                None
            },
        })
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if self.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        let mut body = BytesMut::with_capacity(self.header_block.len() + 5);
        if let Some(priority) = &self.priority {
            flags.set(FrameFlags::PRIORITY);
            priority.encode(&mut body);
        }
        body.put_slice(&self.header_block);
        if self.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }
        Frame::new(
            FrameType::Headers,
            flags,
            self.stream_id,
            pad_payload(&body, self.padding),
        )
    }

    /// Interpret a (reassembled) HEADERS frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut block = strip_padding(frame)?;
        let priority = if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::connection(
                    ErrorCode::FrameSizeError,
                    "HEADERS too short for priority fields",
                ));
            }
            let spec = PrioritySpec::decode(&block[..5]);
            block.advance(5);
            Some(spec)
        } else {
            None
        };
        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding: None,
        })
    }
}

/// Priority specification (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: u32,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight (1-256)
    pub weight: u16,
}

impl PrioritySpec {
    /// Create a new priority specification
    pub fn new(stream_dependency: u32, exclusive: bool, weight: u16) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    /// Decode the 5-byte wire form; the weight byte is stored minus one
    pub fn decode(bytes: &[u8]) -> Self {
        let dep = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        PrioritySpec {
            stream_dependency: dep & STREAM_ID_MASK,
            exclusive: dep & 0x8000_0000 != 0,
            weight: bytes[4] as u16 + 1,
        }
    }

    /// Encode the 5-byte wire form
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut dep = self.stream_dependency & STREAM_ID_MASK;
        if self.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(self.weight.clamp(1, 256).saturating_sub(1) as u8);
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Priority specification
    pub priority: PrioritySpec,
}

impl PriorityFrame {
    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(5);
        self.priority.encode(&mut buf);
        Frame::new(FrameType::Priority, FrameFlags::empty(), self.stream_id, buf.freeze())
    }

    /// Interpret a PRIORITY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "PRIORITY on stream 0",
            ));
        }
        if frame.payload.len() != 5 {
            return Err(Error::stream(
                frame.stream_id,
                ErrorCode::FrameSizeError,
                "PRIORITY payload must be 5 bytes",
            ));
        }
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: PrioritySpec::decode(&frame.payload),
        })
    }
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Raw error code; unknown codes are kept as received
    pub error_code: u32,
}

impl RstStreamFrame {
    /// Create a new RST_STREAM frame
    pub fn new(stream_id: u32, code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code: code.as_u32(),
        }
    }

    /// Known error code, if any
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u32(self.error_code)
    }

    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.error_code);
        Frame::new(FrameType::RstStream, FrameFlags::empty(), self.stream_id, buf.freeze())
    }

    /// Interpret a RST_STREAM frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "RST_STREAM on stream 0",
            ));
        }
        if frame.payload.len() != 4 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "RST_STREAM payload must be 4 bytes",
            ));
        }
        let mut payload = frame.payload.clone();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: payload.get_u32(),
        })
    }
}

/// PUSH_PROMISE frame (RFC 7540 Section 6.6)
#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Promised stream ID
    pub promised_stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl PushPromiseFrame {
    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut flags = FrameFlags::empty();
        if self.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if self.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }
        let mut body = BytesMut::with_capacity(4 + self.header_block.len());
        body.put_u32(self.promised_stream_id & STREAM_ID_MASK);
        body.put_slice(&self.header_block);
        Frame::new(
            FrameType::PushPromise,
            flags,
            self.stream_id,
            pad_payload(&body, self.padding),
        )
    }

    /// Interpret a (reassembled) PUSH_PROMISE frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut block = strip_padding(frame)?;
        if block.len() < 4 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "PUSH_PROMISE too short",
            ));
        }
        let promised_stream_id = block.get_u32() & STREAM_ID_MASK;
        Ok(PushPromiseFrame {
            stream_id: frame.stream_id,
            promised_stream_id,
            header_block: block,
            end_headers: frame.flags.is_end_headers(),
            padding: None,
        })
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let flags = if self.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };
        Frame::new(FrameType::Ping, flags, 0, Bytes::copy_from_slice(&self.data))
    }

    /// Interpret a PING frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "PING on non-zero stream",
            ));
        }
        if frame.payload.len() != 8 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "PING payload must be 8 bytes",
            ));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload);
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: u32,
    /// Raw error code
    pub error_code: u32,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code: error_code.as_u32(),
            debug_data,
        }
    }

    /// Known error code, if any
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u32(self.error_code)
    }

    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(8 + self.debug_data.len());
        buf.put_u32(self.last_stream_id & STREAM_ID_MASK);
        buf.put_u32(self.error_code);
        buf.put_slice(&self.debug_data);
        Frame::new(FrameType::Goaway, FrameFlags::empty(), 0, buf.freeze())
    }

    /// Interpret a GOAWAY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "GOAWAY on non-zero stream",
            ));
        }
        if frame.payload.len() < 8 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "GOAWAY payload shorter than 8 bytes",
            ));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
        let error_code = payload.get_u32();
        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self.size_increment & STREAM_ID_MASK);
        Frame::new(FrameType::WindowUpdate, FrameFlags::empty(), self.stream_id, buf.freeze())
    }

    /// Interpret a WINDOW_UPDATE frame. A zero increment is left to the
    /// caller, since its error scope depends on the stream.
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.payload.len() != 4 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "WINDOW_UPDATE payload must be 4 bytes",
            ));
        }
        let mut payload = frame.payload.clone();
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id,
            size_increment: payload.get_u32() & STREAM_ID_MASK,
        })
    }
}

/// DROPPED_FRAME frame: names an extension frame type the sender ignored
#[derive(Debug, Clone, Copy)]
pub struct DroppedFrame {
    /// Type byte of the ignored frame
    pub dropped_type: u8,
}

impl DroppedFrame {
    /// Build the wire frame
    pub fn to_frame(&self) -> Frame {
        Frame::new(
            FrameType::DroppedFrame,
            FrameFlags::empty(),
            0,
            Bytes::copy_from_slice(&[self.dropped_type]),
        )
    }

    /// Interpret a DROPPED_FRAME frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "DROPPED_FRAME on non-zero stream",
            ));
        }
        if frame.payload.len() != 1 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                "DROPPED_FRAME payload must be 1 byte",
            ));
        }
        Ok(DroppedFrame {
            dropped_type: frame.payload[0],
        })
    }
}
