//! HTTP/2 settings management
//!
//! This module implements HTTP/2 SETTINGS frames and parameters
//! as defined in RFC 7540 Section 6.5, plus the ACCEPT_GZIPPED_DATA
//! extension setting.

use super::error::{Error, ErrorCode, Result};
use super::frames::{Frame, FrameFlags, FrameType};
use super::flow_control::MAX_WINDOW_SIZE;
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::trace;

/// Smallest legal SETTINGS_MAX_FRAME_SIZE (2^14)
pub const MIN_MAX_FRAME_SIZE: u32 = 0x4000;

/// Largest legal SETTINGS_MAX_FRAME_SIZE (2^24 - 1)
pub const MAX_MAX_FRAME_SIZE: u32 = 0xFF_FFFF;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    /// Allows the sender to inform the remote endpoint of the maximum size
    /// of the header compression table
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    /// Used to disable server push
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    /// Indicates the maximum number of concurrent streams
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    /// Indicates the sender's initial window size for stream-level flow control
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    /// Indicates the size of the largest frame payload
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    /// Advises peer of the maximum size of header list
    MaxHeaderListSize = 0x6,

    /// SETTINGS_ACCEPT_GZIPPED_DATA (0xF000)
    /// Whether the sender accepts GZIPPED_DATA frames
    AcceptGzippedData = 0xF000,
}

impl SettingsParameter {
    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            0xF000 => Some(SettingsParameter::AcceptGzippedData),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
            SettingsParameter::AcceptGzippedData => "ACCEPT_GZIPPED_DATA",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// Only the values present in a SETTINGS frame are `Some`; the `get_*`
/// accessors fill in the protocol defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: Option<u32>,

    /// Enable server push (default: true)
    pub enable_push: Option<bool>,

    /// Maximum concurrent streams (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535)
    pub initial_window_size: Option<u32>,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: Option<u32>,

    /// Maximum header list size (default: unlimited, advisory)
    pub max_header_list_size: Option<u32>,

    /// Accept GZIPPED_DATA frames (default: false)
    pub accept_gzipped_data: Option<bool>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Get header table size (with default)
    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Get enable push (with default)
    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// Get max concurrent streams (None = unlimited)
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Get initial window size (with default)
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Get max frame size (with default)
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Get max header list size (None = unlimited)
    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Get accept gzipped data (with default)
    pub fn get_accept_gzipped_data(&self) -> bool {
        self.accept_gzipped_data.unwrap_or(false)
    }

    /// True if no parameter is set
    pub fn is_empty(&self) -> bool {
        *self == Settings::default()
    }

    /// Set one parameter from its wire form.
    ///
    /// Out-of-range values are connection errors with the code RFC 7540
    /// assigns; unknown identifiers are ignored.
    pub fn set_raw(&mut self, id: u16, value: u32) -> Result<()> {
        let Some(parameter) = SettingsParameter::from_u16(id) else {
            trace!(id, value, "ignoring unknown setting");
            return Ok(());
        };
        match parameter {
            SettingsParameter::HeaderTableSize => self.header_table_size = Some(value),
            SettingsParameter::EnablePush => self.enable_push = Some(flag(parameter, value)?),
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingsParameter::InitialWindowSize => {
                if value as i64 > MAX_WINDOW_SIZE {
                    return Err(Error::connection(
                        ErrorCode::FlowControlError,
                        format!("INITIAL_WINDOW_SIZE too large {}", value),
                    ));
                }
                self.initial_window_size = Some(value);
            }
            SettingsParameter::MaxFrameSize => {
                if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(Error::connection(
                        ErrorCode::ProtocolError,
                        format!("MAX_FRAME_SIZE out of bounds {}", value),
                    ));
                }
                self.max_frame_size = Some(value);
            }
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = Some(value),
            SettingsParameter::AcceptGzippedData => {
                self.accept_gzipped_data = Some(flag(parameter, value)?)
            }
        }
        Ok(())
    }

    /// Parameters that are set, in identifier order
    pub fn pairs(&self) -> Vec<(SettingsParameter, u32)> {
        let mut pairs = Vec::new();
        let mut push = |p, v: Option<u32>| {
            if let Some(v) = v {
                pairs.push((p, v));
            }
        };
        push(SettingsParameter::HeaderTableSize, self.header_table_size);
        push(SettingsParameter::EnablePush, self.enable_push.map(u32::from));
        push(SettingsParameter::MaxConcurrentStreams, self.max_concurrent_streams);
        push(SettingsParameter::InitialWindowSize, self.initial_window_size);
        push(SettingsParameter::MaxFrameSize, self.max_frame_size);
        push(SettingsParameter::MaxHeaderListSize, self.max_header_list_size);
        push(SettingsParameter::AcceptGzippedData, self.accept_gzipped_data.map(u32::from));
        pairs
    }

    /// Encode as a SETTINGS payload of 6-byte (id, value) pairs
    pub fn encode(&self) -> Bytes {
        let pairs = self.pairs();
        let mut buf = BytesMut::with_capacity(pairs.len() * 6);
        for (parameter, value) in pairs {
            buf.put_u16(parameter.as_u16());
            buf.put_u32(value);
        }
        buf.freeze()
    }

    /// Build a SETTINGS frame carrying these values
    pub fn to_frame(&self) -> Frame {
        Frame::new(FrameType::Settings, FrameFlags::empty(), 0, self.encode())
    }

    /// Build an empty SETTINGS frame with ACK set
    pub fn ack_frame() -> Frame {
        Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            Bytes::new(),
        )
    }

    /// Split a SETTINGS payload into raw (id, value) pairs
    pub fn decode_pairs(payload: &[u8]) -> Result<Vec<(u16, u32)>> {
        if payload.len() % 6 != 0 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                format!("SETTINGS payload of {} bytes is not a multiple of 6", payload.len()),
            ));
        }
        Ok(payload
            .chunks_exact(6)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                )
            })
            .collect())
    }

    /// Interpret a non-ACK SETTINGS frame
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("SETTINGS must be sent on stream 0, received {}", frame.stream_id),
            ));
        }
        let mut settings = Settings::new();
        for (id, value) in Self::decode_pairs(&frame.payload)? {
            settings.set_raw(id, value)?;
        }
        Ok(settings)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        // Validate SETTINGS_INITIAL_WINDOW_SIZE (max 2^31-1)
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size as i64 > MAX_WINDOW_SIZE {
                return Err(Error::InvalidSettings(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        // Validate SETTINGS_MAX_FRAME_SIZE (16384 to 16777215)
        if let Some(max_frame_size) = self.max_frame_size {
            if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&max_frame_size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }
}

fn flag(parameter: SettingsParameter, value: u32) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::connection(
            ErrorCode::ProtocolError,
            format!("{} must be 0 or 1, received {}", parameter.name(), value),
        )),
    }
}

/// Builder for HTTP/2 settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Set accept gzipped data
    pub fn accept_gzipped_data(mut self, accept: bool) -> Self {
        self.settings.accept_gzipped_data = Some(accept);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
