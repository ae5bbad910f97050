//! HTTP/2 frame encoding and decoding
//!
//! [`FrameDeserializer`] turns an arbitrarily chunked byte stream into
//! frames, buffering partial input between calls. [`FrameSerializer`] is
//! the dual. Both enforce the negotiated maximum frame size and can fan
//! out to registered [`FrameObserver`]s.

use super::error::{Error, ErrorCode, Result};
use super::frames::{Frame, FrameFlags, STREAM_ID_MASK};
use super::DEFAULT_MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest frame payload the 24-bit length field can carry (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Decoded frame header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub length: usize,
    /// Raw frame type byte
    pub type_byte: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID, reserved bit masked
    pub stream_id: u32,
}

/// Encode a frame header
pub fn encode_header(type_byte: u8, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];

    // Length (24 bits, big-endian)
    header[0] = ((length >> 16) & 0xFF) as u8;
    header[1] = ((length >> 8) & 0xFF) as u8;
    header[2] = (length & 0xFF) as u8;

    header[3] = type_byte;
    header[4] = flags.as_u8();

    // Stream ID (31 bits, big-endian, reserved bit is 0)
    header[5..9].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());

    header
}

/// Decode a frame header
pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
    let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

    // Stream ID (31 bits, ignore reserved bit)
    let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & STREAM_ID_MASK;

    FrameHeader {
        length,
        type_byte: bytes[3],
        flags: FrameFlags::from_u8(bytes[4]),
        stream_id,
    }
}

/// Receives every frame passing through a codec
pub trait FrameObserver: Send {
    /// Called once per frame, in wire order
    fn on_frame(&mut self, frame: &Frame) -> Result<()>;
}

impl<F> FrameObserver for F
where
    F: FnMut(&Frame) -> Result<()> + Send,
{
    fn on_frame(&mut self, frame: &Frame) -> Result<()> {
        self(frame)
    }
}

/// Registered observers; a fault in one is logged and does not reach the others
#[derive(Default)]
struct Observers {
    list: Vec<Box<dyn FrameObserver>>,
}

impl Observers {
    fn notify(&mut self, frame: &Frame) {
        for (index, observer) in self.list.iter_mut().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_frame(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(observer = index, error = %e, frame = %frame, "frame observer failed"),
                Err(_) => warn!(observer = index, frame = %frame, "frame observer panicked"),
            }
        }
    }
}

/// Incremental frame parser
pub struct FrameDeserializer {
    buffer: BytesMut,
    max_frame_size: usize,
    observers: Observers,
}

impl FrameDeserializer {
    /// Create a deserializer accepting frames up to the default 16384 bytes
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE as usize)
    }

    /// Create a deserializer with an explicit frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        FrameDeserializer {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
            observers: Observers::default(),
        }
    }

    /// Current frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Change the frame size limit (after our SETTINGS is acknowledged)
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size.min(MAX_FRAME_SIZE);
    }

    /// Register an observer
    pub fn subscribe(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.list.push(observer);
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes and return every frame that is now complete.
    ///
    /// An oversized frame is a connection FRAME_SIZE_ERROR; frames that
    /// preceded it in the same input are discarded with it. Use
    /// [`decode_until_error`](Self::decode_until_error) to keep them.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        match self.decode_until_error(bytes) {
            (_, Some(err)) => Err(err),
            (frames, None) => Ok(frames),
        }
    }

    /// Like [`decode`](Self::decode), but hands back the frames parsed
    /// before a framing error together with the error. The buffer is left
    /// at the offending header since the connection cannot continue.
    pub fn decode_until_error(&mut self, bytes: &[u8]) -> (Vec<Frame>, Option<Error>) {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while self.buffer.len() >= FRAME_HEADER_SIZE {
            let mut raw = [0u8; FRAME_HEADER_SIZE];
            raw.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
            let header = decode_header(&raw);

            if header.length > self.max_frame_size {
                let err = Error::connection(
                    ErrorCode::FrameSizeError,
                    format!(
                        "frame length {} exceeds maximum {}",
                        header.length, self.max_frame_size
                    ),
                );
                return (frames, Some(err));
            }
            if self.buffer.len() < FRAME_HEADER_SIZE + header.length {
                break;
            }

            self.buffer.advance(FRAME_HEADER_SIZE);
            let payload = self.buffer.split_to(header.length).freeze();
            let frame = Frame::from_raw(header.type_byte, header.flags, header.stream_id, payload);
            self.observers.notify(&frame);
            frames.push(frame);
        }
        (frames, None)
    }
}

impl Default for FrameDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame writer
pub struct FrameSerializer {
    max_frame_size: usize,
    observers: Observers,
}

impl FrameSerializer {
    /// Create a serializer using the default 16384-byte limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE as usize)
    }

    /// Create a serializer with an explicit frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        FrameSerializer {
            max_frame_size,
            observers: Observers::default(),
        }
    }

    /// Current frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Change the frame size limit (peer's SETTINGS_MAX_FRAME_SIZE)
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size.min(MAX_FRAME_SIZE);
    }

    /// Register an observer
    pub fn subscribe(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.list.push(observer);
    }

    /// Encode a frame to its wire bytes.
    ///
    /// Oversized payloads and stream ids with the reserved bit set are
    /// local faults: nothing is written.
    pub fn encode(&mut self, frame: &Frame) -> Result<Bytes> {
        if frame.payload.len() > self.max_frame_size {
            return Err(Error::Internal(format!(
                "refusing to send {}: payload exceeds maximum frame size {}",
                frame, self.max_frame_size
            )));
        }
        if frame.stream_id & !STREAM_ID_MASK != 0 {
            return Err(Error::Internal(format!(
                "stream id {:#x} has the reserved bit set",
                frame.stream_id
            )));
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_slice(&encode_header(
            frame.type_byte,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        ));
        buf.put_slice(&frame.payload);

        self.observers.notify(frame);
        Ok(buf.freeze())
    }
}

impl Default for FrameSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::{DataFrame, FrameType, PingFrame, WindowUpdateFrame};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = encode_header(FrameType::Headers.as_u8(), flags, 42, 1234);
        let decoded = decode_header(&header);

        assert_eq!(decoded.type_byte, FrameType::Headers.as_u8());
        assert_eq!(decoded.flags, flags);
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.length, 1234);
    }

    #[test]
    fn test_decode_header_masks_reserved_bit() {
        let raw = [0, 0, 0, 0, 0, 0x80, 0, 0, 1];
        assert_eq!(decode_header(&raw).stream_id, 1);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true).to_frame();
        let encoded = FrameSerializer::new().encode(&frame).unwrap();

        // Check frame header
        assert_eq!(encoded[0..3], [0, 0, 5]); // Length = 5
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]); // Stream ID = 1

        // Check payload
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_data_frame_with_padding() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10).to_frame();
        let encoded = FrameSerializer::new().encode(&frame).unwrap();

        // Length should be: 1 (pad length) + 2 (data) + 10 (padding) = 13
        assert_eq!(encoded[0..3], [0, 0, 13]);
        assert_eq!(encoded[4] & FrameFlags::PADDED, FrameFlags::PADDED);
        assert_eq!(encoded[9], 10);
        assert_eq!(&encoded[10..12], b"Hi");
        assert_eq!(&encoded[12..22], &[0u8; 10]);
    }

    #[test]
    fn test_encode_window_update() {
        let frame = WindowUpdateFrame::new(42, 1000).to_frame();
        let encoded = FrameSerializer::new().encode(&frame).unwrap();

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);

        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }

    #[test]
    fn test_serializer_rejects_oversize_and_reserved_bit() {
        let mut serializer = FrameSerializer::with_max_frame_size(4);
        let frame = Frame::new(FrameType::Data, FrameFlags::empty(), 1, Bytes::from_static(b"12345"));
        assert!(matches!(serializer.encode(&frame), Err(Error::Internal(_))));

        let frame = Frame::new(FrameType::Data, FrameFlags::empty(), 0x8000_0001, Bytes::new());
        assert!(matches!(serializer.encode(&frame), Err(Error::Internal(_))));
    }

    #[test]
    fn test_decode_partial_input() {
        let wire = FrameSerializer::new()
            .encode(&PingFrame::new([1, 2, 3, 4, 5, 6, 7, 8]).to_frame())
            .unwrap();

        let mut deserializer = FrameDeserializer::new();
        assert!(deserializer.decode(&wire[..5]).unwrap().is_empty());
        assert!(deserializer.decode(&wire[5..12]).unwrap().is_empty());
        assert_eq!(deserializer.buffered(), 12);

        let frames = deserializer.decode(&wire[12..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is(FrameType::Ping));
        assert_eq!(&frames[0].payload[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(deserializer.buffered(), 0);
    }

    #[test]
    fn test_decode_multiple_frames_in_one_chunk() {
        let mut serializer = FrameSerializer::new();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&serializer.encode(&DataFrame::new(1, Bytes::from("a"), false).to_frame()).unwrap());
        wire.extend_from_slice(&serializer.encode(&DataFrame::new(1, Bytes::from("b"), true).to_frame()).unwrap());
        wire.extend_from_slice(&[0, 0]); // start of a third header

        let mut deserializer = FrameDeserializer::new();
        let frames = deserializer.decode(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].flags.is_end_stream());
        assert_eq!(deserializer.buffered(), 2);
    }

    #[test]
    fn test_decode_rejects_oversize_frame() {
        let header = encode_header(FrameType::Data.as_u8(), FrameFlags::empty(), 1, 16385);
        let err = FrameDeserializer::new().decode(&header).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn test_frames_before_oversize_header_are_kept() {
        let mut wire = BytesMut::new();
        let ping = PingFrame::new(*b"pingpong").to_frame();
        wire.extend_from_slice(&FrameSerializer::new().encode(&ping).unwrap());
        wire.extend_from_slice(&encode_header(FrameType::Data.as_u8(), FrameFlags::empty(), 1, 16385));

        let mut deserializer = FrameDeserializer::new();
        let (frames, err) = deserializer.decode_until_error(&wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is(FrameType::Ping));
        assert_eq!(err.unwrap().code(), Some(ErrorCode::FrameSizeError));
        assert_eq!(deserializer.buffered(), FRAME_HEADER_SIZE);

        let err = FrameDeserializer::new().decode(&wire).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn test_observer_fault_is_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut deserializer = FrameDeserializer::new();

        deserializer.subscribe(Box::new(|_: &Frame| -> Result<()> {
            Err(Error::Internal("observer bug".into()))
        }));
        deserializer.subscribe(Box::new(|_: &Frame| -> Result<()> { panic!("observer panic") }));
        let sink = Arc::clone(&seen);
        deserializer.subscribe(Box::new(move |frame: &Frame| -> Result<()> {
            sink.lock().unwrap().push(frame.stream_id);
            Ok(())
        }));

        let wire = FrameSerializer::new()
            .encode(&DataFrame::new(7, Bytes::from("x"), true).to_frame())
            .unwrap();
        let frames = deserializer.decode(&wire).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
