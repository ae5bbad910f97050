//! Header block reassembly
//!
//! HEADERS and PUSH_PROMISE frames may be followed by CONTINUATION frames
//! carrying the rest of the header block. [`HeadersHook`] folds such a
//! sequence back into a single frame with END_HEADERS set, so the rest of
//! the connection only ever sees complete header blocks.

use super::error::{Error, ErrorCode, Result};
use super::frames::{strip_padding, Frame, FrameFlags, FrameType};

/// CONTINUATION reassembler
#[derive(Debug, Default)]
pub struct HeadersHook {
    pending: Option<Frame>,
}

impl HeadersHook {
    /// Create an idle reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a header block is incomplete
    pub fn is_accumulating(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one frame.
    ///
    /// Returns the frame to dispatch, or `None` while a header block is
    /// still being collected. Anything other than a CONTINUATION for the
    /// same stream while collecting is a connection PROTOCOL_ERROR.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>> {
        if let Some(mut pending) = self.pending.take() {
            if !frame.is(FrameType::Continuation) {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!("expected CONTINUATION, got {}", frame.type_name()),
                ));
            }
            if frame.stream_id != pending.stream_id {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!(
                        "CONTINUATION for stream {} while stream {} is open",
                        frame.stream_id, pending.stream_id
                    ),
                ));
            }
            pending.append_payload(&frame.payload);
            if frame.flags.is_end_headers() {
                pending.flags.set(FrameFlags::END_HEADERS);
                return Ok(Some(pending));
            }
            self.pending = Some(pending);
            return Ok(None);
        }

        match frame.frame_type() {
            Some(FrameType::Headers) | Some(FrameType::PushPromise) => {
                // Padding belongs to the first frame only; drop it before
                // fragments are appended behind it.
                let frame = unpad(frame)?;
                if frame.flags.is_end_headers() {
                    return Ok(Some(frame));
                }
                self.pending = Some(frame);
                Ok(None)
            }
            Some(FrameType::Continuation) => Err(Error::connection(
                ErrorCode::ProtocolError,
                "CONTINUATION without a preceding HEADERS",
            )),
            _ => Ok(Some(frame)),
        }
    }
}

fn unpad(mut frame: Frame) -> Result<Frame> {
    if frame.flags.is_padded() {
        frame.payload = strip_padding(&frame)?;
        frame.flags.clear(FrameFlags::PADDED);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(frame_type: FrameType, flags: u8, stream_id: u32, payload: &'static [u8]) -> Frame {
        Frame::new(frame_type, FrameFlags::from_u8(flags), stream_id, Bytes::from_static(payload))
    }

    #[test]
    fn test_single_headers_passes_through() {
        let mut hook = HeadersHook::new();
        let out = hook
            .push(frame(FrameType::Headers, FrameFlags::END_HEADERS, 1, b"abc"))
            .unwrap()
            .unwrap();
        assert_eq!(&out.payload[..], b"abc");
        assert!(!hook.is_accumulating());
    }

    #[test]
    fn test_continuations_are_merged() {
        let mut hook = HeadersHook::new();
        let first = frame(FrameType::Headers, FrameFlags::END_STREAM | FrameFlags::PADDED, 3, b"\x01ab\x00");
        assert!(hook.push(first).unwrap().is_none());
        assert!(hook.is_accumulating());
        assert!(hook.push(frame(FrameType::Continuation, 0, 3, b"cd")).unwrap().is_none());

        let out = hook
            .push(frame(FrameType::Continuation, FrameFlags::END_HEADERS, 3, b"ef"))
            .unwrap()
            .unwrap();
        assert!(out.is(FrameType::Headers));
        assert_eq!(&out.payload[..], b"abcdef");
        assert!(out.flags.is_end_headers());
        assert!(out.flags.is_end_stream());
        assert!(!out.flags.is_padded());
        assert!(!hook.is_accumulating());
    }

    #[test]
    fn test_interleaved_frame_is_rejected() {
        let mut hook = HeadersHook::new();
        hook.push(frame(FrameType::Headers, 0, 1, b"a")).unwrap();
        let err = hook.push(frame(FrameType::Data, 0, 1, b"x")).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn test_continuation_on_other_stream_is_rejected() {
        let mut hook = HeadersHook::new();
        hook.push(frame(FrameType::PushPromise, 0, 1, b"a")).unwrap();
        let err = hook
            .push(frame(FrameType::Continuation, FrameFlags::END_HEADERS, 3, b"b"))
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_stray_continuation_is_rejected() {
        let mut hook = HeadersHook::new();
        assert!(hook.push(frame(FrameType::Continuation, FrameFlags::END_HEADERS, 1, b"")).is_err());
    }

    #[test]
    fn test_other_frames_pass_through() {
        let mut hook = HeadersHook::new();
        let out = hook.push(frame(FrameType::Ping, 0, 0, b"12345678")).unwrap();
        assert!(out.is_some());
    }
}
