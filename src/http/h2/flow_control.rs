//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! Only the send direction is metered: inbound DATA is credited back to
//! the peer as soon as it arrives. Frames that do not fit the current
//! connection and stream windows wait in a per-stream FIFO
//! ([`WindowQueue`]) until WINDOW_UPDATE credit arrives. Queued DATA is
//! cut down to whatever credit is available; GZIPPED_DATA frames are
//! compressed as a unit and wait for their full size.

use super::error::{Error, ErrorCode, Result};
use super::frames::{strip_padding, DataFrame, Frame, FrameType};
use super::stream::StreamManager;
use super::DEFAULT_INITIAL_WINDOW_SIZE;
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

/// Largest legal window (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Flow-control credit a frame consumes
pub fn credit(frame: &Frame) -> usize {
    match frame.frame_type() {
        Some(t) if t.is_flow_controlled() => frame.payload.len(),
        _ => 0,
    }
}

/// Cut a DATA frame down to at most `limit` bytes of credit.
///
/// Returns the part to send now and the remainder, which keeps
/// END_STREAM. Padding is dropped. `None` for frames that cannot be cut.
pub fn split_data(frame: &Frame, limit: usize) -> Option<(Frame, Option<Frame>)> {
    if limit == 0 || !frame.is(FrameType::Data) {
        return None;
    }
    let data = strip_padding(frame).ok()?;
    let end_stream = frame.flags.is_end_stream();
    if data.len() <= limit {
        return Some((DataFrame::new(frame.stream_id, data, end_stream).to_frame(), None));
    }
    let head = DataFrame::new(frame.stream_id, data.slice(..limit), false).to_frame();
    let rest = DataFrame::new(frame.stream_id, data.slice(limit..), end_stream).to_frame();
    Some((head, Some(rest)))
}

/// Flow control window
///
/// Tracks the available window size for sending data. The window may go
/// negative after the peer shrinks SETTINGS_INITIAL_WINDOW_SIZE.
#[derive(Debug, Clone)]
pub struct Window {
    /// Stream the window belongs to (0 for the connection)
    stream_id: u32,
    /// Current window size
    size: i64,
}

impl Window {
    /// Create a new flow control window with specified initial size
    pub fn new(stream_id: u32, initial_size: u32) -> Self {
        Window {
            stream_id,
            size: initial_size as i64,
        }
    }

    /// Connection-level window with the RFC default size
    pub fn connection() -> Self {
        Self::new(0, DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.size >= amount as i64
    }

    /// Consume window capacity for sending data
    pub fn consume(&mut self, amount: usize) {
        self.size -= amount as i64;
    }

    /// Apply a WINDOW_UPDATE increment.
    ///
    /// A zero increment is a PROTOCOL_ERROR and overflow past 2^31-1 a
    /// FLOW_CONTROL_ERROR, scoped to the stream or the connection.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(self.error(ErrorCode::ProtocolError, "WINDOW_UPDATE increment must be non-zero".into()));
        }
        let new_size = self.size + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(self.error(
                ErrorCode::FlowControlError,
                format!("window size {} exceeds maximum (2^31-1)", new_size),
            ));
        }
        self.size = new_size;
        Ok(self.size)
    }

    /// Shift the window after a SETTINGS_INITIAL_WINDOW_SIZE change
    pub fn adjust(&mut self, delta: i64) -> Result<()> {
        let new_size = self.size + delta;
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::connection(
                ErrorCode::FlowControlError,
                format!("stream {} window {} exceeds maximum (2^31-1)", self.stream_id, new_size),
            ));
        }
        self.size = new_size;
        Ok(())
    }

    fn error(&self, code: ErrorCode, reason: String) -> Error {
        if self.stream_id == 0 {
            Error::connection(code, reason)
        } else {
            Error::stream(self.stream_id, code, reason)
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::connection()
    }
}

/// Per-stream FIFO of frames blocked on flow control
#[derive(Debug, Default)]
pub struct WindowQueue {
    queues: BTreeMap<u32, VecDeque<Frame>>,
}

impl WindowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the stream already has frames waiting; new frames for it
    /// must queue behind them to keep stream order.
    pub fn is_blocked(&self, stream_id: u32) -> bool {
        self.queues.get(&stream_id).is_some_and(|q| !q.is_empty())
    }

    /// Queue a frame
    pub fn push(&mut self, frame: Frame) {
        trace!(stream_id = frame.stream_id, len = frame.payload.len(), "queueing frame on flow control");
        self.queues.entry(frame.stream_id).or_default().push_back(frame);
    }

    /// Drop everything queued for a stream, returning how many frames were discarded
    pub fn discard(&mut self, stream_id: u32) -> usize {
        self.queues.remove(&stream_id).map_or(0, |q| q.len())
    }

    /// Number of queued frames across all streams
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release queued frames, in stream order then FIFO, while both the
    /// connection and the owning stream have credit. A DATA frame larger
    /// than the credit left is split and its head released. Credit is
    /// consumed for every released frame.
    pub fn release(&mut self, connection: &mut Window, streams: &mut StreamManager) -> Vec<Frame> {
        let mut ready = Vec::new();

        'streams: for (&stream_id, queue) in self.queues.iter_mut() {
            let Some(stream) = streams.get_mut(stream_id) else {
                queue.clear();
                continue;
            };
            while let Some(frame) = queue.pop_front() {
                let needed = credit(&frame);
                let fits = needed == 0
                    || (connection.can_send(needed) && stream.send_window().can_send(needed));
                let frame = if fits {
                    frame
                } else {
                    let available = connection.size().min(stream.send_window().size());
                    let cut = usize::try_from(available)
                        .ok()
                        .and_then(|limit| split_data(&frame, limit));
                    match cut {
                        Some((head, rest)) => {
                            if let Some(rest) = rest {
                                trace!(stream_id, sent = head.payload.len(), "splitting queued DATA to fit window");
                                queue.push_front(rest);
                            }
                            head
                        }
                        None => {
                            queue.push_front(frame);
                            if connection.size() <= 0 {
                                break 'streams;
                            }
                            continue 'streams;
                        }
                    }
                };
                let needed = credit(&frame);
                connection.consume(needed);
                stream.send_window_mut().consume(needed);
                ready.push(frame);
            }
        }

        self.queues.retain(|_, q| !q.is_empty());
        ready
    }
}
