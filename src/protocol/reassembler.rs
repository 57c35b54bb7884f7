//! Stream reassembler
//!
//! Turns an arbitrarily fragmented or coalesced byte stream into whole frames.
//!
//! ## Buffer Invariant
//! The head of the buffer is always either a complete 4-byte length prefix or
//! fewer than 4 bytes. Anything after a complete prefix is the (possibly
//! partial) payload of that frame followed by zero or more later frames.

use bytes::BytesMut;

use super::frame::{HEADER_SIZE, MAX_FRAME_LEN};
use crate::error::{LinkError, Result};

/// Capacity the buffer starts with and shrinks back to (4 KB)
pub const BASELINE_CAPACITY: usize = 4 * 1024;

/// Capacity above which an almost-empty buffer is reallocated (8 KB)
pub const SHRINK_THRESHOLD: usize = 8 * 1024;

/// Buffered length below which the buffer counts as almost empty (1 KB)
const SHRINK_BELOW_LEN: usize = 1024;

/// Per-connection incremental frame decoder
///
/// Owned by exactly one session; never shared between connections.
#[derive(Debug)]
pub struct StreamReassembler {
    /// Bytes received but not yet delivered as frames
    buffer: BytesMut,

    /// Largest payload accepted before the stream is declared invalid
    max_frame_len: usize,
}

impl StreamReassembler {
    /// Create a reassembler with the default 10 MB frame cap
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    /// Create a reassembler with a custom frame cap
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(BASELINE_CAPACITY),
            max_frame_len,
        }
    }

    /// Append received bytes and extract every frame they complete
    ///
    /// Decoded messages are pushed onto `frames` in wire order. On a
    /// protocol violation the frames decoded before the offending header are
    /// still in `frames`, the buffer is discarded and the error is returned;
    /// the caller must close the connection and stop feeding.
    pub fn feed(&mut self, data: &[u8], frames: &mut Vec<String>) -> Result<()> {
        self.buffer.extend_from_slice(data);
        let result = self.drain(frames);
        self.shrink_if_idle();
        result
    }

    fn drain(&mut self, frames: &mut Vec<String>) -> Result<()> {
        loop {
            if self.buffer.len() < HEADER_SIZE {
                return Ok(());
            }

            let head = &self.buffer[..HEADER_SIZE];
            let declared = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;

            if declared > self.max_frame_len {
                self.buffer.clear();
                return Err(LinkError::ProtocolViolation {
                    declared,
                    max: self.max_frame_len,
                });
            }

            let total = HEADER_SIZE + declared;
            if self.buffer.len() < total {
                tracing::trace!(
                    "Half frame buffered: have {} bytes, need {}",
                    self.buffer.len(),
                    total
                );
                self.buffer.reserve(total - self.buffer.len());
                return Ok(());
            }

            let frame = self.buffer.split_to(total);
            let text = String::from_utf8_lossy(&frame[HEADER_SIZE..]);
            if !text.is_empty() {
                frames.push(text.into_owned());
            }
        }
    }

    /// Bound idle memory: a large, nearly empty buffer goes back to baseline
    fn shrink_if_idle(&mut self) {
        if self.buffer.capacity() > SHRINK_THRESHOLD && self.buffer.len() < SHRINK_BELOW_LEN {
            let mut shrunk = BytesMut::with_capacity(BASELINE_CAPACITY);
            shrunk.extend_from_slice(&self.buffer);
            self.buffer = shrunk;
        }
    }

    /// Drop any partially received data
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes currently waiting for the rest of their frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current allocation of the receive buffer
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}
