//! Socket I/O helpers shared by server sessions and the client
//!
//! Both sides run non-blocking sockets inside a readiness loop, so reads are
//! drained until `WouldBlock` and writes go through a bounded queue that is
//! flushed again whenever the socket reports writable.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use crate::error::{LinkError, Result};
use crate::protocol::StreamReassembler;

/// Outcome of draining a readable socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Everything available was consumed; the socket is still open
    Open,

    /// The peer closed its end
    Closed,
}

/// Read everything currently available into the reassembler
///
/// Frames completed along the way are pushed onto `frames`, including those
/// decoded before an error is returned.
pub(crate) fn read_available<R: Read>(
    reader: &mut R,
    chunk: &mut [u8],
    reassembler: &mut StreamReassembler,
    frames: &mut Vec<String>,
) -> Result<ReadStatus> {
    loop {
        match reader.read(chunk) {
            Ok(0) => return Ok(ReadStatus::Closed),
            Ok(n) => reassembler.feed(&chunk[..n], frames)?,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LinkError::Io(e)),
        }
    }
}

/// Bounded queue of encoded frames waiting for the socket
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    pending: BytesMut,
    max_pending: usize,
}

impl OutboundQueue {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_pending,
        }
    }

    /// Accept a whole frame or nothing
    ///
    /// A frame that does not fit under the cap is dropped and reported as a
    /// partial write; it is never retried.
    pub(crate) fn enqueue(&mut self, frame: &[u8]) -> Result<()> {
        let room = self.max_pending.saturating_sub(self.pending.len());
        if frame.len() > room {
            return Err(LinkError::PartialWrite {
                written: 0,
                expected: frame.len(),
            });
        }
        self.pending.extend_from_slice(frame);
        Ok(())
    }

    /// Write until the queue is empty or the socket would block
    pub(crate) fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        while !self.pending.is_empty() {
            match writer.write(&self.pending) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => self.pending.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        writer.flush()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
