//! Frame codec
//!
//! Encoding of text into the wire frame format.

use bytes::{BufMut, Bytes, BytesMut};

/// Length prefix size: 4 bytes, big-endian
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size (10 MB)
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Encode a message into a frame
///
/// Format: payload_len (4, big-endian) + UTF-8 payload
pub fn pack(text: &str) -> Bytes {
    let payload = text.as_bytes();

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);

    frame.freeze()
}
