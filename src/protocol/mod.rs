//! Protocol Module
//!
//! Defines the wire protocol shared by the server and the client.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (4)  │      Payload (UTF-8)        │
//! └──────────┴─────────────────────────────┘
//! ```
//!
//! - `Len` is an unsigned big-endian byte count of the payload
//! - Payloads above `MAX_FRAME_LEN` abort the connection
//! - A zero-length payload is valid on the wire but never delivered
//!
//! Encoding is stateless (`pack`). Decoding is stateful and lives in
//! `StreamReassembler`, one per connection.

mod frame;
mod reassembler;

pub use frame::{pack, HEADER_SIZE, MAX_FRAME_LEN};
pub use reassembler::{StreamReassembler, BASELINE_CAPACITY, SHRINK_THRESHOLD};
