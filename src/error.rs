//! Error types for framelink
//!
//! Provides a unified error type for all operations. Errors never cross a
//! reactor boundary as values: each context turns them into an
//! `ErrorOccurred` event before anything leaves its thread.

use std::io;

use thiserror::Error;

use crate::network::ConnectionId;

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

/// Unified error type for framelink operations
#[derive(Debug, Error)]
pub enum LinkError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol violation: declared frame length {declared} exceeds {max} bytes")]
    ProtocolViolation { declared: usize, max: usize },

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Partial write: {written} of {expected} bytes accepted")]
    PartialWrite { written: usize, expected: usize },

    #[error("Unknown connection: {0}")]
    UnknownTarget(ConnectionId),

    #[error("Transport error: {0}")]
    Transport(String),

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    #[error("State conflict: {0}")]
    StateConflict(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Returns true when the error means the peer went away.
///
/// A peer closing its end is an ordinary disconnect, not something to report.
pub fn is_remote_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
