//! # framelink
//!
//! A multi-reactor TCP server and an auto-reconnecting client sharing one
//! length-prefixed text protocol:
//! - Round-robin placement of connections over a fixed pool of I/O threads
//! - Incremental frame reassembly over fragmented or coalesced reads
//! - Cross-thread dispatch through per-reactor command channels, no shared maps
//! - Client reconnect state machine with a fixed retry interval
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Server (handle)                         │
//! │        start / stop / send / broadcast / connection_count    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Control channel
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │              Acceptor thread + ConnectionRouter              │
//! │         (listener, routing table, round-robin counter)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ WorkerCommand channels
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  IoWorker   │   ...    │  IoWorker   │
//!   │ (mio poll)  │          │ (mio poll)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          ▼                        ▼
//!   ConnectionSession        ConnectionSession
//!   + StreamReassembler      + StreamReassembler
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LinkError, Result};
pub use config::{ClientConfig, ServerConfig};
pub use network::{ConnectionId, EventSink, Server, ServerEvent};
pub use client::{ClientEvent, ClientProxy};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of framelink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
