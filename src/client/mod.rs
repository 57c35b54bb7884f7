//! Client Module
//!
//! Outbound connection with automatic reconnection.
//!
//! ## Reconnect State Machine
//! ```text
//!  Disconnected ──connect──▶ Connecting ──established──▶ Connected
//!       ▲                        │                           │
//!       │ disconnect()        error                    peer close /
//!       │                        ▼                       error
//!       └──────────────── ReconnectPending ◀────────────────┘
//!                          (timer fires → Connecting)
//!
//!  Connected ──disconnect()──▶ Closing ──queue drained──▶ Disconnected
//! ```
//!
//! A requested disconnect never cuts a frame short: `Closing` keeps flushing
//! until every queued byte is written, then closes without reconnecting.
//!
//! Reconnects use a fixed interval with no attempt cap, and only happen while
//! auto-reconnect is enabled and the last disconnect was not requested.

mod proxy;
mod session;

pub use proxy::ClientProxy;
pub use session::{ClientEvent, ClientSession, ReconnectState};
