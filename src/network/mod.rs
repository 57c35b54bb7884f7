//! Network Module
//!
//! Multi-reactor TCP server.
//!
//! ## Architecture
//! - One acceptor thread owns the listener and the router
//! - A fixed pool of worker threads, each a `mio` poll loop owning its sessions
//! - New connections are placed round-robin; events flow back
//!   session → worker → router/acceptor → `ServerEvent` sink
//!
//! ```text
//!            ┌────────────────────────────┐
//!  accept ──▶│ Acceptor + ConnectionRouter│──▶ ServerEvent sink
//!            └──────┬──────────────▲──────┘
//!      WorkerCommand│              │SessionEvent
//!            ┌──────▼─────┐  ┌─────┴──────┐
//!            │ IoWorker 0 │  │ IoWorker N │ ...
//!            │  sessions  │  │  sessions  │
//!            └────────────┘  └────────────┘
//! ```

mod event;
mod router;
mod server;
mod session;
pub(crate) mod transport;
mod worker;

pub use event::{CallbackSink, ConnectionId, EventSink, ServerEvent, SessionEvent};
pub use router::ConnectionRouter;
pub use server::Server;
pub use session::{normalize_peer_addr, ConnectionSession, SessionState};
pub use worker::{IoWorker, WorkerSlot};
