//! Events and sinks
//!
//! Every component reports through an injected sink. Sinks are called on the
//! emitting component's own thread, so an implementation must not block for
//! long and must not call back into a blocking stop of that component.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::Sender;

/// Source of connection ids for the whole process
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle of one accepted connection
///
/// Allocated once per accept from a process-wide monotonic counter, so an id
/// is never handed out twice, even across server restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events a worker reports to the router's context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session initialised; `address` is the normalised peer address
    Connected { id: ConnectionId, address: String },

    /// A complete, non-empty frame arrived
    Message { id: ConnectionId, text: String },

    /// The session is gone and has been removed from its worker
    Disconnected { id: ConnectionId },

    /// A reportable failure on one connection
    Error { id: ConnectionId, message: String },
}

impl SessionEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            SessionEvent::Connected { id, .. }
            | SessionEvent::Message { id, .. }
            | SessionEvent::Disconnected { id }
            | SessionEvent::Error { id, .. } => *id,
        }
    }
}

/// Public server events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Started { port: u16 },
    Stopped,
    ClientConnected { id: ConnectionId, address: String },
    ClientDisconnected { id: ConnectionId },
    MessageReceived { id: ConnectionId, text: String },
    ErrorOccurred { message: String },
}

/// Destination for events emitted by a component
pub trait EventSink<E>: Send + Sync {
    fn emit(&self, event: E);
}

impl<E: Send> EventSink<E> for Sender<E> {
    fn emit(&self, event: E) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Adapts a closure into an `EventSink`
pub struct CallbackSink<F>(pub F);

impl<E, F> EventSink<E> for CallbackSink<F>
where
    F: Fn(E) + Send + Sync,
{
    fn emit(&self, event: E) {
        (self.0)(event)
    }
}

impl<F> fmt::Debug for CallbackSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackSink")
    }
}
