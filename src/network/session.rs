//! Connection Session
//!
//! Owns one accepted socket and its reassembler. A session lives inside
//! exactly one worker and is only touched from that worker's thread.

use std::net::{Shutdown, SocketAddr};

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::config::ServerConfig;
use crate::error::{is_remote_close, LinkError};
use crate::network::event::{ConnectionId, SessionEvent};
use crate::network::transport::{read_available, OutboundQueue, ReadStatus};
use crate::protocol::{pack, StreamReassembler};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading and writing normally
    Open,

    /// Graceful close requested; waiting for queued bytes to drain
    Closing,

    /// Socket shut down; the owning worker drops the session
    Closed,
}

/// Handles a single accepted connection
///
/// Methods report through `out`, which the owning worker drains after each
/// call. `Disconnected` is pushed exactly once, when the session reaches
/// `Closed` through a peer close, an error or a requested disconnect.
pub struct ConnectionSession {
    id: ConnectionId,

    /// Non-blocking socket, registered with the owning worker's poll
    stream: TcpStream,

    /// Receive side framing state
    reassembler: StreamReassembler,

    /// Encoded frames the kernel has not taken yet
    outbound: OutboundQueue,

    /// Normalised peer address, filled in by `initialize`
    peer_addr: String,

    state: SessionState,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, stream: TcpStream, config: &ServerConfig) -> Self {
        Self {
            id,
            stream,
            reassembler: StreamReassembler::with_max_frame_len(config.max_frame_len),
            outbound: OutboundQueue::new(config.max_pending_write),
            peer_addr: String::from("unknown"),
            state: SessionState::Open,
        }
    }

    /// Poll token for this session's socket
    pub fn token(&self) -> Token {
        token_for(self.id)
    }

    /// Register with the worker's poll and announce the connection
    pub fn initialize(&mut self, registry: &Registry, out: &mut Vec<SessionEvent>) {
        let token = self.token();
        if let Err(e) = registry.register(
            &mut self.stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            tracing::warn!("Session {}: failed to register socket: {}", self.id, e);
            out.push(SessionEvent::Error {
                id: self.id,
                message: format!("failed to register socket: {}", e),
            });
            self.on_disconnect(out);
            return;
        }

        match self.stream.peer_addr() {
            Ok(addr) => self.peer_addr = normalize_peer_addr(addr),
            Err(e) => {
                self.on_socket_error(e, out);
                return;
            }
        }

        tracing::debug!("Session {} initialised, peer {}", self.id, self.peer_addr);
        out.push(SessionEvent::Connected {
            id: self.id,
            address: self.peer_addr.clone(),
        });
    }

    /// Dispatch a readiness event for this session's socket
    pub fn on_ready(&mut self, event: &Event, chunk: &mut [u8], out: &mut Vec<SessionEvent>) {
        if event.is_error() {
            match self.stream.take_error() {
                Ok(Some(e)) | Err(e) => {
                    self.on_socket_error(e, out);
                    return;
                }
                Ok(None) => {}
            }
        }
        if event.is_readable() || event.is_read_closed() {
            self.on_readable(chunk, out);
        }
        if event.is_writable() && self.state != SessionState::Closed {
            self.flush(out);
        }
    }

    /// Drain the socket and emit one message per completed frame
    pub fn on_readable(&mut self, chunk: &mut [u8], out: &mut Vec<SessionEvent>) {
        if self.state != SessionState::Open {
            return;
        }

        let mut frames = Vec::new();
        let result = read_available(&mut self.stream, chunk, &mut self.reassembler, &mut frames);

        for text in frames {
            tracing::trace!("Session {} received {} bytes", self.id, text.len());
            out.push(SessionEvent::Message { id: self.id, text });
        }

        match result {
            Ok(ReadStatus::Open) => {}
            Ok(ReadStatus::Closed) => {
                tracing::debug!("Session {}: peer {} closed the connection", self.id, self.peer_addr);
                self.on_disconnect(out);
            }
            Err(e @ LinkError::ProtocolViolation { .. }) => {
                tracing::warn!("Session {}: {}, closing", self.id, e);
                out.push(SessionEvent::Error {
                    id: self.id,
                    message: e.to_string(),
                });
                self.outbound.clear();
                self.on_disconnect(out);
            }
            Err(LinkError::Io(e)) => self.on_socket_error(e, out),
            Err(e) => {
                out.push(SessionEvent::Error {
                    id: self.id,
                    message: e.to_string(),
                });
                self.on_disconnect(out);
            }
        }
    }

    /// Encode and write one message
    ///
    /// A frame the outbound queue cannot take is reported and dropped.
    pub fn send(&mut self, text: &str, out: &mut Vec<SessionEvent>) {
        if self.state != SessionState::Open {
            tracing::warn!("Session {} is not open, dropping outgoing message", self.id);
            return;
        }

        let frame = pack(text);
        if let Err(e) = self.outbound.enqueue(&frame) {
            tracing::warn!("Session {}: {}", self.id, e);
            out.push(SessionEvent::Error {
                id: self.id,
                message: e.to_string(),
            });
            return;
        }

        tracing::trace!("Session {} queued {} bytes", self.id, frame.len());
        self.flush(out);
    }

    /// Request a graceful close once queued bytes are written
    pub fn disconnect(&mut self, out: &mut Vec<SessionEvent>) {
        if self.state != SessionState::Open {
            return;
        }
        self.state = SessionState::Closing;
        self.flush(out);
    }

    /// Close without reporting anything (worker shutdown)
    pub fn close_silently(&mut self, registry: &Registry) {
        self.state = SessionState::Closed;
        self.reassembler.clear();
        self.outbound.clear();
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Remove the socket from the worker's poll before the session is dropped
    pub fn deregister(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
    }

    fn flush(&mut self, out: &mut Vec<SessionEvent>) {
        match self.outbound.flush(&mut self.stream) {
            Ok(()) => {
                if self.state == SessionState::Closing && self.outbound.is_empty() {
                    self.on_disconnect(out);
                }
            }
            Err(e) => self.on_socket_error(e, out),
        }
    }

    fn on_socket_error(&mut self, err: std::io::Error, out: &mut Vec<SessionEvent>) {
        if is_remote_close(&err) {
            tracing::debug!("Session {}: remote host closed ({})", self.id, err);
        } else {
            tracing::warn!("Session {} error: {}", self.id, err);
            out.push(SessionEvent::Error {
                id: self.id,
                message: LinkError::Transport(err.to_string()).to_string(),
            });
        }
        self.on_disconnect(out);
    }

    fn on_disconnect(&mut self, out: &mut Vec<SessionEvent>) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.reassembler.clear();
        self.outbound.clear();
        let _ = self.stream.shutdown(Shutdown::Both);

        tracing::debug!("Session {} disconnected", self.id);
        out.push(SessionEvent::Disconnected { id: self.id });
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

pub(crate) fn token_for(id: ConnectionId) -> Token {
    Token(id.as_u64() as usize)
}

/// Render a peer address as `ip:port`, showing IPv4-mapped IPv6 as IPv4
pub fn normalize_peer_addr(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => format!("{}:{}", v4, v6.port()),
            None => format!("{}:{}", v6.ip(), v6.port()),
        },
    }
}
