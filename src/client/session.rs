//! Client Session
//!
//! One outbound connection with its own reassembler and the reconnect state
//! machine. Driven entirely by the client reactor thread: socket readiness
//! goes to `on_ready`, the poll timeout to `on_timer`.
//!
//! Host names are resolved by the caller before `connect` (see `resolve`);
//! the reactor only ever dials a ready `SocketAddr`, and reconnects reuse it.

use std::io;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::config::ClientConfig;
use crate::error::{is_remote_close, LinkError};
use crate::network::normalize_peer_addr;
use crate::network::transport::{read_available, OutboundQueue, ReadStatus};
use crate::network::EventSink;
use crate::protocol::{pack, StreamReassembler};

/// Poll token of the client socket
pub(crate) const CLIENT_TOKEN: Token = Token(0);

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Disconnected,
    Connecting,
    Connected,

    /// Manual disconnect waiting for queued frames to reach the kernel
    Closing,

    /// Waiting for the reconnect timer
    ReconnectPending,
}

/// Public client events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    MessageReceived { text: String },
    ErrorOccurred { message: String },

    /// A reconnect attempt has been scheduled
    Reconnecting,
}

enum ConnectOutcome {
    Pending,
    Established(SocketAddr),
    Failed(io::Error),
}

/// Outbound connection plus reconnect policy
pub struct ClientSession {
    config: ClientConfig,
    state: ReconnectState,

    /// Last requested target, kept for reconnects
    host: String,
    port: u16,
    target: Option<SocketAddr>,

    /// Set by `disconnect`; suppresses automatic reconnection
    manual_disconnect: bool,

    stream: Option<TcpStream>,
    reassembler: StreamReassembler,
    outbound: OutboundQueue,
    chunk: Vec<u8>,

    /// Deadline of the one-shot reconnect timer
    reconnect_at: Option<Instant>,

    events: Arc<dyn EventSink<ClientEvent>>,
}

impl ClientSession {
    pub fn new(config: ClientConfig, events: Arc<dyn EventSink<ClientEvent>>) -> Self {
        Self {
            state: ReconnectState::Disconnected,
            host: String::new(),
            port: 0,
            target: None,
            manual_disconnect: false,
            stream: None,
            reassembler: StreamReassembler::with_max_frame_len(config.max_frame_len),
            outbound: OutboundQueue::new(config.max_pending_write),
            chunk: vec![0u8; config.read_chunk_size],
            reconnect_at: None,
            events,
            config,
        }
    }

    /// Start connecting to `host:port`, already resolved to `resolved`
    ///
    /// Rejected with an error event while connected, mid-connect or closing.
    /// A failed lookup is reported and never retried.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        resolved: io::Result<SocketAddr>,
        registry: &Registry,
    ) {
        match self.state {
            ReconnectState::Connected => {
                self.report(LinkError::StateConflict("already connected to server".to_string()));
                return;
            }
            ReconnectState::Connecting => {
                self.report(LinkError::StateConflict(
                    "connection attempt already in progress".to_string(),
                ));
                return;
            }
            ReconnectState::Closing => {
                self.report(LinkError::StateConflict(
                    "disconnect still in progress".to_string(),
                ));
                return;
            }
            ReconnectState::Disconnected | ReconnectState::ReconnectPending => {}
        }

        self.reassembler.clear();
        self.host = host.to_string();
        self.port = port;
        self.manual_disconnect = false;
        self.reconnect_at = None;

        match resolved {
            Ok(addr) => {
                self.target = Some(addr);
                self.start_connect(registry);
            }
            Err(e) => {
                self.target = None;
                self.state = ReconnectState::Disconnected;
                tracing::warn!("Cannot resolve {}:{}: {}", host, port, e);
                self.events.emit(ClientEvent::ErrorOccurred {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Close on request; no reconnect follows
    ///
    /// A live connection moves to `Closing`: new sends are refused, queued
    /// frames keep flushing on writable readiness, and `Disconnected` fires
    /// once the queue is empty.
    pub fn disconnect(&mut self, registry: &Registry) {
        self.manual_disconnect = true;
        self.reconnect_at = None;

        match self.state {
            ReconnectState::Connected => {
                tracing::info!("Disconnecting from {}:{} by request", self.host, self.port);
                self.state = ReconnectState::Closing;
                self.flush(registry);
            }
            ReconnectState::Connecting => {
                self.drop_stream(registry);
                self.reassembler.clear();
                self.state = ReconnectState::Disconnected;
            }
            ReconnectState::ReconnectPending => self.state = ReconnectState::Disconnected,
            ReconnectState::Closing | ReconnectState::Disconnected => {}
        }
    }

    /// Give up on a pending graceful close and drop whatever is still queued
    pub fn abort_close(&mut self, registry: &Registry) {
        if self.state == ReconnectState::Closing {
            tracing::warn!(
                "Closing with {} bytes still queued for the server",
                self.outbound.len()
            );
            self.on_disconnected(registry);
        }
    }

    /// Encode and write one message; requires an established connection
    pub fn send(&mut self, text: &str, registry: &Registry) {
        if self.state != ReconnectState::Connected {
            self.report(LinkError::StateConflict("not connected to server".to_string()));
            return;
        }

        let frame = pack(text);
        if let Err(e) = self.outbound.enqueue(&frame) {
            self.report(e);
            return;
        }
        tracing::trace!("Queued {} bytes for the server", frame.len());
        self.flush(registry);
    }

    pub fn set_auto_reconnect(&mut self, enable: bool) {
        self.config.auto_reconnect = enable;
        if !enable {
            self.reconnect_at = None;
            if self.state == ReconnectState::ReconnectPending {
                self.state = ReconnectState::Disconnected;
            }
        }
    }

    pub fn set_reconnect_interval(&mut self, interval: Duration) {
        self.config.reconnect_interval = interval;
    }

    /// Dispatch a readiness event for the client socket
    pub fn on_ready(&mut self, event: &Event, registry: &Registry) {
        if self.state == ReconnectState::Connecting {
            match self.connect_outcome() {
                ConnectOutcome::Pending => return,
                ConnectOutcome::Established(addr) => self.on_connected(addr),
                ConnectOutcome::Failed(e) => {
                    self.drop_stream(registry);
                    self.on_connect_error(e.to_string());
                    return;
                }
            }
        }

        if !self.has_live_stream() {
            return;
        }

        if event.is_error() {
            let error = self.stream.as_ref().and_then(|s| match s.take_error() {
                Ok(err) => err,
                Err(e) => Some(e),
            });
            if let Some(e) = error {
                self.on_transport_error(e, registry);
                return;
            }
        }
        if event.is_readable() || event.is_read_closed() {
            self.on_readable(registry);
        }
        if event.is_writable() && self.has_live_stream() {
            self.flush(registry);
        }
    }

    /// Time left on the reconnect timer, if armed
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.reconnect_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fire the reconnect timer once its deadline has passed
    pub fn on_timer(&mut self, now: Instant, registry: &Registry) {
        match self.reconnect_at {
            Some(deadline) if now >= deadline => {
                self.reconnect_at = None;
                self.attempt_reconnect(registry);
            }
            _ => {}
        }
    }

    /// Begin a graceful close without scheduling anything (reactor exit)
    ///
    /// The reactor keeps polling while `is_closing` holds.
    pub fn shutdown(&mut self, registry: &Registry) {
        self.disconnect(registry);
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ReconnectState::Connected
    }

    pub fn is_closing(&self) -> bool {
        self.state == ReconnectState::Closing
    }

    fn has_live_stream(&self) -> bool {
        matches!(
            self.state,
            ReconnectState::Connected | ReconnectState::Closing
        )
    }

    pub fn auto_reconnect(&self) -> bool {
        self.config.auto_reconnect
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.config.reconnect_interval
    }

    fn attempt_reconnect(&mut self, registry: &Registry) {
        let idle = matches!(
            self.state,
            ReconnectState::Disconnected | ReconnectState::ReconnectPending
        );
        if idle && self.target.is_some() {
            tracing::info!("Reconnecting to {}:{}", self.host, self.port);
            self.reassembler.clear();
            self.start_connect(registry);
        }
    }

    fn start_connect(&mut self, registry: &Registry) {
        let Some(addr) = self.target else {
            return;
        };
        tracing::info!("Connecting to {}:{} ({})", self.host, self.port, addr);

        let mut stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                self.on_connect_error(e.to_string());
                return;
            }
        };
        if let Err(e) = registry.register(
            &mut stream,
            CLIENT_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            self.on_connect_error(e.to_string());
            return;
        }

        self.stream = Some(stream);
        self.state = ReconnectState::Connecting;
    }

    fn connect_outcome(&self) -> ConnectOutcome {
        let Some(stream) = self.stream.as_ref() else {
            return ConnectOutcome::Failed(io::Error::from(io::ErrorKind::NotConnected));
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => return ConnectOutcome::Failed(e),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(addr) => {
                if self.config.nodelay {
                    let _ = stream.set_nodelay(true);
                }
                ConnectOutcome::Established(addr)
            }
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => ConnectOutcome::Pending,
            Err(e) => ConnectOutcome::Failed(e),
        }
    }

    fn on_connected(&mut self, addr: SocketAddr) {
        self.state = ReconnectState::Connected;
        self.reconnect_at = None;
        tracing::info!("Connected to server {}", normalize_peer_addr(addr));
        self.events.emit(ClientEvent::Connected);
    }

    fn on_readable(&mut self, registry: &Registry) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut frames = Vec::new();
        let result = read_available(stream, &mut self.chunk, &mut self.reassembler, &mut frames);

        for text in frames {
            tracing::trace!("Received {} bytes from the server", text.len());
            self.events.emit(ClientEvent::MessageReceived { text });
        }

        match result {
            Ok(ReadStatus::Open) => {}
            Ok(ReadStatus::Closed) => self.on_disconnected(registry),
            Err(e @ LinkError::ProtocolViolation { .. }) => {
                self.report(e);
                self.outbound.clear();
                self.on_disconnected(registry);
            }
            Err(LinkError::Io(e)) => self.on_transport_error(e, registry),
            Err(e) => {
                self.report(e);
                self.on_disconnected(registry);
            }
        }
    }

    fn flush(&mut self, registry: &Registry) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if let Err(e) = self.outbound.flush(stream) {
            self.on_transport_error(e, registry);
            return;
        }
        if self.state == ReconnectState::Closing && self.outbound.is_empty() {
            tracing::debug!("Outbound queue drained, closing");
            self.on_disconnected(registry);
        }
    }

    fn on_transport_error(&mut self, err: io::Error, registry: &Registry) {
        if is_remote_close(&err) {
            tracing::debug!("Server closed the connection: {}", err);
        } else {
            self.report(LinkError::Transport(err.to_string()));
        }
        self.on_disconnected(registry);
    }

    /// A live connection ended, by either side
    fn on_disconnected(&mut self, registry: &Registry) {
        self.drop_stream(registry);
        self.reassembler.clear();
        self.state = ReconnectState::Disconnected;

        tracing::info!("Disconnected from server");
        self.events.emit(ClientEvent::Disconnected);

        if self.config.auto_reconnect && !self.manual_disconnect && self.target.is_some() {
            self.schedule_reconnect();
        }
    }

    /// A connection attempt failed before it was established
    fn on_connect_error(&mut self, message: String) {
        self.state = ReconnectState::Disconnected;
        tracing::warn!("Failed to connect to {}:{}: {}", self.host, self.port, message);
        self.events.emit(ClientEvent::ErrorOccurred { message });

        if self.config.auto_reconnect && !self.manual_disconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let interval = self.config.reconnect_interval;
        tracing::info!("Reconnecting in {} ms", interval.as_millis());
        self.events.emit(ClientEvent::Reconnecting);
        self.reconnect_at = Some(Instant::now() + interval);
        self.state = ReconnectState::ReconnectPending;
    }

    fn drop_stream(&mut self, registry: &Registry) {
        if let Some(mut stream) = self.stream.take() {
            let _ = registry.deregister(&mut stream);
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.outbound.clear();
    }

    fn report(&self, err: LinkError) {
        tracing::warn!("{}", err);
        self.events.emit(ClientEvent::ErrorOccurred {
            message: err.to_string(),
        });
    }
}

/// Blocking name lookup; returns the first address
pub(crate) fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}:{}", host, port),
        )
    })
}
