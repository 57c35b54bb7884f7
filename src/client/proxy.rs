//! Client Proxy
//!
//! Runs a `ClientSession` on its own reactor thread. Every public call is a
//! message posted to that thread. Only `connect` does work on the caller's
//! thread (the name lookup), and only dropping the proxy waits.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::{Events, Poll, Token, Waker};

use super::session::{resolve, ClientEvent, ClientSession, CLIENT_TOKEN};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::EventSink;

const WAKE_TOKEN: Token = Token(1);

/// How long a dropped proxy keeps flushing queued frames before giving up
const CLOSE_LINGER: Duration = Duration::from_secs(5);

/// Messages for the client thread
enum ClientCommand {
    Connect {
        host: String,
        port: u16,
        resolved: io::Result<SocketAddr>,
    },
    Disconnect,
    Send(String),
    SetAutoReconnect(bool),
    SetReconnectInterval(Duration),
    Shutdown,
}

/// Keeps the proxy's cached connectivity flag in step with the events
struct ConnectivityTracker {
    connected: Arc<AtomicBool>,
    inner: Arc<dyn EventSink<ClientEvent>>,
}

impl EventSink<ClientEvent> for ConnectivityTracker {
    fn emit(&self, event: ClientEvent) {
        match event {
            ClientEvent::Connected => self.connected.store(true, Ordering::Release),
            ClientEvent::Disconnected => self.connected.store(false, Ordering::Release),
            _ => {}
        }
        self.inner.emit(event);
    }
}

/// Thread-safe handle to a client running on its own reactor
pub struct ClientProxy {
    inbox: Sender<ClientCommand>,
    waker: Arc<Waker>,
    connected: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClientProxy {
    /// Spawn the client thread
    ///
    /// Events are emitted on the client thread into `events`.
    pub fn new(config: ClientConfig, events: Arc<dyn EventSink<ClientEvent>>) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (inbox, commands) = unbounded();
        let connected = Arc::new(AtomicBool::new(false));

        let tracker = Arc::new(ConnectivityTracker {
            connected: Arc::clone(&connected),
            inner: events,
        });
        let reactor = ClientReactor {
            poll,
            commands,
            session: ClientSession::new(config, tracker),
        };

        let handle = thread::Builder::new()
            .name("framelink-client".to_string())
            .spawn(move || reactor.run())?;

        Ok(Self {
            inbox,
            waker,
            connected,
            handle: Some(handle),
        })
    }

    /// Connect to `host:port`
    ///
    /// The name lookup runs here, on the calling thread, so a slow resolver
    /// never stalls the client thread.
    pub fn connect(&self, host: impl Into<String>, port: u16) {
        let host = host.into();
        let resolved = resolve(&host, port);
        self.post(ClientCommand::Connect {
            host,
            port,
            resolved,
        });
    }

    /// Disconnect and suppress automatic reconnection
    ///
    /// Frames already passed to `send` are written out before the socket
    /// closes; `Disconnected` follows once they are.
    pub fn disconnect(&self) {
        self.post(ClientCommand::Disconnect);
    }

    pub fn send(&self, text: impl Into<String>) {
        self.post(ClientCommand::Send(text.into()));
    }

    pub fn set_auto_reconnect(&self, enable: bool) {
        self.post(ClientCommand::SetAutoReconnect(enable));
    }

    pub fn set_reconnect_interval(&self, interval: Duration) {
        self.post(ClientCommand::SetReconnectInterval(interval));
    }

    /// Cached connectivity, updated when `Connected`/`Disconnected` fire
    ///
    /// May briefly lag the client thread's real state.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn post(&self, command: ClientCommand) {
        if self.inbox.send(command).is_err() {
            tracing::warn!("Client thread has stopped; command dropped");
            return;
        }
        if let Err(e) = self.waker.wake() {
            tracing::warn!("Failed to wake client thread: {}", e);
        }
    }
}

/// Stops the client thread, first flushing queued frames for up to `CLOSE_LINGER`
impl Drop for ClientProxy {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::error!("ClientProxy dropped on its own thread; leaving it detached");
            return;
        }
        self.post(ClientCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Client thread panicked");
        }
    }
}

/// State living on the client thread
struct ClientReactor {
    poll: Poll,
    commands: Receiver<ClientCommand>,
    session: ClientSession,
}

impl ClientReactor {
    fn run(mut self) {
        tracing::debug!("Client thread started");

        let mut events = Events::with_capacity(64);
        'reactor: loop {
            let timeout = self.session.next_timeout(Instant::now());
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Client poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                if event.token() == CLIENT_TOKEN {
                    self.session.on_ready(event, self.poll.registry());
                }
            }

            self.session.on_timer(Instant::now(), self.poll.registry());

            loop {
                match self.commands.try_recv() {
                    Ok(ClientCommand::Shutdown) | Err(TryRecvError::Disconnected) => break 'reactor,
                    Ok(command) => self.handle(command),
                    Err(TryRecvError::Empty) => break,
                }
            }
        }

        self.session.shutdown(self.poll.registry());
        self.drain_close(&mut events);
        tracing::debug!("Client thread stopped");
    }

    /// Keep polling until a graceful close finishes or the linger expires
    fn drain_close(&mut self, events: &mut Events) {
        let deadline = Instant::now() + CLOSE_LINGER;
        while self.session.is_closing() {
            let now = Instant::now();
            if now >= deadline {
                self.session.abort_close(self.poll.registry());
                return;
            }
            if let Err(e) = self.poll.poll(events, Some(deadline - now)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Client poll failed while closing: {}", e);
                self.session.abort_close(self.poll.registry());
                return;
            }
            for event in events.iter() {
                if event.token() == CLIENT_TOKEN {
                    self.session.on_ready(event, self.poll.registry());
                }
            }
        }
    }

    fn handle(&mut self, command: ClientCommand) {
        let registry = self.poll.registry();
        match command {
            ClientCommand::Connect {
                host,
                port,
                resolved,
            } => self.session.connect(&host, port, resolved, registry),
            ClientCommand::Disconnect => self.session.disconnect(registry),
            ClientCommand::Send(text) => self.session.send(&text, registry),
            ClientCommand::SetAutoReconnect(enable) => self.session.set_auto_reconnect(enable),
            ClientCommand::SetReconnectInterval(interval) => {
                self.session.set_reconnect_interval(interval)
            }
            ClientCommand::Shutdown => {}
        }
    }
}
