//! TCP Server
//!
//! Accepts connections and hands them to the router's worker pool.
//!
//! `Server` is the public, thread-safe handle. While listening, an acceptor
//! thread owns the listening socket and the `ConnectionRouter`; every call on
//! the handle is posted to that thread, and worker events come back to it to
//! be republished as `ServerEvent`s.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::error::{LinkError, Result};
use crate::network::event::{ConnectionId, EventSink, ServerEvent, SessionEvent};
use crate::network::router::ConnectionRouter;
use crate::network::worker::WorkerSlot;

const LISTENER_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Readiness events handled per poll call
const EVENTS_CAPACITY: usize = 256;

/// Messages for the acceptor thread
enum Control {
    Send { id: ConnectionId, text: String },
    Broadcast { text: String },
    Disconnect { id: ConnectionId },
    Session(SessionEvent),
    Stop,
}

/// Worker-side sink that marshals session events onto the acceptor thread
struct ControlSink {
    control: Sender<Control>,
    waker: Arc<Waker>,
}

impl EventSink<SessionEvent> for ControlSink {
    fn emit(&self, event: SessionEvent) {
        if self.control.send(Control::Session(event)).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

/// State of a listening server, owned by the handle
struct Running {
    local_addr: SocketAddr,
    control: Sender<Control>,
    waker: Arc<Waker>,
    slots: Vec<Arc<WorkerSlot>>,

    /// Yields true when the thread exited on request, false after a fatal error
    acceptor: JoinHandle<bool>,
}

impl Running {
    /// The acceptor thread is gone without having been asked to stop
    fn is_dead(&self) -> bool {
        self.acceptor.is_finished()
    }
}

/// TCP server for framelink
pub struct Server {
    config: ServerConfig,
    events: Arc<dyn EventSink<ServerEvent>>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Create a new server with the given config and event sink
    pub fn new(config: ServerConfig, events: Arc<dyn EventSink<ServerEvent>>) -> Self {
        Self {
            config,
            events,
            running: Mutex::new(None),
        }
    }

    /// Start the worker pool and listen on `port`
    ///
    /// Returns false, reporting the reason as an `ErrorOccurred` event, if
    /// the server is already listening or the socket cannot be bound. Port 0
    /// picks a free port; `local_addr` tells which.
    pub fn start_server(&self, port: u16) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(Running::is_dead) {
            if let Some(dead) = running.take() {
                // Already reported `Stopped` itself
                let _ = dead.acceptor.join();
            }
        }
        if running.is_some() {
            drop(running);
            self.report(LinkError::StateConflict("server is already listening".to_string()));
            return false;
        }

        match self.launch(port) {
            Ok(state) => {
                tracing::info!(
                    "Server listening on {} with {} workers",
                    state.local_addr,
                    state.slots.len()
                );
                *running = Some(state);
                true
            }
            Err(e) => {
                drop(running);
                self.report(e);
                false
            }
        }
    }

    fn launch(&self, port: u16) -> Result<Running> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (control, inbox) = unbounded();

        let mut router = ConnectionRouter::new(self.config.clone());
        router.start(Arc::new(ControlSink {
            control: control.clone(),
            waker: Arc::clone(&waker),
        }))?;

        let addr = SocketAddr::new(self.config.bind_addr, port);
        let mut listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                router.stop();
                return Err(LinkError::Transport(format!("failed to listen on {}: {}", addr, e)));
            }
        };
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;
        let slots = router.slots();

        let acceptor = Acceptor {
            poll,
            listener,
            local_addr,
            router,
            inbox,
            events: Arc::clone(&self.events),
            nodelay: self.config.nodelay,
        };
        let handle = thread::Builder::new()
            .name("framelink-acceptor".to_string())
            .spawn(move || acceptor.run())?;

        Ok(Running {
            local_addr,
            control,
            waker,
            slots,
            acceptor: handle,
        })
    }

    /// Close the listener, stop every worker and report `Stopped`
    ///
    /// Does nothing when not listening. Calling it from inside an event sink
    /// (the acceptor thread) is refused, since it would wait on itself.
    pub fn stop_server(&self) {
        let running = {
            let mut guard = self.running.lock();
            if let Some(state) = guard.as_ref() {
                if state.acceptor.thread().id() == thread::current().id() {
                    tracing::error!("stop_server called from the acceptor thread; ignored");
                    return;
                }
            }
            guard.take()
        };
        let Some(running) = running else {
            return;
        };

        tracing::debug!("Server stopping...");
        if running.control.send(Control::Stop).is_ok() {
            let _ = running.waker.wake();
        }
        match running.acceptor.join() {
            Ok(true) => {
                self.events.emit(ServerEvent::Stopped);
                tracing::info!("Server stopped");
            }
            Ok(false) => tracing::debug!("Acceptor had already stopped after an error"),
            Err(_) => tracing::error!("Acceptor thread panicked"),
        }
    }

    /// Send a message to one connection
    ///
    /// An id that is not (or no longer) connected is logged and ignored.
    pub fn send_message(&self, id: ConnectionId, text: impl Into<String>) {
        self.post(Control::Send {
            id,
            text: text.into(),
        });
    }

    /// Send a message to every live connection
    pub fn broadcast_message(&self, text: impl Into<String>) {
        self.post(Control::Broadcast { text: text.into() });
    }

    /// Gracefully close one connection
    pub fn disconnect_client(&self, id: ConnectionId) {
        self.post(Control::Disconnect { id });
    }

    /// False once stopped, or once the acceptor has died on a poll failure
    pub fn is_listening(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|state| !state.is_dead())
    }

    /// Live connections across all workers (a snapshot, not exact under churn)
    pub fn connection_count(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map(|state| state.slots.iter().map(|slot| slot.live_connections()).sum())
            .unwrap_or(0)
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|state| state.local_addr)
    }

    /// Size of the worker pool (configured size while stopped)
    pub fn worker_count(&self) -> usize {
        match self.running.lock().as_ref() {
            Some(state) => state.slots.len(),
            None => self.config.resolved_worker_count(),
        }
    }

    fn post(&self, control: Control) {
        let guard = self.running.lock();
        let Some(state) = guard.as_ref() else {
            tracing::warn!("Server is not listening; request dropped");
            return;
        };
        if state.control.send(control).is_err() || state.is_dead() {
            tracing::warn!("Acceptor has stopped; request dropped");
            return;
        }
        if let Err(e) = state.waker.wake() {
            tracing::warn!("Failed to wake acceptor: {}", e);
        }
    }

    fn report(&self, err: LinkError) {
        tracing::warn!("{}", err);
        self.events.emit(ServerEvent::ErrorOccurred {
            message: err.to_string(),
        });
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_server();
    }
}

/// The acceptor thread: listener, router and event republishing
struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    router: ConnectionRouter,
    inbox: Receiver<Control>,
    events: Arc<dyn EventSink<ServerEvent>>,
    nodelay: bool,
}

impl Acceptor {
    /// Returns true when stopped on request
    fn run(mut self) -> bool {
        self.events.emit(ServerEvent::Started {
            port: self.local_addr.port(),
        });

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut requested = false;
        'reactor: loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Acceptor poll failed: {}", e);
                self.report(e.to_string());
                break;
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_pending();
                }
            }

            loop {
                match self.inbox.try_recv() {
                    Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                        requested = true;
                        break 'reactor;
                    }
                    Ok(control) => self.handle(control),
                    Err(TryRecvError::Empty) => break,
                }
            }
        }

        let _ = self.poll.registry().deregister(&mut self.listener);
        self.router.stop();

        if !requested {
            self.events.emit(ServerEvent::Stopped);
            tracing::warn!("Server stopped after acceptor failure");
        }
        requested
    }

    /// Accept until the listener would block; every connection is admitted
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted connection from {}", peer);
                    if self.nodelay {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                    }
                    if let Err(e) = self.router.add_connection(stream) {
                        self.report(e.to_string());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    self.report(format!("accept failed: {}", e));
                    break;
                }
            }
        }
    }

    fn handle(&mut self, control: Control) {
        match control {
            Control::Send { id, text } => self.router.send_to(id, text),
            Control::Broadcast { text } => {
                tracing::debug!("Broadcasting {} bytes", text.len());
                self.router.broadcast(&text);
            }
            Control::Disconnect { id } => self.router.disconnect(id),
            Control::Session(event) => self.republish(event),
            Control::Stop => {}
        }
    }

    fn republish(&mut self, event: SessionEvent) {
        let public = match event {
            SessionEvent::Connected { id, address } => ServerEvent::ClientConnected { id, address },
            SessionEvent::Message { id, text } => ServerEvent::MessageReceived { id, text },
            SessionEvent::Disconnected { id } => {
                self.router.on_connection_closed(id);
                ServerEvent::ClientDisconnected { id }
            }
            SessionEvent::Error { id, message } => {
                tracing::debug!("Connection {} reported: {}", id, message);
                ServerEvent::ErrorOccurred { message }
            }
        };
        self.events.emit(public);
    }

    fn report(&self, message: String) {
        self.events.emit(ServerEvent::ErrorOccurred { message });
    }
}
