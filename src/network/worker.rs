//! I/O Worker
//!
//! One reactor thread owning a private set of sessions.
//!
//! ## Threading
//! - The session map and every session are touched only by the worker thread
//! - Other threads post `WorkerCommand`s over a channel and wake the poll
//! - The live-connection count is the only state read from outside, through
//!   an atomic in `WorkerSlot`

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::network::event::{ConnectionId, EventSink, SessionEvent};
use crate::network::session::ConnectionSession;

/// Token reserved for cross-thread wake-ups
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness events handled per poll call
const EVENTS_CAPACITY: usize = 1024;

/// Live-connection gauge of one worker
///
/// Written only by the owning worker thread; anyone may read a snapshot.
#[derive(Debug)]
pub struct WorkerSlot {
    worker_id: usize,
    live: AtomicUsize,
}

impl WorkerSlot {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            live: AtomicUsize::new(0),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Snapshot of the worker's live connections
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Messages marshalled onto a worker thread
pub(crate) enum WorkerCommand {
    Add { id: ConnectionId, stream: TcpStream },
    Send { id: ConnectionId, text: String },
    Broadcast { text: Arc<str> },
    Disconnect { id: ConnectionId },
    Cleanup,
    Shutdown,
}

/// Handle to a running worker
///
/// Every operation only enqueues a command; none of them block the caller.
pub struct IoWorker {
    slot: Arc<WorkerSlot>,
    inbox: Sender<WorkerCommand>,
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    /// Start a worker thread
    ///
    /// Session events are emitted on the worker thread into `sink`.
    pub fn spawn(
        worker_id: usize,
        config: ServerConfig,
        sink: Arc<dyn EventSink<SessionEvent>>,
    ) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (inbox, commands) = unbounded();
        let slot = Arc::new(WorkerSlot::new(worker_id));

        let reactor = WorkerReactor {
            worker_id,
            poll,
            commands,
            sessions: HashMap::new(),
            slot: Arc::clone(&slot),
            sink,
            chunk: vec![0u8; config.read_chunk_size],
            outbox: Vec::new(),
            config,
        };

        let handle = thread::Builder::new()
            .name(format!("framelink-io-{}", worker_id))
            .spawn(move || reactor.run())?;

        Ok(Self {
            slot,
            inbox,
            waker,
            handle: Some(handle),
        })
    }

    /// Hand a freshly accepted socket to this worker
    pub fn add_connection(&self, id: ConnectionId, stream: TcpStream) {
        self.post(WorkerCommand::Add { id, stream });
    }

    pub fn send_to(&self, id: ConnectionId, text: String) {
        self.post(WorkerCommand::Send { id, text });
    }

    /// Send to every session this worker owns
    pub fn broadcast(&self, text: Arc<str>) {
        self.post(WorkerCommand::Broadcast { text });
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.post(WorkerCommand::Disconnect { id });
    }

    /// Force-close and forget every session without emitting events
    pub fn cleanup(&self) {
        self.post(WorkerCommand::Cleanup);
    }

    /// Stop the thread and wait for it to exit
    ///
    /// Must not be called from this worker's own thread.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            tracing::error!("Worker {} cannot join itself; leaving thread detached", self.id());
            return;
        }

        self.post(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Worker {} thread panicked", self.id());
        }
    }

    pub fn id(&self) -> usize {
        self.slot.worker_id()
    }

    pub fn connection_count(&self) -> usize {
        self.slot.live_connections()
    }

    pub fn slot(&self) -> Arc<WorkerSlot> {
        Arc::clone(&self.slot)
    }

    fn post(&self, command: WorkerCommand) {
        if self.inbox.send(command).is_err() {
            tracing::warn!("Worker {} has stopped; command dropped", self.id());
            return;
        }
        if let Err(e) = self.waker.wake() {
            tracing::warn!("Failed to wake worker {}: {}", self.id(), e);
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State living on the worker thread
struct WorkerReactor {
    worker_id: usize,
    poll: Poll,
    commands: Receiver<WorkerCommand>,
    sessions: HashMap<ConnectionId, ConnectionSession>,
    slot: Arc<WorkerSlot>,
    sink: Arc<dyn EventSink<SessionEvent>>,
    config: ServerConfig,

    /// Scratch buffer for socket reads, shared by all sessions
    chunk: Vec<u8>,

    /// Events produced by sessions, drained after every call into them
    outbox: Vec<SessionEvent>,
}

impl WorkerReactor {
    fn run(mut self) {
        tracing::debug!("Worker {} started", self.worker_id);

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Worker {} poll failed: {}", self.worker_id, e);
                break;
            }

            for event in events.iter() {
                if event.token() != WAKE_TOKEN {
                    self.on_socket_event(event);
                }
            }

            if !self.drain_commands() {
                break;
            }
        }

        self.cleanup();
        tracing::debug!("Worker {} stopped", self.worker_id);
    }

    fn on_socket_event(&mut self, event: &Event) {
        let id = ConnectionId::new(event.token().0 as u64);
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.on_ready(event, &mut self.chunk, &mut self.outbox);
        self.dispatch();
    }

    /// Returns false once the worker should exit
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Shutdown) => return false,
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Add { id, stream } => self.add_session(id, stream),
            WorkerCommand::Send { id, text } => match self.sessions.get_mut(&id) {
                Some(session) => session.send(&text, &mut self.outbox),
                None => tracing::warn!(
                    "Worker {}: connection {} does not exist",
                    self.worker_id,
                    id
                ),
            },
            WorkerCommand::Broadcast { text } => {
                for session in self.sessions.values_mut() {
                    session.send(&text, &mut self.outbox);
                }
                tracing::debug!(
                    "Worker {} broadcast to {} connections",
                    self.worker_id,
                    self.sessions.len()
                );
            }
            WorkerCommand::Disconnect { id } => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.disconnect(&mut self.outbox);
                }
            }
            WorkerCommand::Cleanup => self.cleanup(),
            WorkerCommand::Shutdown => {}
        }
        self.dispatch();
    }

    fn add_session(&mut self, id: ConnectionId, stream: TcpStream) {
        let session = ConnectionSession::new(id, stream, &self.config);
        self.sessions.insert(id, session);
        self.slot.live.fetch_add(1, Ordering::Release);

        if let Some(session) = self.sessions.get_mut(&id) {
            session.initialize(self.poll.registry(), &mut self.outbox);
        }

        tracing::debug!(
            "Worker {} added connection {}, now {}",
            self.worker_id,
            id,
            self.slot.live_connections()
        );
    }

    /// Forward session events; a disconnect first drops the session locally
    fn dispatch(&mut self) {
        let mut pending = std::mem::take(&mut self.outbox);
        for event in pending.drain(..) {
            if let SessionEvent::Disconnected { id } = event {
                self.remove_session(id);
            }
            self.sink.emit(event);
        }
        self.outbox = pending;
    }

    fn remove_session(&mut self, id: ConnectionId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.deregister(self.poll.registry());
            self.slot.live.fetch_sub(1, Ordering::Release);
            tracing::debug!(
                "Worker {} removed connection {}, now {}",
                self.worker_id,
                id,
                self.slot.live_connections()
            );
        }
    }

    fn cleanup(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        tracing::debug!("Worker {} closing {} connections", self.worker_id, self.sessions.len());
        for (_, mut session) in self.sessions.drain() {
            session.close_silently(self.poll.registry());
        }
        self.slot.live.store(0, Ordering::Release);
    }
}
