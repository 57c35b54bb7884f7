//! Connection Router
//!
//! Owns the worker pool and the table of which worker owns which connection.
//!
//! The router is single-threaded: it lives on the acceptor thread and is the
//! only writer of the routing table. Workers never touch the table; they
//! report disconnects as events and the router's owner calls
//! `on_connection_closed` when one arrives.

use std::collections::HashMap;
use std::sync::Arc;

use mio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::{LinkError, Result};
use crate::network::event::{ConnectionId, EventSink, SessionEvent};
use crate::network::worker::{IoWorker, WorkerSlot};

/// Round-robin dispatcher over a fixed set of I/O workers
pub struct ConnectionRouter {
    config: ServerConfig,

    /// Worker arena, created by `start` and torn down by `stop`
    workers: Vec<IoWorker>,

    /// Connection → index of the owning worker
    routes: HashMap<ConnectionId, usize>,

    /// Monotonic placement counter; ignores current worker load
    next_worker: u64,
}

impl ConnectionRouter {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            routes: HashMap::new(),
            next_worker: 0,
        }
    }

    /// Spawn the worker pool
    ///
    /// Calling `start` on a running router logs a warning and does nothing.
    pub fn start(&mut self, sink: Arc<dyn EventSink<SessionEvent>>) -> Result<()> {
        if !self.workers.is_empty() {
            tracing::warn!("Router already started with {} workers", self.workers.len());
            return Ok(());
        }
        self.config.validate()?;

        let count = self.config.resolved_worker_count();
        self.workers.reserve(count);
        for worker_id in 0..count {
            match IoWorker::spawn(worker_id, self.config.clone(), Arc::clone(&sink)) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    tracing::error!("Failed to spawn worker {}: {}", worker_id, e);
                    self.stop();
                    return Err(e);
                }
            }
        }

        tracing::debug!("Router started with {} workers", count);
        Ok(())
    }

    /// Stop every worker and forget all routes
    ///
    /// Blocks until each worker thread exits. Never call this from a worker
    /// thread.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::debug!("Router stopping {} workers", self.workers.len());

        for worker in &self.workers {
            worker.cleanup();
        }
        for worker in &mut self.workers {
            worker.stop();
        }

        self.workers.clear();
        self.routes.clear();
        self.next_worker = 0;
        tracing::debug!("Router stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Place a new connection on the next worker in turn
    ///
    /// The route is recorded before the socket is handed over, so a send
    /// issued right after this returns already finds its worker.
    pub fn add_connection(&mut self, stream: TcpStream) -> Result<ConnectionId> {
        if self.workers.is_empty() {
            return Err(LinkError::StateConflict("no I/O workers are running".to_string()));
        }

        let index = (self.next_worker % self.workers.len() as u64) as usize;
        self.next_worker = self.next_worker.wrapping_add(1);

        let id = ConnectionId::next();
        self.routes.insert(id, index);
        self.workers[index].add_connection(id, stream);

        tracing::debug!("Assigned connection {} to worker {}", id, index);
        Ok(id)
    }

    /// Forward a message to the worker owning `id`
    ///
    /// Unknown ids are only logged; the message is dropped.
    pub fn send_to(&self, id: ConnectionId, text: String) {
        match self.routes.get(&id) {
            Some(&index) => self.workers[index].send_to(id, text),
            None => tracing::warn!("{}; message dropped", LinkError::UnknownTarget(id)),
        }
    }

    /// Ask every worker to send `text` to all of its connections
    pub fn broadcast(&self, text: &str) {
        let shared: Arc<str> = Arc::from(text);
        for worker in &self.workers {
            worker.broadcast(Arc::clone(&shared));
        }
    }

    pub fn disconnect(&self, id: ConnectionId) {
        match self.routes.get(&id) {
            Some(&index) => self.workers[index].disconnect(id),
            None => tracing::warn!("{}; disconnect ignored", LinkError::UnknownTarget(id)),
        }
    }

    /// Drop the route of a connection its worker has already removed
    pub fn on_connection_closed(&mut self, id: ConnectionId) -> bool {
        self.routes.remove(&id).is_some()
    }

    /// Index of the worker owning `id`
    pub fn owner_of(&self, id: ConnectionId) -> Option<usize> {
        self.routes.get(&id).copied()
    }

    /// Sum of the workers' live counters
    ///
    /// Each counter is read independently, so under concurrent churn the
    /// total is a snapshot rather than an exact figure.
    pub fn total_connection_count(&self) -> usize {
        self.workers.iter().map(IoWorker::connection_count).sum()
    }

    /// Per-worker counters, readable from any thread
    pub fn slots(&self) -> Vec<Arc<WorkerSlot>> {
        self.workers.iter().map(IoWorker::slot).collect()
    }

    /// Workers in the running pool, or the configured size when stopped
    pub fn worker_count(&self) -> usize {
        if self.workers.is_empty() {
            self.config.resolved_worker_count()
        } else {
            self.workers.len()
        }
    }

    /// Number of connections currently in the routing table
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Drop for ConnectionRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
