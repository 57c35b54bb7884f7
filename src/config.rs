//! Configuration for framelink
//!
//! Centralized configuration with sensible defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::protocol::MAX_FRAME_LEN;

/// Default per-connection cap on queued outbound bytes (64 MB)
pub const DEFAULT_MAX_PENDING_WRITE: usize = 64 * 1024 * 1024;

/// Default size of a single socket read (16 KB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Lower bound on the worker pool size when none is configured
pub const MIN_DEFAULT_WORKERS: usize = 4;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Listener Configuration
    // -------------------------------------------------------------------------
    /// Address the listening socket binds to (port comes from `start_server`)
    pub bind_addr: IpAddr,

    // -------------------------------------------------------------------------
    // Worker Pool Configuration
    // -------------------------------------------------------------------------
    /// Number of I/O reactors. `None` sizes the pool from host parallelism,
    /// never below `MIN_DEFAULT_WORKERS`.
    pub worker_count: Option<usize>,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Largest accepted frame payload (bytes)
    pub max_frame_len: usize,

    /// Max bytes queued for writing on one connection
    pub max_pending_write: usize,

    /// Bytes requested per read call
    pub read_chunk_size: usize,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            worker_count: None,
            max_frame_len: MAX_FRAME_LEN,
            max_pending_write: DEFAULT_MAX_PENDING_WRITE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Number of workers the router will spawn
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(count) => count,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_DEFAULT_WORKERS)
                .max(MIN_DEFAULT_WORKERS),
        }
    }

    /// Reject settings the reactors cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == Some(0) {
            return Err(LinkError::Config("worker_count must be at least 1".to_string()));
        }
        validate_limits(self.max_frame_len, self.max_pending_write, self.read_chunk_size)
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the bind address
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set an explicit worker count
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = Some(count);
        self
    }

    /// Set the maximum frame payload (in bytes)
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Set the outbound queue cap (in bytes)
    pub fn max_pending_write(mut self, len: usize) -> Self {
        self.config.max_pending_write = len;
        self
    }

    /// Set the read chunk size (in bytes)
    pub fn read_chunk_size(mut self, len: usize) -> Self {
        self.config.read_chunk_size = len;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    /// Reconnect automatically after an unrequested disconnect or failed connect
    pub auto_reconnect: bool,

    /// Fixed delay before each reconnect attempt
    pub reconnect_interval: Duration,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Largest accepted frame payload (bytes)
    pub max_frame_len: usize,

    /// Max bytes queued for writing
    pub max_pending_write: usize,

    /// Bytes requested per read call
    pub read_chunk_size: usize,

    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_frame_len: MAX_FRAME_LEN,
            max_pending_write: DEFAULT_MAX_PENDING_WRITE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        validate_limits(self.max_frame_len, self.max_pending_write, self.read_chunk_size)
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Enable or disable automatic reconnection
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.config.auto_reconnect = enable;
        self
    }

    /// Set the reconnect interval
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set the maximum frame payload (in bytes)
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Set the outbound queue cap (in bytes)
    pub fn max_pending_write(mut self, len: usize) -> Self {
        self.config.max_pending_write = len;
        self
    }

    /// Set the read chunk size (in bytes)
    pub fn read_chunk_size(mut self, len: usize) -> Self {
        self.config.read_chunk_size = len;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

fn validate_limits(max_frame_len: usize, max_pending_write: usize, read_chunk_size: usize) -> Result<()> {
    if max_frame_len == 0 || max_frame_len > u32::MAX as usize {
        return Err(LinkError::Config(format!(
            "max_frame_len must be within 1..={}",
            u32::MAX
        )));
    }
    if max_pending_write == 0 {
        return Err(LinkError::Config("max_pending_write must be non-zero".to_string()));
    }
    if read_chunk_size == 0 {
        return Err(LinkError::Config("read_chunk_size must be non-zero".to_string()));
    }
    Ok(())
}
