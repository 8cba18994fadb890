//! # Network Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! worker_threads = 2
//! receive_buffer_size = 262144
//! packetizer_capacity = 65536
//! listen_backlog = 1024
//! poll_capacity = 1024
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{NetError, NetResult};

/// Default number of completion worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Default size of a single receive operation's buffer (256 KiB).
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 256 * 1024;

/// Default initial allocation of a socket's packetizer stream.
pub const DEFAULT_PACKETIZER_CAPACITY: usize = 64 * 1024;

/// Default listen backlog.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 1024;

/// Default number of readiness events the driver handles per poll.
pub const DEFAULT_POLL_CAPACITY: usize = 1024;

/// Tunables for the I/O engine.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Worker threads draining the completion queue.
    pub worker_threads: usize,
    /// Bytes requested by each receive operation.
    pub receive_buffer_size: usize,
    /// Initial size of each socket's receive stream.
    pub packetizer_capacity: usize,
    /// Backlog passed to `listen()`.
    pub listen_backlog: i32,
    /// Readiness events handled per driver poll.
    pub poll_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            packetizer_capacity: DEFAULT_PACKETIZER_CAPACITY,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            poll_capacity: DEFAULT_POLL_CAPACITY,
        }
    }
}

impl NetworkConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| NetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NetError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> NetResult<()> {
        if self.worker_threads == 0 {
            return Err(NetError::Config("worker_threads must be at least 1".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(NetError::Config("receive_buffer_size must be non-zero".into()));
        }
        if self.packetizer_capacity == 0 {
            return Err(NetError::Config("packetizer_capacity must be non-zero".into()));
        }
        if self.listen_backlog <= 0 {
            return Err(NetError::Config("listen_backlog must be positive".into()));
        }
        if self.poll_capacity == 0 {
            return Err(NetError::Config("poll_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
