//! # Networking Errors
//!
//! Setup-time failures only. Steady-state failures never surface as a
//! `NetError`: they become disconnect events carrying a
//! [`CloseStatus`](crate::socket::CloseStatus).

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur while setting up sockets or the I/O engine.
#[derive(Debug, Error)]
pub enum NetError {
    /// The address/port pair did not resolve to anything usable.
    #[error("Failed to resolve {address}:{port}")]
    Resolve {
        /// Host name or literal address.
        address: String,
        /// Requested port.
        port: u16,
    },

    /// The OS refused to create the socket.
    #[error("Failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),

    /// Binding to a local address failed.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Local address.
        addr: SocketAddr,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// Switching a bound socket to listening failed.
    #[error("Failed to listen: {0}")]
    Listen(#[source] io::Error),

    /// Connecting to a remote peer failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Remote address.
        addr: SocketAddr,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// The socket has no id (never opened, or already disconnected).
    #[error("Socket has no id")]
    NoSocket,

    /// The operation does not apply to this socket's configuration.
    #[error("Invalid socket operation: {0}")]
    Misuse(&'static str),

    /// The I/O engine has been shut down.
    #[error("Network backend is shut down")]
    ShutDown,

    /// The readiness poller could not be created.
    #[error("Failed to create readiness poller: {0}")]
    Poll(#[source] io::Error),

    /// A worker or driver thread could not be started.
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// Configuration could not be loaded or failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
