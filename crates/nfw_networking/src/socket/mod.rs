//! # Socket Primitives
//!
//! Game-thread view of the sockets owned by the [`Backend`].
//!
//! - [`AbstractSocket`]: id plus protocol/family selection
//! - [`IoSocket`]: connected, bidirectional socket
//! - [`ListenerSocket`]: bind, listen and accept
//!
//! None of these types are `Send`. Their listener registries are plain
//! [`MessageEvent`]s fed only by `synchronise()`.

mod io;
mod listener;

pub use io::{IoSocket, SendHandle, SocketLocation};
pub use listener::ListenerSocket;

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use nfw_core::MessageEvent;
use socket2::{Domain, Socket, Type};

use crate::engine::{Backend, SocketId};
use crate::error::{NetError, NetResult};

/// Transport protocol of a socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Reliable byte stream.
    #[default]
    Tcp,
    /// Connected datagrams, each framed like a stream chunk.
    Udp,
}

/// Address family of a socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Family {
    /// IPv4.
    #[default]
    Inet4,
    /// IPv6.
    Inet6,
}

impl Family {
    /// Family of `addr`.
    #[must_use]
    pub const fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::Inet4,
            SocketAddr::V6(_) => Self::Inet6,
        }
    }
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// The peer closed the connection.
    Graceful,
    /// The connection was reset or aborted.
    Reset,
    /// The socket was not connected.
    NotConnected,
    /// Any other failure.
    Unknown,
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Graceful => "Disconnected gracefully",
            Self::Reset => "Connection reset",
            Self::NotConnected => "Not connected",
            Self::Unknown => "Unknown",
        })
    }
}

/// Listener registries of a connected socket.
#[derive(Debug, Default)]
pub struct SocketEvents {
    /// Raw bytes, once per receive completion.
    pub stream: MessageEvent<[u8]>,
    /// One framed body per message.
    pub packet: MessageEvent<[u8]>,
    /// The connection ended. Emitted at most once per connection.
    pub disconnect: MessageEvent<CloseStatus>,
}

/// Identity and configuration shared by every socket kind.
///
/// Closes its id when dropped.
#[derive(Debug)]
pub struct AbstractSocket {
    backend: Arc<Backend>,
    id: SocketId,
    protocol: Protocol,
    family: Family,
}

impl AbstractSocket {
    /// Creates a socket with no id.
    #[must_use]
    pub fn new(backend: &Arc<Backend>, protocol: Protocol, family: Family) -> Self {
        Self {
            backend: Arc::clone(backend),
            id: SocketId::NONE,
            protocol,
            family,
        }
    }

    /// Current id, [`SocketId::NONE`] when closed.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SocketId {
        self.id
    }

    /// Transport protocol.
    #[inline]
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Address family.
    #[inline]
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// True while the socket has an id.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.id.is_none()
    }

    /// The engine this socket belongs to.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub(crate) fn set_id(&mut self, id: SocketId) {
        self.id = id;
    }

    /// Hands the id back to the backend and forgets it.
    pub fn close(&mut self) {
        if self.is_open() {
            self.backend.close(self.id);
            self.id = SocketId::NONE;
        }
    }

    /// Resolves `address:port` to the first address of this socket's family.
    pub fn resolve(&self, address: &str, port: u16) -> NetResult<SocketAddr> {
        let resolved = (address, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(|addr| Family::of(addr) == self.family));
        resolved.ok_or_else(|| {
            tracing::warn!("Failed to get address info for {}:{}", address, port);
            NetError::Resolve {
                address: address.to_owned(),
                port,
            }
        })
    }

    /// Creates a blocking OS socket matching this configuration.
    pub(crate) fn os_socket(&self, addr: &SocketAddr) -> NetResult<Socket> {
        let (kind, protocol) = match self.protocol {
            Protocol::Tcp => (Type::STREAM, socket2::Protocol::TCP),
            Protocol::Udp => (Type::DGRAM, socket2::Protocol::UDP),
        };
        Socket::new(Domain::for_address(*addr), kind, Some(protocol)).map_err(|e| {
            tracing::warn!("Failed to create socket for {}: {}", addr, e);
            NetError::SocketCreate(e)
        })
    }
}

impl Drop for AbstractSocket {
    fn drop(&mut self) {
        self.close();
    }
}
