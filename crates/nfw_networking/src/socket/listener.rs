//! # Listener Socket
//!
//! Binds, listens and keeps one accept waiting at all times. Connections
//! accepted by the workers arrive through the accept queue at the next
//! `synchronise()`; connections that are already waiting when `accept()`
//! is called are announced right away.

use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpListener;
use nfw_core::{ListenerId, MessageEvent};
use socket2::Socket;

use super::{AbstractSocket, Family, Protocol};
use crate::engine::{Backend, Handle, SocketId};
use crate::error::{NetError, NetResult};

/// A socket accepting connections.
#[derive(Debug)]
pub struct ListenerSocket {
    socket: AbstractSocket,
    /// Bound but not yet listening.
    bound: Option<Socket>,
    local: Option<SocketAddr>,
    accept: MessageEvent<SocketId>,
}

impl ListenerSocket {
    /// Creates an unbound listener.
    #[must_use]
    pub fn new(backend: &Arc<Backend>, protocol: Protocol, family: Family) -> Self {
        Self {
            socket: AbstractSocket::new(backend, protocol, family),
            bound: None,
            local: None,
            accept: MessageEvent::new(),
        }
    }

    /// Creates an unbound IPv4 TCP listener.
    #[must_use]
    pub fn tcp(backend: &Arc<Backend>) -> Self {
        Self::new(backend, Protocol::Tcp, Family::Inet4)
    }

    /// Current id, [`SocketId::NONE`] until listening.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SocketId {
        self.socket.id()
    }

    /// True once `listen()` succeeded.
    #[inline]
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.socket.is_open()
    }

    /// Identity and configuration.
    #[inline]
    #[must_use]
    pub const fn abstract_socket(&self) -> &AbstractSocket {
        &self.socket
    }

    /// Bound address. Reports the real port after binding to port 0.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Listens for accepted connections.
    pub fn on_accept(&mut self, handler: impl FnMut(&SocketId) + 'static) -> ListenerId {
        self.accept.listen(handler)
    }

    /// The accept registry.
    #[inline]
    pub fn accept_event(&mut self) -> &mut MessageEvent<SocketId> {
        &mut self.accept
    }

    /// Resolves and binds.
    pub fn bind(&mut self, address: &str, port: u16) -> NetResult<()> {
        let addr = self.socket.resolve(address, port)?;
        self.bind_addr(addr)
    }

    /// Binds again to the last bound address.
    pub fn rebind(&mut self) -> NetResult<()> {
        let addr = self.local.ok_or(NetError::Misuse("rebind before any bind"))?;
        self.bind_addr(addr)
    }

    /// Binds to `addr`.
    pub fn bind_addr(&mut self, addr: SocketAddr) -> NetResult<()> {
        if self.is_listening() {
            return Err(NetError::Misuse("bind on a listening socket"));
        }
        let socket = self.socket.os_socket(&addr)?;
        let bind_error = |source: std::io::Error| {
            tracing::warn!("Failed to bind {}: {}", addr, source);
            NetError::Bind { addr, source }
        };
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&addr.into()).map_err(bind_error)?;

        self.local = socket
            .local_addr()
            .ok()
            .and_then(|local| local.as_socket())
            .or(Some(addr));
        self.bound = Some(socket);
        Ok(())
    }

    /// Starts listening and issues the first accept.
    pub fn listen(&mut self) -> NetResult<()> {
        if self.socket.protocol() != Protocol::Tcp {
            return Err(NetError::Misuse("listen on a datagram socket"));
        }
        let socket = self
            .bound
            .take()
            .ok_or(NetError::Misuse("listen before bind"))?;

        let backlog = self.socket.backend().config().listen_backlog;
        socket.listen(backlog).map_err(|e| {
            tracing::warn!("Failed to listen: {}", e);
            NetError::Listen(e)
        })?;
        socket.set_nonblocking(true).map_err(NetError::Listen)?;

        let backend = Arc::clone(self.socket.backend());
        let id = backend.open(Handle::Listener(TcpListener::from_std(socket.into())))?;
        self.socket.set_id(id);
        if let Some(addr) = self.local {
            tracing::info!("Socket {} listening on {}", id, addr);
        }

        self.accept()?;
        Ok(())
    }

    /// Accepts every connection the OS has ready and leaves one accept
    /// waiting.
    ///
    /// Connections accepted here are emitted immediately; returns how many.
    /// A connection the driver picks up first is emitted by `synchronise()`
    /// instead.
    pub fn accept(&mut self) -> NetResult<usize> {
        if !self.is_listening() {
            return Err(NetError::NoSocket);
        }
        let accepted = self.socket.backend().accept(self.id())?;
        for id in &accepted {
            self.accept.emit(id);
        }
        Ok(accepted.len())
    }

    /// Emits the connections accepted by the workers since the last call.
    pub fn synchronise(&mut self) {
        if !self.is_listening() {
            return;
        }
        let Some(entry) = self.socket.backend().entry(self.id()) else {
            return;
        };
        for id in entry.queues.accept.drain() {
            self.accept.emit(&id);
        }
    }

    /// Stops listening.
    pub fn close(&mut self) {
        self.bound = None;
        self.socket.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::engine::Network;

    #[test]
    fn test_listen_requires_bind() {
        let network = Network::start(NetworkConfig::default()).unwrap();
        let mut listener = ListenerSocket::tcp(network.backend());
        assert!(matches!(listener.listen(), Err(NetError::Misuse(_))));
        assert!(matches!(listener.accept(), Err(NetError::NoSocket)));
    }

    #[test]
    fn test_listen_on_udp_is_misuse() {
        let network = Network::start(NetworkConfig::default()).unwrap();
        let mut listener = ListenerSocket::new(network.backend(), Protocol::Udp, Family::Inet4);
        listener.bind("127.0.0.1", 0).unwrap();
        assert!(matches!(listener.listen(), Err(NetError::Misuse(_))));
    }

    #[test]
    fn test_ephemeral_port_is_reported() {
        let network = Network::start(NetworkConfig::default()).unwrap();
        let mut listener = ListenerSocket::tcp(network.backend());
        listener.bind("127.0.0.1", 0).unwrap();
        listener.listen().unwrap();

        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(listener.is_listening());
        assert_eq!(network.backend().socket_count(), 1);

        listener.close();
        assert_eq!(network.backend().socket_count(), 0);
    }

    #[test]
    fn test_accept_keeps_one_waiting() {
        let network = Network::start(NetworkConfig::default()).unwrap();
        let mut listener = ListenerSocket::tcp(network.backend());
        listener.bind("127.0.0.1", 0).unwrap();
        listener.listen().unwrap();

        for _ in 0..3 {
            assert_eq!(listener.accept().unwrap(), 0);
        }
        assert_eq!(network.backend().pending_operations(listener.id()), 1);
    }

    #[test]
    fn test_accepted_connection_is_emitted() {
        let network = Network::start(NetworkConfig::default()).unwrap();
        let mut listener = ListenerSocket::tcp(network.backend());
        listener.bind("127.0.0.1", 0).unwrap();
        listener.listen().unwrap();
        let addr = listener.local_addr().unwrap();

        let accepted = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&accepted);
        listener.on_accept(move |id| sink.borrow_mut().push(*id));

        let _client = std::net::TcpStream::connect(addr).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while accepted.borrow().is_empty() && std::time::Instant::now() < deadline {
            listener.accept().unwrap();
            listener.synchronise();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(accepted.borrow().len(), 1);
    }
}
