//! # I/O Socket
//!
//! A connected socket as seen by game logic.
//!
//! Sends are queued on the game thread and issued to the engine during
//! `synchronise()`, so they can be requested from inside any listener.
//! Received data only ever reaches listeners from `synchronise()`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use mio::net::{TcpStream, UdpSocket};
use nfw_core::ListenerId;

use super::{AbstractSocket, CloseStatus, Family, Protocol, SocketEvents};
use crate::container::ContainerHandle;
use crate::engine::{Backend, Handle, SocketEntry, SocketId};
use crate::error::{NetError, NetResult};
use crate::protocol::{packet_payload, Payload, WritePacket};

/// Where a socket lives.
#[derive(Clone, Debug, Default)]
pub enum SocketLocation {
    /// Owned directly by game code.
    #[default]
    Standalone,
    /// Slot `index` of a [`SocketContainer`](crate::SocketContainer).
    Contained {
        /// Slot index.
        index: usize,
        /// The owning container.
        container: ContainerHandle,
    },
}

/// Game-thread queue of payloads waiting for the next flush.
///
/// Cloneable so listeners can capture it.
#[derive(Clone, Default)]
pub struct SendHandle {
    queue: Rc<RefCell<VecDeque<Payload>>>,
}

impl SendHandle {
    /// Queues a payload.
    pub fn send(&self, payload: Payload) {
        self.queue.borrow_mut().push_back(payload);
    }

    /// Serializes and queues a packet.
    pub fn send_packet<P: WritePacket + ?Sized>(&self, packet: &P) {
        self.send(packet_payload(packet));
    }

    /// Number of queued payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn take(&self) -> VecDeque<Payload> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    fn clear(&self) {
        self.queue.borrow_mut().clear();
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle").field("queued", &self.len()).finish()
    }
}

/// A connected, bidirectional socket.
#[derive(Debug)]
pub struct IoSocket {
    socket: AbstractSocket,
    events: SocketEvents,
    outbox: SendHandle,
    location: SocketLocation,
    remote: Option<SocketAddr>,
}

impl IoSocket {
    /// Creates an unconnected socket.
    #[must_use]
    pub fn new(backend: &Arc<Backend>, protocol: Protocol, family: Family) -> Self {
        Self {
            socket: AbstractSocket::new(backend, protocol, family),
            events: SocketEvents::default(),
            outbox: SendHandle::default(),
            location: SocketLocation::Standalone,
            remote: None,
        }
    }

    /// Creates an unconnected IPv4 TCP socket.
    #[must_use]
    pub fn tcp(backend: &Arc<Backend>) -> Self {
        Self::new(backend, Protocol::Tcp, Family::Inet4)
    }

    /// Wraps an already open (accepted) socket id.
    #[must_use]
    pub fn adopt(backend: &Arc<Backend>, id: SocketId, location: SocketLocation) -> Self {
        let family = backend
            .local_addr(id)
            .map_or(Family::Inet4, |addr| Family::of(&addr));
        let mut socket = Self::new(backend, Protocol::Tcp, family);
        socket.socket.set_id(id);
        socket.remote = backend.peer_addr(id);
        socket.location = location;
        socket
    }

    /// Current id, [`SocketId::NONE`] when not connected.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SocketId {
        self.socket.id()
    }

    /// True while the socket has an id.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.socket.is_open()
    }

    /// Identity and configuration.
    #[inline]
    #[must_use]
    pub const fn abstract_socket(&self) -> &AbstractSocket {
        &self.socket
    }

    /// Where this socket lives.
    #[inline]
    #[must_use]
    pub const fn location(&self) -> &SocketLocation {
        &self.location
    }

    /// Address of the peer, if ever connected.
    #[inline]
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Local address while connected.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.backend().local_addr(self.id())
    }

    /// Listener registries.
    #[inline]
    #[must_use]
    pub const fn events(&self) -> &SocketEvents {
        &self.events
    }

    /// Listener registries, for registration.
    #[inline]
    pub fn events_mut(&mut self) -> &mut SocketEvents {
        &mut self.events
    }

    /// Listens for raw received bytes.
    pub fn on_stream(&mut self, handler: impl FnMut(&[u8]) + 'static) -> ListenerId {
        self.events.stream.listen(handler)
    }

    /// Listens for framed message bodies.
    pub fn on_packet(&mut self, handler: impl FnMut(&[u8]) + 'static) -> ListenerId {
        self.events.packet.listen(handler)
    }

    /// Listens for the end of the connection.
    pub fn on_disconnect(&mut self, handler: impl FnMut(&CloseStatus) + 'static) -> ListenerId {
        self.events.disconnect.listen(handler)
    }

    /// Resolves and connects, then issues the first receive.
    pub fn connect(&mut self, address: &str, port: u16) -> NetResult<()> {
        let addr = self.socket.resolve(address, port)?;
        self.connect_addr(addr)
    }

    /// Connects again to the last address passed to `connect`.
    pub fn reconnect(&mut self) -> NetResult<()> {
        let addr = self
            .remote
            .ok_or(NetError::Misuse("reconnect before any connect"))?;
        self.connect_addr(addr)
    }

    /// Connects to `addr`, then issues the first receive.
    ///
    /// The connect itself blocks; everything after it is asynchronous.
    pub fn connect_addr(&mut self, addr: SocketAddr) -> NetResult<()> {
        if self.is_connected() {
            return Err(NetError::Misuse("connect on a connected socket"));
        }
        self.remote = Some(addr);

        let socket = self.socket.os_socket(&addr)?;
        let connect_error = |source: std::io::Error| {
            tracing::warn!("Failed to connect to {}: {}", addr, source);
            NetError::Connect { addr, source }
        };
        socket.connect(&addr.into()).map_err(connect_error)?;
        socket.set_nonblocking(true).map_err(connect_error)?;

        let handle = match self.socket.protocol() {
            Protocol::Tcp => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY: {}", e);
                }
                Handle::Stream(TcpStream::from_std(socket.into()))
            }
            Protocol::Udp => Handle::Datagram(UdpSocket::from_std(socket.into())),
        };

        let backend = Arc::clone(self.socket.backend());
        let id = backend.open(handle)?;
        self.socket.set_id(id);
        backend.receive(id)?;
        tracing::info!("Socket {} connected to {}", id, addr);
        Ok(())
    }

    /// Issues the receive if none is outstanding.
    ///
    /// Returns false if one already was.
    pub fn receive(&self) -> NetResult<bool> {
        if !self.is_connected() {
            return Err(NetError::NoSocket);
        }
        self.socket.backend().receive(self.id())
    }

    /// Queues a fire-and-forget send. Issued at the next flush.
    pub fn send(&self, payload: Payload) {
        self.outbox.send(payload);
    }

    /// Serializes and queues a packet.
    pub fn send_packet<P: WritePacket + ?Sized>(&self, packet: &P) {
        self.outbox.send_packet(packet);
    }

    /// Handle onto this socket's send queue, for use inside listeners.
    #[must_use]
    pub fn send_handle(&self) -> SendHandle {
        self.outbox.clone()
    }

    /// Issues every queued send now.
    pub fn flush(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        let Some(entry) = self.entry() else {
            self.outbox.clear();
            return;
        };
        let mut state = entry.state.lock();
        for payload in self.outbox.take() {
            state.issue_send(self.id(), self.socket.backend(), payload);
        }
    }

    fn entry(&self) -> Option<Arc<SocketEntry>> {
        if self.is_connected() {
            self.socket.backend().entry(self.id())
        } else {
            None
        }
    }

    /// Delivers everything the workers queued since the last call.
    ///
    /// A queued disconnect wins: it is emitted, the socket is closed and
    /// nothing else is delivered. Otherwise queued sends are issued, then
    /// stream and packet events are emitted in arrival order, then the
    /// receive buffer is compacted.
    ///
    /// Stream and packet listeners run with this socket's entry locked.
    /// They must not call [`Backend`] methods for this socket's id, which
    /// would deadlock; queue sends through a [`SendHandle`] instead.
    pub fn synchronise(&mut self) {
        let Some(entry) = self.entry() else {
            self.outbox.clear();
            return;
        };
        let id = self.id();
        let backend = Arc::clone(self.socket.backend());
        let mut state = entry.state.lock();

        let disconnect = entry.queues.disconnect.drain().next();
        if let Some(status) = disconnect {
            tracing::info!("Socket {} disconnected: {}", id, status);
            self.events.disconnect.emit(&status);
            drop(state);
            self.disconnect();
            return;
        }

        for payload in self.outbox.take() {
            state.issue_send(id, &backend, payload);
        }
        for received in entry.queues.stream.drain() {
            self.events.stream.emit(state.packetizer.get(received));
        }
        for body in entry.queues.packet.drain() {
            self.events.packet.emit(state.packetizer.get(body));
        }
        state.packetizer.clean();

        // Replies queued by the listeners above
        for payload in self.outbox.take() {
            state.issue_send(id, &backend, payload);
        }
    }

    /// Closes the connection. A contained socket also frees its slot at the
    /// container's next `synchronise()`.
    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        self.socket.close();
        self.outbox.clear();
        if let SocketLocation::Contained { index, container } = &self.location {
            container.destroy(*index);
        }
    }
}
