//! # Connection Establisher
//!
//! Server-side entry point: a listener whose accepted connections are
//! placed in a [`SocketContainer`].
//!
//! ```text
//!   ListenerSocket ──accept──► pending ids ──synchronise()──► container.create
//!                                                           ├─ disconnect ⇒ destroy slot
//!                                                           ├─ emit established(index)
//!                                                           └─ first receive
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use nfw_core::{ListenerId, MessageEvent};

use crate::container::SocketContainer;
use crate::engine::{Backend, SocketId};
use crate::error::NetResult;
use crate::socket::{Family, ListenerSocket, Protocol};

/// Accepts connections into a [`SocketContainer`].
#[derive(Debug)]
pub struct ConnectionEstablisher {
    listener: ListenerSocket,
    accepted: Rc<RefCell<VecDeque<SocketId>>>,
    established: MessageEvent<usize>,
}

impl ConnectionEstablisher {
    /// Creates an establisher for IPv4 TCP connections.
    #[must_use]
    pub fn new(backend: &Arc<Backend>) -> Self {
        Self::with_family(backend, Family::Inet4)
    }

    /// Creates an establisher for TCP connections of `family`.
    #[must_use]
    pub fn with_family(backend: &Arc<Backend>, family: Family) -> Self {
        let mut listener = ListenerSocket::new(backend, Protocol::Tcp, family);
        let accepted = Rc::new(RefCell::new(VecDeque::new()));
        let sink = Rc::clone(&accepted);
        listener.on_accept(move |id: &SocketId| sink.borrow_mut().push_back(*id));
        Self {
            listener,
            accepted,
            established: MessageEvent::new(),
        }
    }

    /// Binds and starts listening.
    pub fn listen(&mut self, address: &str, port: u16) -> NetResult<()> {
        self.listener.bind(address, port)?;
        self.listener.listen()
    }

    /// Bound address, with the real port.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// The underlying listener.
    #[inline]
    #[must_use]
    pub const fn listener(&self) -> &ListenerSocket {
        &self.listener
    }

    /// Listens for new connections. The argument is the container slot.
    pub fn on_established(&mut self, handler: impl FnMut(&usize) + 'static) -> ListenerId {
        self.established.listen(handler)
    }

    /// The established registry.
    #[inline]
    pub fn established_event(&mut self) -> &mut MessageEvent<usize> {
        &mut self.established
    }

    /// Moves every connection accepted since the last call into `container`.
    pub fn synchronise(&mut self, container: &mut SocketContainer) {
        self.listener.synchronise();

        loop {
            let Some(id) = self.accepted.borrow_mut().pop_front() else {
                break;
            };
            let index = container.create(id);
            let handle = container.handle();
            let Some(socket) = container.get_mut(index) else {
                continue;
            };
            socket.on_disconnect(move |_| handle.destroy(index));

            self.established.emit(&index);

            if let Some(socket) = container.get_mut(index) {
                if let Err(e) = socket.receive() {
                    tracing::warn!("Failed to start receiving on slot {}: {}", index, e);
                }
            }
            tracing::info!("Connection {} established in slot {}", id, index);
        }
    }
}
