//! # Socket Container
//!
//! Slot-based pool of connected sockets.
//!
//! ```text
//!   create(id) ──► slot from available_indices (or a new one) ──► active
//!   destroy(i) ──► destroy queue ──► (end of synchronise) ──► available
//! ```
//!
//! Destruction is deferred to the end of `synchronise()`, so a slot
//! destroyed by a listener stays valid for the rest of that pass.
//! Listeners reach the container through a [`ContainerHandle`], which
//! queues commands instead of touching the container directly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::engine::{Backend, SocketId};
use crate::protocol::{packet_payload, Payload, WritePacket};
use crate::socket::{IoSocket, SocketLocation};

#[derive(Debug)]
enum Command {
    Send { index: usize, payload: Payload },
    Broadcast { payload: Payload, except: Option<usize> },
    Destroy(usize),
}

/// Cloneable handle for queueing container operations from listeners.
///
/// Commands run at the container's next `synchronise()`, or right away
/// when the container itself is called.
#[derive(Clone, Default)]
pub struct ContainerHandle {
    commands: Rc<RefCell<Vec<Command>>>,
}

impl ContainerHandle {
    /// Queues a send to slot `index`.
    pub fn send(&self, index: usize, payload: Payload) {
        self.push(Command::Send { index, payload });
    }

    /// Queues a send to every active slot.
    pub fn broadcast(&self, payload: Payload) {
        self.push(Command::Broadcast { payload, except: None });
    }

    /// Queues a send to every active slot except `except`.
    pub fn broadcast_except(&self, payload: Payload, except: usize) {
        self.push(Command::Broadcast {
            payload,
            except: Some(except),
        });
    }

    /// Queues the destruction of slot `index`.
    pub fn destroy(&self, index: usize) {
        self.push(Command::Destroy(index));
    }

    fn push(&self, command: Command) {
        self.commands.borrow_mut().push(command);
    }

    fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("queued", &self.commands.borrow().len())
            .finish()
    }
}

/// Pool of connected sockets addressed by slot index.
#[derive(Debug)]
pub struct SocketContainer {
    backend: Arc<Backend>,
    sockets: Vec<IoSocket>,
    available_indices: VecDeque<usize>,
    active_indices: Vec<usize>,
    destroy_queue: Vec<usize>,
    handle: ContainerHandle,
}

impl SocketContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new(backend: &Arc<Backend>) -> Self {
        Self {
            backend: Arc::clone(backend),
            sockets: Vec::new(),
            available_indices: VecDeque::new(),
            active_indices: Vec::new(),
            destroy_queue: Vec::new(),
            handle: ContainerHandle::default(),
        }
    }

    /// Handle for queueing operations from listeners.
    #[must_use]
    pub fn handle(&self) -> ContainerHandle {
        self.handle.clone()
    }

    /// Places the open socket `id` in a slot and marks it active.
    pub fn create(&mut self, id: SocketId) -> usize {
        let index = self.available_indices.pop_front().unwrap_or(self.sockets.len());
        let location = SocketLocation::Contained {
            index,
            container: self.handle.clone(),
        };
        let socket = IoSocket::adopt(&self.backend, id, location);
        if index == self.sockets.len() {
            self.sockets.push(socket);
        } else {
            self.sockets[index] = socket;
        }
        self.active_indices.push(index);
        tracing::debug!("Socket {} placed in slot {}", id, index);
        index
    }

    /// Queues slot `index` for destruction at the end of the next
    /// `synchronise()`.
    pub fn destroy(&mut self, index: usize) {
        self.destroy_queue.push(index);
    }

    /// The socket in slot `index`, if the slot is active.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&IoSocket> {
        if self.is_active(index) {
            self.sockets.get(index)
        } else {
            None
        }
    }

    /// The socket in slot `index`, if the slot is active.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut IoSocket> {
        if self.is_active(index) {
            self.sockets.get_mut(index)
        } else {
            None
        }
    }

    /// True from `create()` until the destruction is processed.
    #[must_use]
    pub fn is_active(&self, index: usize) -> bool {
        self.active_indices.contains(&index)
    }

    /// Active slot indices, in creation order.
    #[inline]
    #[must_use]
    pub fn active_indices(&self) -> &[usize] {
        &self.active_indices
    }

    /// Number of active slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.active_indices.len()
    }

    /// Returns true if no slot is active.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_indices.is_empty()
    }

    /// Queues a send to slot `index`.
    pub fn send(&mut self, index: usize, payload: Payload) {
        if let Some(socket) = self.get(index) {
            socket.send(payload);
        }
    }

    /// Serializes `packet` once and queues it to every active slot.
    pub fn broadcast_packet<P: WritePacket + ?Sized>(&mut self, packet: &P) {
        self.broadcast(packet_payload(packet));
    }

    /// Queues `payload` to every active slot.
    pub fn broadcast(&mut self, payload: Payload) {
        self.stage_broadcast(&payload, None);
    }

    /// Queues `payload` to every active slot except `except`.
    pub fn broadcast_except(&mut self, payload: Payload, except: usize) {
        self.stage_broadcast(&payload, Some(except));
    }

    fn stage_broadcast(&self, payload: &Payload, except: Option<usize>) {
        for &index in &self.active_indices {
            if Some(index) != except {
                self.sockets[index].send(Arc::clone(payload));
            }
        }
    }

    fn apply_commands(&mut self) {
        for command in self.handle.take() {
            match command {
                Command::Send { index, payload } => self.send(index, payload),
                Command::Broadcast { payload, except } => self.stage_broadcast(&payload, except),
                Command::Destroy(index) => self.destroy(index),
            }
        }
    }

    /// Synchronises every active socket, then frees destroyed slots.
    ///
    /// Sends queued by listeners during the pass go out before it returns.
    pub fn synchronise(&mut self) {
        self.apply_commands();

        // Destruction is deferred, so the active list is stable here.
        for position in 0..self.active_indices.len() {
            let index = self.active_indices[position];
            self.sockets[index].synchronise();
        }

        self.apply_commands();
        for &index in &self.active_indices {
            self.sockets[index].flush();
        }

        for index in std::mem::take(&mut self.destroy_queue) {
            let Some(position) = self.active_indices.iter().position(|&i| i == index) else {
                continue;
            };
            self.active_indices.remove(position);
            self.available_indices.push_back(index);
            self.sockets[index] = IoSocket::tcp(&self.backend);
            tracing::debug!("Slot {} freed", index);
        }
    }
}
