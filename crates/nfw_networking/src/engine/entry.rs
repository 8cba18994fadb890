//! # Socket Entries
//!
//! One entry per open socket id. The mutex guards everything worker
//! threads touch: the OS handle, the packetizer and the pending operation
//! records. The queues are thread-safe on their own and are only ever
//! pushed to while the mutex is held, so a socket's events keep the order
//! in which its completions were dispatched.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::ops::Range;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use nfw_core::EventQueue;
use parking_lot::Mutex;

use super::port::{Completion, OpId, Operation};
use super::{Backend, SocketId};
use crate::protocol::{Packetizer, Payload};
use crate::socket::CloseStatus;

/// The OS resource behind a socket id.
#[derive(Debug, Default)]
pub(crate) enum Handle {
    /// Closed, or never opened.
    #[default]
    None,
    /// Connected TCP stream.
    Stream(TcpStream),
    /// Connected UDP socket.
    Datagram(UdpSocket),
    /// Listening TCP socket.
    Listener(TcpListener),
}

impl Handle {
    fn interest(&self) -> Interest {
        match self {
            Self::Listener(_) => Interest::READABLE,
            _ => Interest::READABLE | Interest::WRITABLE,
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = self.interest();
        match self {
            Self::None => Ok(()),
            Self::Stream(stream) => registry.register(stream, token, interest),
            Self::Datagram(socket) => registry.register(socket, token, interest),
            Self::Listener(listener) => registry.register(listener, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Stream(stream) => registry.deregister(stream),
            Self::Datagram(socket) => registry.deregister(socket),
            Self::Listener(listener) => registry.deregister(listener),
        }
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stream(stream) => stream.read(buffer),
            Self::Datagram(socket) => socket.recv(buffer),
            Self::Listener(_) | Self::None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stream(stream) => stream.write(bytes),
            Self::Datagram(socket) => socket.send(bytes),
            Self::Listener(_) | Self::None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        match self {
            Self::Listener(listener) => listener.accept(),
            _ => Err(io::ErrorKind::InvalidInput.into()),
        }
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Stream(stream) => stream.local_addr().ok(),
            Self::Datagram(socket) => socket.local_addr().ok(),
            Self::Listener(listener) => listener.local_addr().ok(),
            Self::None => None,
        }
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Stream(stream) => stream.peer_addr().ok(),
            Self::Datagram(socket) => socket.peer_addr().ok(),
            Self::Listener(_) | Self::None => None,
        }
    }

    pub(crate) const fn is_listener(&self) -> bool {
        matches!(self, Self::Listener(_))
    }
}

/// Worker-to-simulation queues of one socket.
///
/// Stream and packet events are byte ranges into the socket's packetizer,
/// valid until the next `clean()`.
#[derive(Debug, Default)]
pub(crate) struct SyncQueues {
    pub stream: EventQueue<Range<usize>>,
    pub packet: EventQueue<Range<usize>>,
    pub disconnect: EventQueue<CloseStatus>,
    pub accept: EventQueue<SocketId>,
}

#[derive(Debug)]
struct WaitingSend {
    op: OpId,
    payload: Payload,
    written: usize,
}

/// Operations issued on a socket and not yet retired by a worker.
#[derive(Debug, Default)]
pub(crate) struct PendingIo {
    /// Every unretired operation, waiting or already completed.
    outstanding: Vec<OpId>,
    /// The single unretired receive.
    receive: Option<OpId>,
    waiting_receive: Option<(OpId, Box<[u8]>)>,
    waiting_sends: VecDeque<WaitingSend>,
    waiting_accept: Option<OpId>,
}

impl PendingIo {
    fn track(&mut self, op: OpId) {
        self.outstanding.push(op);
    }

    /// Removes `op` from the pending set. False if it was not there.
    pub(crate) fn retire(&mut self, op: OpId) -> bool {
        let Some(position) = self.outstanding.iter().position(|&o| o == op) else {
            return false;
        };
        self.outstanding.swap_remove(position);
        if self.receive == Some(op) {
            self.receive = None;
        }
        true
    }

    /// Number of unretired operations.
    pub(crate) fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// True while a receive is unretired.
    pub(crate) const fn has_receive(&self) -> bool {
        self.receive.is_some()
    }
}

/// Mutex-guarded state of one socket.
#[derive(Debug)]
pub(crate) struct SocketState {
    pub handle: Handle,
    pub packetizer: Packetizer,
    pub pending: PendingIo,
    /// A disconnect has been queued. Later failures are not reported again.
    pub disconnected: bool,
}

impl SocketState {
    fn post(backend: &Backend, socket: SocketId, op: OpId, result: io::Result<usize>, operation: Operation) {
        let (transferred, error) = match result {
            Ok(transferred) => (transferred, None),
            Err(error) => (0, Some(error)),
        };
        backend.port.post(Completion {
            socket,
            op,
            transferred,
            error,
            operation,
        });
    }

    /// Issues the socket's receive. No-op if one is already unretired.
    pub(crate) fn issue_receive(&mut self, id: SocketId, backend: &Backend, buffer: Box<[u8]>) -> bool {
        if let Some(op) = self.pending.receive {
            tracing::debug!("Socket {} already has receive {} pending", id, op.raw());
            return false;
        }
        let op = backend.next_op();
        self.pending.track(op);
        self.pending.receive = Some(op);
        self.try_receive(id, backend, op, buffer);
        true
    }

    fn try_receive(&mut self, id: SocketId, backend: &Backend, op: OpId, mut buffer: Box<[u8]>) {
        loop {
            match self.handle.recv(&mut buffer) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending.waiting_receive = Some((op, buffer));
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => {
                    Self::post(backend, id, op, result, Operation::Receive { buffer });
                    return;
                }
            }
        }
    }

    /// Queues a send behind any that are still waiting and writes what the
    /// OS accepts right now.
    pub(crate) fn issue_send(&mut self, id: SocketId, backend: &Backend, payload: Payload) {
        if payload.is_empty() {
            tracing::debug!("Ignoring empty send on socket {}", id);
            return;
        }
        let op = backend.next_op();
        self.pending.track(op);
        self.pending.waiting_sends.push_back(WaitingSend {
            op,
            payload,
            written: 0,
        });
        if self.pending.waiting_sends.len() == 1 {
            self.flush_sends(id, backend);
        }
    }

    fn flush_sends(&mut self, id: SocketId, backend: &Backend) {
        while let Some(front) = self.pending.waiting_sends.front_mut() {
            let result = self.handle.send(&front.payload[front.written..]);
            match result {
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(n) if n > 0 => {
                    front.written += n;
                    if front.written < front.payload.len() {
                        continue;
                    }
                }
                _ => {}
            }
            let Some(done) = self.pending.waiting_sends.pop_front() else {
                return;
            };
            // Report the whole payload on success, zero or the error otherwise.
            let result = result.map(|n| if n == 0 { 0 } else { done.written });
            let operation = Operation::Send {
                payload: done.payload,
                written: done.written,
            };
            Self::post(backend, id, done.op, result, operation);
        }
    }

    /// Accepts one connection if one is ready.
    ///
    /// Returns `None` once an accept is left waiting for readiness. At most
    /// one accept waits at a time; trying again while it waits is allowed.
    pub(crate) fn issue_accept(&mut self, id: SocketId, backend: &Backend) -> Option<(TcpStream, SocketAddr)> {
        loop {
            match self.handle.accept() {
                Ok(accepted) => return Some(accepted),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        tracing::warn!("Accept on socket {} failed: {}", id, e);
                    }
                    if self.pending.waiting_accept.is_some() {
                        return None;
                    }
                    let op = backend.next_op();
                    self.pending.track(op);
                    self.pending.waiting_accept = Some(op);
                    return None;
                }
            }
        }
    }

    /// Retries waiting receives and accepts. Called by the driver.
    pub(crate) fn on_readable(&mut self, id: SocketId, backend: &Backend) {
        if let Some((op, buffer)) = self.pending.waiting_receive.take() {
            self.try_receive(id, backend, op, buffer);
        }
        if let Some(op) = self.pending.waiting_accept {
            let accepted = loop {
                match self.handle.accept() {
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    result => break result,
                }
            };
            self.pending.waiting_accept = None;
            let (result, accepted) = match accepted {
                Ok(accepted) => (Ok(0), Some(accepted)),
                Err(e) => (Err(e), None),
            };
            Self::post(backend, id, op, result, Operation::Accept { accepted });
        }
    }

    /// Continues waiting sends. Called by the driver.
    pub(crate) fn on_writable(&mut self, id: SocketId, backend: &Backend) {
        self.flush_sends(id, backend);
    }

    /// Queues a disconnect unless one was queued already.
    pub(crate) fn push_disconnect(&mut self, queues: &SyncQueues, status: CloseStatus) {
        if !self.disconnected {
            self.disconnected = true;
            queues.disconnect.push(status);
        }
    }

    /// Closes the OS handle and drops every pending record.
    pub(crate) fn release(&mut self, registry: &Registry) {
        if let Err(e) = self.handle.deregister(registry) {
            tracing::debug!("Deregister failed: {}", e);
        }
        self.handle = Handle::None;
        self.pending = PendingIo::default();
    }
}

/// Everything the engine knows about one socket id.
#[derive(Debug)]
pub(crate) struct SocketEntry {
    pub state: Mutex<SocketState>,
    pub queues: SyncQueues,
}

impl SocketEntry {
    pub(crate) fn new(handle: Handle, packetizer_capacity: usize) -> Self {
        // Listeners never receive, so they get no buffer.
        let capacity = if handle.is_listener() { 0 } else { packetizer_capacity };
        Self {
            state: Mutex::new(SocketState {
                handle,
                packetizer: Packetizer::new(capacity),
                pending: PendingIo::default(),
                disconnected: false,
            }),
            queues: SyncQueues::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_retire_only_once() {
        let counter = AtomicU64::new(0);
        let mut pending = PendingIo::default();
        let a = OpId::next(&counter);
        let b = OpId::next(&counter);
        pending.track(a);
        pending.track(b);
        pending.receive = Some(a);

        assert!(pending.retire(a));
        assert!(!pending.has_receive());
        assert!(!pending.retire(a));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_disconnect_queued_once() {
        let entry = SocketEntry::new(Handle::None, 16);
        let mut state = entry.state.lock();
        state.push_disconnect(&entry.queues, CloseStatus::Reset);
        state.push_disconnect(&entry.queues, CloseStatus::Graceful);

        let statuses: Vec<_> = entry.queues.disconnect.drain().collect();
        assert_eq!(statuses, vec![CloseStatus::Reset]);
    }
}
