//! # Asynchronous I/O Engine
//!
//! Completion-port style I/O on top of OS readiness.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Network                              │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐     ┌────────────────┐     ┌──────────────┐  │
//! │  │ Driver       │────►│ CompletionPort │────►│ Worker x N   │  │
//! │  │ (readiness)  │     │ (FIFO)         │     │ (dispatch)   │  │
//! │  └──────────────┘     └────────────────┘     └──────┬───────┘  │
//! │         ▲                     ▲                     │          │
//! │         │ retry               │ done now            ▼          │
//! │  ┌──────┴─────────────────────┴───────┐     ┌──────────────┐   │
//! │  │ Backend: id ──► SocketEntry        │────►│ SyncQueues   │   │
//! │  │   (handle, packetizer, pending io) │     │ (per socket) │   │
//! │  └────────────────────────────────────┘     └──────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations are attempted as soon as they are issued. A result that is
//! available right away is still posted to the port, so every operation
//! is dispatched by a worker. Sockets are referenced everywhere by their
//! [`SocketId`]; the [`Backend`] owns the table behind the ids.
//!
//! Lock order: an entry's mutex may be held while taking the table lock,
//! never the other way around.

mod driver;
mod entry;
mod port;
mod worker;

pub use port::OpId;
pub use worker::close_status;

pub(crate) use entry::{Handle, SocketEntry};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::net::TcpStream;
use mio::{Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::config::NetworkConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::Payload;
use entry::SocketState;
use port::CompletionPort;

/// Opaque handle of an open socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(i32);

impl SocketId {
    /// "No socket".
    pub const NONE: Self = Self(-1);

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw id, `-1` for [`SocketId::NONE`].
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns true for [`SocketId::NONE`] and any other negative id.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    fn from_index(index: usize) -> Self {
        Self(i32::try_from(index).unwrap_or(-1))
    }

    pub(crate) fn from_token(token: Token) -> Self {
        Self::from_index(token.0)
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id-indexed storage with id reuse.
#[derive(Debug, Default)]
struct SocketTable {
    entries: Vec<Option<Arc<SocketEntry>>>,
    free: Vec<usize>,
}

impl SocketTable {
    fn reserve(&mut self) -> usize {
        if let Some(index) = self.free.pop() {
            return index;
        }
        self.entries.push(None);
        self.entries.len() - 1
    }

    fn get(&self, id: SocketId) -> Option<Arc<SocketEntry>> {
        self.entries.get(id.index()?)?.clone()
    }

    fn take(&mut self, id: SocketId) -> Option<Arc<SocketEntry>> {
        self.entries.get_mut(id.index()?)?.take()
    }

    fn release(&mut self, id: SocketId) {
        if let Some(index) = id.index() {
            self.free.push(index);
        }
    }

    fn open_ids(&self) -> Vec<SocketId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .map(|(index, _)| SocketId::from_index(index))
            .collect()
    }
}

/// Shared state of the engine: socket table, completion port and
/// readiness registry.
///
/// Obtained from [`Network::backend`] and passed explicitly to every socket.
///
/// Every per-socket method locks that socket's entry. The lock is not
/// reentrant and is held while `IoSocket::synchronise` runs listeners, so a
/// listener must not call these methods for its own socket id. Use the
/// socket's [`SendHandle`](crate::SendHandle) or the container's
/// [`ContainerHandle`](crate::ContainerHandle) instead.
pub struct Backend {
    config: NetworkConfig,
    registry: Registry,
    waker: Waker,
    port: CompletionPort,
    table: Mutex<SocketTable>,
    next_op: AtomicU64,
    running: AtomicBool,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("sockets", &self.socket_count())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Engine configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// False once [`Network::shutdown`] has started.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of open socket ids.
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.table.lock().entries.iter().filter(|e| e.is_some()).count()
    }

    pub(crate) fn next_op(&self) -> OpId {
        OpId::next(&self.next_op)
    }

    pub(crate) fn entry(&self, id: SocketId) -> Option<Arc<SocketEntry>> {
        self.table.lock().get(id)
    }

    fn ensure_running(&self) -> NetResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(NetError::ShutDown)
        }
    }

    fn lookup(&self, id: SocketId) -> NetResult<Arc<SocketEntry>> {
        self.ensure_running()?;
        self.entry(id).ok_or(NetError::NoSocket)
    }

    /// Registers `handle` with the driver and gives it an id.
    pub(crate) fn open(&self, mut handle: Handle) -> NetResult<SocketId> {
        self.ensure_running()?;
        let mut table = self.table.lock();
        let index = table.reserve();
        let id = SocketId::from_index(index);
        if let Err(e) = handle.register(&self.registry, Token(index)) {
            table.release(id);
            return Err(NetError::SocketCreate(e));
        }
        let entry = Arc::new(SocketEntry::new(handle, self.config.packetizer_capacity));
        table.entries[index] = Some(entry);
        tracing::debug!("Opened socket {}", id);
        Ok(id)
    }

    pub(crate) fn adopt_stream(&self, stream: TcpStream) -> NetResult<SocketId> {
        // Accepted sockets are not guaranteed to inherit TCP_NODELAY.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        self.open(Handle::Stream(stream))
    }

    /// Closes the OS handle behind `id` and frees the id for reuse.
    ///
    /// Completions still in flight for it are dropped by the workers.
    pub fn close(&self, id: SocketId) {
        let Some(entry) = self.table.lock().take(id) else {
            return;
        };
        entry.state.lock().release(&self.registry);
        self.table.lock().release(id);
        tracing::debug!("Closed socket {}", id);
    }

    /// Issues the socket's receive.
    ///
    /// Returns false if a receive was already outstanding.
    pub fn receive(&self, id: SocketId) -> NetResult<bool> {
        let entry = self.lookup(id)?;
        let buffer = vec![0; self.config.receive_buffer_size].into_boxed_slice();
        let mut state = entry.state.lock();
        Ok(state.issue_receive(id, self, buffer))
    }

    /// Issues a fire-and-forget send.
    pub fn send(&self, id: SocketId, payload: Payload) -> NetResult<()> {
        let entry = self.lookup(id)?;
        entry.state.lock().issue_send(id, self, payload);
        Ok(())
    }

    /// Accepts every connection that is ready right now, then leaves an
    /// accept waiting. Returns the ids of the connections accepted here.
    pub fn accept(&self, id: SocketId) -> NetResult<Vec<SocketId>> {
        let entry = self.lookup(id)?;
        let mut state = entry.state.lock();
        if !state.handle.is_listener() {
            return Err(NetError::Misuse("accept on a socket that is not listening"));
        }
        let mut accepted = Vec::new();
        self.accept_ready(id, &mut state, |accepted_id| accepted.push(accepted_id));
        Ok(accepted)
    }

    pub(crate) fn accept_ready(&self, id: SocketId, state: &mut SocketState, mut on_accept: impl FnMut(SocketId)) {
        while let Some((stream, peer)) = state.issue_accept(id, self) {
            match self.adopt_stream(stream) {
                Ok(accepted_id) => {
                    tracing::info!("Accepted {} as socket {}", peer, accepted_id);
                    on_accept(accepted_id);
                }
                Err(e) => tracing::warn!("Failed to adopt connection from {}: {}", peer, e),
            }
        }
    }

    /// Local address of the socket.
    #[must_use]
    pub fn local_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.entry(id)?.state.lock().handle.local_addr()
    }

    /// Remote address of a connected socket.
    #[must_use]
    pub fn peer_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.entry(id)?.state.lock().handle.peer_addr()
    }

    /// Operations issued on the socket and not yet dispatched.
    #[must_use]
    pub fn pending_operations(&self, id: SocketId) -> usize {
        self.entry(id).map_or(0, |entry| entry.state.lock().pending.len())
    }

    /// True while the socket has a receive outstanding.
    #[must_use]
    pub fn has_pending_receive(&self, id: SocketId) -> bool {
        self.entry(id).is_some_and(|entry| entry.state.lock().pending.has_receive())
    }

    fn close_all(&self) {
        let ids = self.table.lock().open_ids();
        for id in ids {
            self.close(id);
        }
    }
}

/// Owner of the engine's threads.
///
/// Dropping it shuts the engine down.
#[derive(Debug)]
pub struct Network {
    backend: Arc<Backend>,
    driver: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Network {
    /// Starts the driver and `config.worker_threads` workers.
    pub fn start(config: NetworkConfig) -> NetResult<Self> {
        config.validate()?;

        let poll = Poll::new().map_err(NetError::Poll)?;
        let registry = poll.registry().try_clone().map_err(NetError::Poll)?;
        let waker = Waker::new(poll.registry(), driver::WAKE_TOKEN).map_err(NetError::Poll)?;
        let worker_count = config.worker_threads;

        let backend = Arc::new(Backend {
            config,
            registry,
            waker,
            port: CompletionPort::new(),
            table: Mutex::new(SocketTable::default()),
            next_op: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });
        let mut network = Self {
            backend,
            driver: None,
            workers: Vec::with_capacity(worker_count),
        };

        let driver_backend = Arc::clone(&network.backend);
        let driver = std::thread::Builder::new()
            .name("nfw-driver".into())
            .spawn(move || driver::run(&driver_backend, poll))
            .map_err(NetError::ThreadSpawn)?;
        network.driver = Some(driver);

        for index in 0..worker_count {
            let worker_backend = Arc::clone(&network.backend);
            let worker = std::thread::Builder::new()
                .name(format!("nfw-worker-{index}"))
                .spawn(move || worker::run(index, &worker_backend))
                .map_err(NetError::ThreadSpawn)?;
            network.workers.push(worker);
        }

        tracing::info!("Network started with {} completion workers", worker_count);
        Ok(network)
    }

    /// Handle to pass to sockets.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Stops every thread and closes all sockets still open. Idempotent.
    pub fn shutdown(&mut self) {
        if self.driver.is_none() && self.workers.is_empty() {
            return;
        }
        self.backend.running.store(false, Ordering::Release);

        self.backend.port.post_shutdown(self.workers.len());
        if let Err(e) = self.backend.waker.wake() {
            tracing::error!("Failed to wake readiness driver: {}", e);
        }

        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                tracing::error!("Readiness driver panicked");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Completion worker panicked");
            }
        }

        self.backend.close_all();
        tracing::info!("Network shut down");
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.shutdown();
    }
}
