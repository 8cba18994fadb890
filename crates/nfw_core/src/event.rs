//! # Two-Tier Events
//!
//! Worker threads produce, the simulation thread consumes.
//!
//! ```text
//!  worker threads               simulation thread (once per tick)
//!  ──────────────               ─────────────────────────────────
//!  EventQueue::push ──► FIFO ──► EventQueue::emit ──► MessageEvent listeners
//!     (thread-safe)                                     (plain closures)
//! ```
//!
//! Listener registration and invocation never pay for locking: the registry
//! is only ever touched by the thread that drains the queue.

use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender, TryIter};

/// Handle returned by [`MessageEvent::listen`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    /// Raw slot index of this listener.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

type Handler<M> = Box<dyn FnMut(&M)>;

/// Single-threaded registry of listeners for messages of type `M`.
///
/// Not `Send`: handlers may capture `Rc` state belonging to the game thread.
pub struct MessageEvent<M: ?Sized> {
    handlers: Vec<Option<Handler<M>>>,
}

impl<M: ?Sized> MessageEvent<M> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Registers a handler. Slots freed by [`ignore`](Self::ignore) are reused.
    pub fn listen<F>(&mut self, handler: F) -> ListenerId
    where
        F: FnMut(&M) + 'static,
    {
        let handler: Handler<M> = Box::new(handler);
        if let Some(index) = self.handlers.iter().position(Option::is_none) {
            self.handlers[index] = Some(handler);
            return ListenerId(index);
        }
        self.handlers.push(Some(handler));
        ListenerId(self.handlers.len() - 1)
    }

    /// Invokes every registered handler in registration order.
    pub fn emit(&mut self, message: &M) {
        for handler in self.handlers.iter_mut().flatten() {
            handler(message);
        }
    }

    /// Unregisters a handler. Unknown ids are ignored.
    pub fn ignore(&mut self, id: ListenerId) {
        if let Some(slot) = self.handlers.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Number of registry slots, including freed ones.
    #[must_use]
    pub fn listeners(&self) -> usize {
        self.handlers.len()
    }

    /// Number of currently registered handlers.
    #[must_use]
    pub fn active_listeners(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }
}

impl<M: ?Sized> Default for MessageEvent<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ?Sized> fmt::Debug for MessageEvent<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("listeners", &self.active_listeners())
            .finish()
    }
}

/// Thread-safe FIFO of messages waiting for the next synchronise pass.
#[derive(Debug)]
pub struct EventQueue<M> {
    sender: Sender<M>,
    receiver: Receiver<M>,
}

impl<M> EventQueue<M> {
    /// Creates an empty unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Appends a message. Callable from any thread.
    pub fn push(&self, message: M) {
        // Cannot fail: the queue owns its own receiver.
        let _ = self.sender.send(message);
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Pops queued messages in FIFO order until the queue is empty.
    pub fn drain(&self) -> TryIter<'_, M> {
        self.receiver.try_iter()
    }

    /// Drains the queue into `event`, one emission per message.
    pub fn emit(&self, event: &mut MessageEvent<M>) {
        for message in self.drain() {
            event.emit(&message);
        }
    }

    /// Drops every queued message.
    pub fn clear(&self) {
        self.drain().for_each(drop);
    }
}

impl<M> Default for EventQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}
