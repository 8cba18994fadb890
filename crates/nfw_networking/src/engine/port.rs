//! # Completion Port
//!
//! A single queue of finished operations shared by the driver (producer)
//! and the worker pool (consumers).
//!
//! ```text
//!   issue ──► OS call ──┬── done now ──────────────┐
//!                       └── would block ──► driver ┴──► CompletionPort ──► worker
//! ```
//!
//! Every operation record travels with its completion, so the bytes it
//! owns (send payload, receive block, accepted stream) are released only
//! once a worker has dispatched it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::TcpStream;

use super::SocketId;
use crate::protocol::Payload;

/// Process-unique id of one issued operation.
///
/// Never reused, so a completion that outlives its socket can be told
/// apart from operations issued on a socket that later got the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    /// Allocates the next id.
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// The operation record, carrying only what its kind needs.
#[derive(Debug)]
pub(crate) enum Operation {
    /// Outgoing bytes. `written` counts bytes already handed to the OS.
    Send {
        payload: Payload,
        written: usize,
    },
    /// Receive block, filled by the OS.
    Receive { buffer: Box<[u8]> },
    /// Accepted connection, `None` if the accept failed.
    Accept {
        accepted: Option<(TcpStream, SocketAddr)>,
    },
}

impl Operation {
    /// Short name for logs.
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Receive { .. } => "receive",
            Self::Accept { .. } => "accept",
        }
    }
}

/// A finished operation.
#[derive(Debug)]
pub(crate) struct Completion {
    /// Socket the operation was issued on.
    pub socket: SocketId,
    /// Id of the operation.
    pub op: OpId,
    /// Bytes transferred. Zero together with `error == None` is a graceful
    /// close by the peer.
    pub transferred: usize,
    /// OS error that ended the operation.
    pub error: Option<io::Error>,
    /// The operation record.
    pub operation: Operation,
}

/// What a worker pulls from the port.
#[derive(Debug)]
pub(crate) enum PortEvent {
    Completion(Completion),
    /// Stop one worker.
    Shutdown,
}

/// Multi-producer, multi-consumer completion queue.
#[derive(Debug)]
pub(crate) struct CompletionPort {
    sender: Sender<PortEvent>,
    receiver: Receiver<PortEvent>,
}

impl CompletionPort {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Queues a completion.
    pub(crate) fn post(&self, completion: Completion) {
        tracing::trace!(
            "Completion {} for socket {}: {} bytes ({})",
            completion.op.raw(),
            completion.socket,
            completion.transferred,
            completion.operation.kind()
        );
        // The port owns a receiver, so this cannot fail.
        let _ = self.sender.send(PortEvent::Completion(completion));
    }

    /// Queues one shutdown sentinel per worker.
    pub(crate) fn post_shutdown(&self, workers: usize) {
        for _ in 0..workers {
            let _ = self.sender.send(PortEvent::Shutdown);
        }
    }

    /// Blocks until something is queued.
    pub(crate) fn get(&self) -> PortEvent {
        self.receiver.recv().unwrap_or(PortEvent::Shutdown)
    }

    /// Number of queued entries.
    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_ids_are_unique() {
        let counter = AtomicU64::new(0);
        let a = OpId::next(&counter);
        let b = OpId::next(&counter);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_fifo_then_shutdown() {
        let port = CompletionPort::new();
        let counter = AtomicU64::new(0);
        for transferred in [3, 5] {
            port.post(Completion {
                socket: SocketId::from_raw(1),
                op: OpId::next(&counter),
                transferred,
                error: None,
                operation: Operation::Receive { buffer: vec![0; 8].into_boxed_slice() },
            });
        }
        port.post_shutdown(1);
        assert_eq!(port.len(), 3);

        let mut seen = Vec::new();
        while let PortEvent::Completion(completion) = port.get() {
            seen.push(completion.transferred);
        }
        assert_eq!(seen, vec![3, 5]);
    }
}
