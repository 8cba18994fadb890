//! # Readiness Driver
//!
//! Turns OS readiness into completions. Sockets are registered
//! edge-triggered; an operation that would block is parked in its socket's
//! pending set and the driver retries it, under the socket's lock, when the
//! socket becomes ready.

use std::io;
use std::sync::Arc;

use mio::{Events, Poll, Token};

use super::{Backend, SocketId};

/// Token reserved for waking the driver on shutdown.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// Driver thread body. Returns once the backend stops running.
pub(crate) fn run(backend: &Arc<Backend>, mut poll: Poll) {
    let mut events = Events::with_capacity(backend.config().poll_capacity);
    tracing::info!("Readiness driver started");

    while backend.is_running() {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!("Readiness poll failed: {}", e);
            break;
        }

        for event in &events {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let id = SocketId::from_token(event.token());
            let Some(entry) = backend.entry(id) else {
                tracing::trace!("Readiness for closed socket {}", id);
                continue;
            };

            let mut state = entry.state.lock();
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                state.on_readable(id, backend);
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                state.on_writable(id, backend);
            }
        }
    }

    tracing::info!("Readiness driver stopped");
}
