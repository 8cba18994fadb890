//! # Completion Workers
//!
//! A fixed pool of threads blocking on the completion port. Dispatch locks
//! the socket's entry for its whole duration, so two completions of the
//! same socket never interleave their effects.

use std::io;
use std::sync::Arc;

use super::port::{Completion, Operation, PortEvent};
use super::Backend;
use crate::socket::CloseStatus;

/// Worker thread body. Returns when a shutdown sentinel is dequeued.
pub(crate) fn run(index: usize, backend: &Arc<Backend>) {
    tracing::info!("Completion worker {} started", index);
    loop {
        match backend.port.get() {
            PortEvent::Completion(completion) => dispatch(backend, completion),
            PortEvent::Shutdown => break,
        }
    }
    tracing::info!("Completion worker {} stopped", index);
}

/// Maps the error that ended an operation to the reason reported to game
/// logic. `None` means the peer closed the connection.
#[must_use]
pub fn close_status(error: Option<&io::Error>) -> CloseStatus {
    let Some(error) = error else {
        return CloseStatus::Graceful;
    };
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => CloseStatus::Reset,
        io::ErrorKind::NotConnected => CloseStatus::NotConnected,
        io::ErrorKind::UnexpectedEof => CloseStatus::Graceful,
        _ => CloseStatus::Unknown,
    }
}

/// Applies one completion to its socket.
pub(crate) fn dispatch(backend: &Backend, completion: Completion) {
    let Completion {
        socket: id,
        op,
        transferred,
        error,
        operation,
    } = completion;

    let Some(entry) = backend.entry(id) else {
        tracing::debug!("Dropping {} completion for closed socket {}", operation.kind(), id);
        return;
    };
    let mut state = entry.state.lock();
    if !state.pending.retire(op) {
        tracing::debug!(
            "Dropping stale {} completion {} for socket {}",
            operation.kind(),
            op.raw(),
            id
        );
        return;
    }

    match operation {
        Operation::Receive { buffer } => {
            if transferred == 0 {
                state.push_disconnect(&entry.queues, close_status(error.as_ref()));
                return;
            }
            let received = state.packetizer.write(&buffer[..transferred]);
            entry.queues.stream.push(received);
            state.packetizer.extract_ranges(|body| entry.queues.packet.push(body));
            state.issue_receive(id, backend, buffer);
        }
        Operation::Send { payload, written } => {
            if transferred == 0 {
                state.push_disconnect(&entry.queues, close_status(error.as_ref()));
                return;
            }
            tracing::trace!("Socket {} sent {}/{} bytes", id, written, payload.len());
        }
        Operation::Accept { accepted } => {
            match (accepted, error) {
                (Some((stream, peer)), _) => match backend.adopt_stream(stream) {
                    Ok(accepted_id) => {
                        tracing::info!("Accepted {} as socket {}", peer, accepted_id);
                        entry.queues.accept.push(accepted_id);
                    }
                    Err(e) => tracing::warn!("Failed to adopt connection from {}: {}", peer, e),
                },
                (None, Some(e)) => tracing::warn!("Accept on socket {} failed: {}", id, e),
                (None, None) => {}
            }
            backend.accept_ready(id, &mut state, |accepted_id| entry.queues.accept.push(accepted_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_status_mapping() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        let not_connected = io::Error::from(io::ErrorKind::NotConnected);
        let other = io::Error::from(io::ErrorKind::PermissionDenied);

        assert_eq!(close_status(None), CloseStatus::Graceful);
        assert_eq!(close_status(Some(&reset)), CloseStatus::Reset);
        assert_eq!(close_status(Some(&aborted)), CloseStatus::Reset);
        assert_eq!(close_status(Some(&not_connected)), CloseStatus::NotConnected);
        assert_eq!(close_status(Some(&other)), CloseStatus::Unknown);
    }
}
