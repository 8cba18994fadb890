//! # NFW Networking
//!
//! Completion-style asynchronous socket layer for the game client and
//! server.
//!
//! ## Architecture
//!
//! - **Protocol**: `[magic][body length][body]` framing over TCP
//! - **Engine**: a readiness driver feeds one completion queue drained by a
//!   fixed worker pool; workers never call game code
//! - **Synchronise pass**: once per tick the game thread drains each
//!   socket's queues and invokes plain, lock-free listeners
//! - **Container**: slot pool of connections with broadcast and deferred
//!   destruction
//!
//! ```text
//!  worker threads                        game thread (once per tick)
//!  ──────────────                        ───────────────────────────
//!  completion ─► lock socket ─► queues ─► synchronise() ─► listeners
//!                 (packetizer)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use nfw_networking::{ConnectionEstablisher, Network, NetworkConfig, SocketContainer};
//!
//! let network = Network::start(NetworkConfig::default())?;
//! let mut container = SocketContainer::new(network.backend());
//! let mut establisher = ConnectionEstablisher::new(network.backend());
//! establisher.listen("127.0.0.1", 9000)?;
//!
//! loop {
//!     establisher.synchronise(&mut container);
//!     container.synchronise();
//!     # break;
//! }
//! # Ok::<(), nfw_networking::NetError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod establisher;
pub mod protocol;
pub mod socket;
pub mod tick;

pub use config::NetworkConfig;
pub use container::{ContainerHandle, SocketContainer};
pub use engine::{Backend, Network, OpId, SocketId};
pub use error::{NetError, NetResult};
pub use establisher::ConnectionEstablisher;
pub use protocol::{packet_payload, packet_stream, Packetizer, Payload, WritePacket, MAGIC};
pub use socket::{
    AbstractSocket, CloseStatus, Family, IoSocket, ListenerSocket, Protocol, SendHandle,
    SocketEvents, SocketLocation,
};
pub use tick::{TickLoop, TickStats};

/// Default simulation tick rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 60;
