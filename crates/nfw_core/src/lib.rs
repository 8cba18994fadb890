//! # NFW Core
//!
//! Buffers and event plumbing shared by every NFW crate.
//!
//! - [`ByteStream`]: growable byte buffer with independent read/write
//!   cursors, usable as an owner or as a view over someone else's bytes
//! - [`MessageEvent`]: plain, single-threaded listener registry
//! - [`EventQueue`]: thread-safe FIFO drained into a `MessageEvent`
//!
//! ## Example
//!
//! ```rust
//! use nfw_core::ByteStream;
//!
//! let mut stream = ByteStream::new();
//! stream.write(7u32);
//! stream.write_str("hello");
//!
//! assert_eq!(stream.read::<u32>(), 7);
//! assert_eq!(stream.read_string(), "hello");
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod event;
pub mod stream;

pub use event::{EventQueue, ListenerId, MessageEvent};
pub use stream::ByteStream;
