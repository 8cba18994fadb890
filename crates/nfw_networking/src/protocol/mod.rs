//! # Wire Protocol
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Magic (4) │ Body length (4)                                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Body (body length bytes)                                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bodies are produced by [`WritePacket`] implementations writing into a
//! [`ByteStream`]: fixed-width values verbatim, strings length-prefixed.
//! What a body means is up to the layer above.

mod packetizer;

use std::sync::Arc;

use nfw_core::ByteStream;

pub use packetizer::{end, start, start_with_magic, Packetizer, HEADER_SIZE, MAGIC};

/// Bytes handed to the engine for sending.
///
/// Reference counted so one serialized frame can feed many sends; the bytes
/// are released when the last send referencing them completes.
pub type Payload = Arc<[u8]>;

/// A message that knows how to serialize its body.
pub trait WritePacket {
    /// Writes the body into `stream`. The frame header is not written here.
    fn write(&self, stream: &mut ByteStream<'_>);
}

impl WritePacket for [u8] {
    fn write(&self, stream: &mut ByteStream<'_>) {
        stream.write_bytes(self);
    }
}

impl WritePacket for str {
    fn write(&self, stream: &mut ByteStream<'_>) {
        stream.write_str(self);
    }
}

impl<P: WritePacket + ?Sized> WritePacket for &P {
    fn write(&self, stream: &mut ByteStream<'_>) {
        (**self).write(stream);
    }
}

/// Serializes `packet` into a complete frame.
pub fn packet_stream<P: WritePacket + ?Sized>(packet: &P) -> ByteStream<'static> {
    let mut stream = ByteStream::new();
    let header = start(&mut stream);
    packet.write(&mut stream);
    end(&mut stream, header);
    stream
}

/// Serializes `packet` into a frame ready to send.
pub fn packet_payload<P: WritePacket + ?Sized>(packet: &P) -> Payload {
    packet_stream(packet).into_written().into()
}
