//! # Packetizer
//!
//! Frames a continuous byte stream into discrete messages.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────┐
//! │ magic (u32)  │ body len(u32)│ body (body len bytes)    │
//! └──────────────┴──────────────┴──────────────────────────┘
//! ```
//!
//! Both header fields are host byte order. On the send side [`start`] and
//! [`end`] bracket the body writes. On the receive side every received chunk
//! is appended with [`Packetizer::write`], complete messages are pulled out
//! with [`Packetizer::next_range`], and [`Packetizer::clean`] compacts the
//! buffer once the extracted bodies have been consumed.
//!
//! Extracted bodies are addressed by byte range so they survive buffer
//! growth. Only `clean()` moves bytes.

use std::ops::Range;

use nfw_core::ByteStream;

/// Magic value opening every frame (`"NFW1"` as a big-endian word).
pub const MAGIC: u32 = 0x4E46_5731;

/// Size of the framing header in bytes.
pub const HEADER_SIZE: usize = 2 * std::mem::size_of::<u32>();

const BODY_SIZE_OFFSET: usize = std::mem::size_of::<u32>();

/// Writes a header with a zero body length and returns its offset.
///
/// The returned offset must be handed to [`end`] once the body is written.
pub fn start(stream: &mut ByteStream<'_>) -> usize {
    start_with_magic(stream, MAGIC)
}

/// Like [`start`], with an explicit magic value.
pub fn start_with_magic(stream: &mut ByteStream<'_>, magic: u32) -> usize {
    let header_at = stream.write_index();
    stream.write(magic);
    stream.write(0u32);
    header_at
}

/// Backpatches the body length of the header written at `header_at`.
pub fn end(stream: &mut ByteStream<'_>, header_at: usize) {
    let write_index = stream.write_index();
    let body_size = write_index.saturating_sub(header_at + HEADER_SIZE);
    let body_size = u32::try_from(body_size).unwrap_or(u32::MAX);

    stream.set_write_index(header_at + BODY_SIZE_OFFSET);
    stream.write(body_size);
    stream.set_write_index(write_index);
}

/// Receive-side framing state for one socket.
#[derive(Debug)]
pub struct Packetizer {
    stream: ByteStream<'static>,
    magic: u32,
}

impl Packetizer {
    /// Creates a packetizer expecting [`MAGIC`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_magic(capacity, MAGIC)
    }

    /// Creates a packetizer expecting `magic`.
    #[must_use]
    pub fn with_magic(capacity: usize, magic: u32) -> Self {
        Self {
            stream: ByteStream::with_capacity(capacity),
            magic,
        }
    }

    /// Appends received bytes and returns the range they now occupy.
    pub fn write(&mut self, bytes: &[u8]) -> Range<usize> {
        let from = self.stream.write_index();
        self.stream.write_bytes(bytes);
        from..self.stream.write_index()
    }

    /// Extracts the next complete message, returning its body range.
    ///
    /// Returns `None` while the header or body is incomplete, and also when
    /// the leading bytes do not carry the magic value. In the latter case the
    /// read cursor skips a single byte so the next call scans from there.
    pub fn next_range(&mut self) -> Option<Range<usize>> {
        if self.stream.size_left_to_read() < HEADER_SIZE {
            return None;
        }

        // Magic first: a garbage length must not stall the scan.
        let header_at = self.stream.read_index();
        let magic = self.stream.peek::<u32>(header_at);
        if magic != self.magic {
            tracing::debug!(
                "Bad magic {:#010x} at offset {}, skipping one byte",
                magic,
                header_at
            );
            self.stream.move_read_index(1);
            return None;
        }

        let body_size = self.stream.peek::<u32>(header_at + BODY_SIZE_OFFSET) as usize;
        if HEADER_SIZE + body_size > self.stream.size_left_to_read() {
            return None;
        }

        let body_at = header_at + HEADER_SIZE;
        self.stream.set_read_index(body_at + body_size);
        Some(body_at..body_at + body_size)
    }

    /// Extracts every complete message body currently buffered.
    ///
    /// Unlike a loop over [`Packetizer::next_range`], a skipped garbage byte
    /// does not end the scan: it continues while the read index advances.
    pub fn extract_ranges(&mut self, mut sink: impl FnMut(Range<usize>)) {
        loop {
            let before = self.pending();
            match self.next_range() {
                Some(body) => sink(body),
                None if self.pending() < before => {}
                None => break,
            }
        }
    }

    /// Extracts the next complete message body.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&[u8]> {
        let range = self.next_range()?;
        Some(&self.stream.data()[range])
    }

    /// Bytes addressed by a range previously returned by this packetizer.
    ///
    /// Returns an empty slice if the range no longer fits the buffer.
    #[must_use]
    pub fn get(&self, range: Range<usize>) -> &[u8] {
        self.stream.data().get(range).unwrap_or(&[])
    }

    /// Moves unread bytes to the front of the buffer.
    ///
    /// Invalidates every range handed out so far.
    pub fn clean(&mut self) {
        self.stream.shift_read_to_begin();
    }

    /// Bytes received but not yet framed.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.stream.size_left_to_read()
    }

    /// Current allocation of the receive buffer.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.stream.size()
    }

    /// Expected magic value.
    #[inline]
    #[must_use]
    pub const fn magic(&self) -> u32 {
        self.magic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut stream = ByteStream::new();
        let header = start(&mut stream);
        stream.write_bytes(body);
        end(&mut stream, header);
        stream.into_written()
    }

    #[test]
    fn test_header_layout() {
        let bytes = frame(&[1, 2, 3]);
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(&bytes[..4], &MAGIC.to_ne_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_ne_bytes());
        assert_eq!(&bytes[8..], &[1, 2, 3]);
    }

    #[test]
    fn test_single_message() {
        let mut packetizer = Packetizer::new(64);
        packetizer.write(&frame(b"hello"));

        assert_eq!(packetizer.next(), Some(&b"hello"[..]));
        assert_eq!(packetizer.next(), None);
    }

    #[test]
    fn test_partial_header_and_body() {
        let bytes = frame(&[9; 20]);
        let mut packetizer = Packetizer::new(8);

        packetizer.write(&bytes[..5]);
        assert!(packetizer.next_range().is_none());
        packetizer.write(&bytes[5..12]);
        assert!(packetizer.next_range().is_none());
        packetizer.write(&bytes[12..]);

        let range = packetizer.next_range().unwrap();
        assert_eq!(packetizer.get(range), &[9; 20]);
    }

    #[test]
    fn test_multiple_messages_in_one_chunk() {
        let mut bytes = frame(&[1]);
        bytes.extend(frame(&[]));
        bytes.extend(frame(&[2, 2]));

        let mut packetizer = Packetizer::new(16);
        packetizer.write(&bytes);

        let bodies: Vec<Vec<u8>> = std::iter::from_fn(|| packetizer.next().map(<[u8]>::to_vec)).collect();
        assert_eq!(bodies, vec![vec![1], vec![], vec![2, 2]]);
    }

    #[test]
    fn test_bad_magic_skips_one_byte() {
        let mut bytes = vec![0xEE];
        bytes.extend(frame(&[5, 6]));

        let mut packetizer = Packetizer::new(32);
        packetizer.write(&bytes);

        assert!(packetizer.next().is_none());
        assert_eq!(packetizer.pending(), bytes.len() - 1);
        assert_eq!(packetizer.next(), Some(&[5, 6][..]));
    }

    #[test]
    fn test_extract_ranges_continues_past_garbage() {
        let mut bytes = vec![0xEE, 0x01];
        bytes.extend(frame(&[1, 2, 3]));
        bytes.push(0xEE);
        bytes.extend(frame(&[4]));

        let mut packetizer = Packetizer::new(64);
        packetizer.write(&bytes);
        let mut ranges = Vec::new();
        packetizer.extract_ranges(|range| ranges.push(range));

        assert_eq!(ranges.len(), 2);
        assert_eq!(packetizer.get(ranges[0].clone()), &[1, 2, 3]);
        assert_eq!(packetizer.get(ranges[1].clone()), &[4]);
        assert_eq!(packetizer.pending(), 0);
    }

    #[test]
    fn test_extract_ranges_stops_on_partial_frame() {
        let bytes = frame(&[9; 16]);
        let mut packetizer = Packetizer::new(64);
        packetizer.write(&[0xEE]);
        packetizer.write(&bytes[..12]);

        let mut count = 0;
        packetizer.extract_ranges(|_| count += 1);
        assert_eq!(count, 0);
        assert_eq!(packetizer.pending(), 12);

        packetizer.write(&bytes[12..]);
        packetizer.extract_ranges(|_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_ranges_survive_growth_until_clean() {
        let mut packetizer = Packetizer::new(4);
        packetizer.write(&frame(b"abc"));
        let first = packetizer.next_range().unwrap();

        packetizer.write(&[0u8; 1024]);
        assert_eq!(packetizer.get(first), b"abc");

        packetizer.clean();
        assert_eq!(packetizer.pending(), 1024);
    }

    #[test]
    fn test_clean_keeps_partial_message() {
        let bytes = frame(&[7; 10]);
        let mut packetizer = Packetizer::new(64);
        packetizer.write(&frame(&[1]));
        packetizer.write(&bytes[..6]);

        assert_eq!(packetizer.next(), Some(&[1][..]));
        assert!(packetizer.next().is_none());
        packetizer.clean();
        assert_eq!(packetizer.pending(), 6);

        packetizer.write(&bytes[6..]);
        assert_eq!(packetizer.next(), Some(&[7; 10][..]));
    }

    #[test]
    fn test_custom_magic() {
        let mut stream = ByteStream::new();
        let header = start_with_magic(&mut stream, 0xDEAD_BEEF);
        stream.write(42u16);
        end(&mut stream, header);

        let mut packetizer = Packetizer::with_magic(16, 0xDEAD_BEEF);
        packetizer.write(stream.written());
        assert_eq!(packetizer.next(), Some(&42u16.to_ne_bytes()[..]));
    }
}
