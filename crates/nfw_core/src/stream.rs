//! # Byte Stream Buffer
//!
//! Growable byte buffer with independent read and write cursors.
//!
//! ## Ownership Modes
//!
//! ```text
//! Owned      ──  the stream allocated the bytes and frees them on drop
//! Moved-from ──  what `std::mem::take` leaves behind: empty, owning nothing
//! View       ──  borrows bytes owned elsewhere, never frees them
//! ```
//!
//! A view is read-only. The first write into a view copies the viewed bytes
//! into an owned allocation, so the external memory is never mutated.
//!
//! ## Layout
//!
//! ```text
//! 0          read_index      write_index           size()
//! ├──────────────┼────────────────┼───────────────────┤
//! │  consumed    │    unread      │   free capacity   │
//! ```
//!
//! Invariant: `0 <= read_index <= write_index <= size()`.

use std::borrow::Cow;

use bytemuck::Pod;

/// Extra headroom added on every geometric growth step.
const GROWTH_SLACK: usize = 64;

/// Length prefix used for strings.
type StringLength = u32;

/// Growable byte buffer with independent read/write cursors.
///
/// Values are written verbatim in host byte order. Reads never fail: a read
/// past the written region yields a zeroed value and leaves the stream
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct ByteStream<'a> {
    /// The whole allocation. Its length is the stream capacity.
    data: Cow<'a, [u8]>,
    /// Next byte to read.
    read_index: usize,
    /// Next byte to write.
    write_index: usize,
}

impl ByteStream<'static> {
    /// Creates an empty owning stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an owning stream with `size` bytes of write capacity.
    #[must_use]
    pub fn with_capacity(size: usize) -> Self {
        let mut stream = Self::new();
        stream.allocate(size);
        stream
    }

    /// Adopts `bytes` as the stream storage. Everything is readable.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let write_index = bytes.len();
        Self {
            data: Cow::Owned(bytes),
            read_index: 0,
            write_index,
        }
    }

    /// Copies `bytes` into a new owning stream. Everything is readable.
    #[must_use]
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }
}

impl<'a> ByteStream<'a> {
    /// Wraps externally owned bytes without copying. Everything is readable.
    #[must_use]
    pub fn view(bytes: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(bytes),
            read_index: 0,
            write_index: bytes.len(),
        }
    }

    /// Returns true if the stream owns its memory.
    #[inline]
    #[must_use]
    pub fn is_owner(&self) -> bool {
        matches!(self.data, Cow::Owned(_))
    }

    /// Allocates `size` bytes. An existing allocation is resized instead.
    pub fn allocate(&mut self, size: usize) {
        if self.data.is_empty() {
            self.data = Cow::Owned(vec![0; size]);
            self.read_index = 0;
            self.write_index = 0;
        } else {
            self.resize(size);
        }
    }

    /// Resizes the allocation, preserving the bytes that still fit.
    ///
    /// Cursors keep their offsets and are clamped when the stream shrinks.
    pub fn resize(&mut self, new_size: usize) {
        self.data.to_mut().resize(new_size, 0);
        self.write_index = self.write_index.min(new_size);
        self.read_index = self.read_index.min(self.write_index);
    }

    /// Grows the allocation if fewer than `size_to_write` bytes are free.
    pub fn resize_if_needed(&mut self, size_to_write: usize) {
        if size_to_write > self.size_left_to_write() {
            // size() might be 0, so make sure the data fits comfortably
            self.resize(self.size() * 2 + size_to_write + GROWTH_SLACK);
        }
    }

    /// Releases the allocation and resets both cursors.
    pub fn free(&mut self) {
        *self = ByteStream::default();
    }

    /// Moves the unread bytes to offset 0.
    ///
    /// Used after the framed prefix of a stream has been consumed, so the
    /// partial remainder is read with a read index of 0.
    pub fn shift_read_to_begin(&mut self) {
        if self.read_index == 0 {
            return;
        }
        let unread = self.size_left_to_read();
        if unread > 0 {
            let (read, write) = (self.read_index, self.write_index);
            self.data.to_mut().copy_within(read..write, 0);
        }
        self.read_index = 0;
        self.write_index = unread;
    }

    /// Sets the read cursor, clamped to the written region.
    pub fn set_read_index(&mut self, index: usize) {
        self.read_index = index.min(self.write_index);
    }

    /// Sets the write cursor, clamped to the allocation.
    pub fn set_write_index(&mut self, index: usize) {
        self.write_index = index.min(self.size());
        self.read_index = self.read_index.min(self.write_index);
    }

    /// Moves the read cursor by `delta` bytes.
    pub fn move_read_index(&mut self, delta: isize) {
        self.set_read_index(self.read_index.saturating_add_signed(delta));
    }

    /// Moves the write cursor by `delta` bytes.
    pub fn move_write_index(&mut self, delta: isize) {
        self.set_write_index(self.write_index.saturating_add_signed(delta));
    }

    /// Total allocation size.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes that can be written before the stream must grow.
    #[inline]
    #[must_use]
    pub fn size_left_to_write(&self) -> usize {
        self.size() - self.write_index
    }

    /// Bytes written but not yet read.
    #[inline]
    #[must_use]
    pub fn size_left_to_read(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Current read offset.
    #[inline]
    #[must_use]
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Current write offset.
    #[inline]
    #[must_use]
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// The whole allocation, including unwritten capacity.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes from offset 0 up to the write cursor.
    #[inline]
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.data[..self.write_index]
    }

    /// Bytes between the read and write cursors.
    #[inline]
    #[must_use]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_index..self.write_index]
    }

    /// Consumes the stream and returns the written bytes.
    #[must_use]
    pub fn into_written(self) -> Vec<u8> {
        let mut bytes = self.data.into_owned();
        bytes.truncate(self.write_index);
        bytes
    }

    /// Writes `value` verbatim and advances the write cursor.
    pub fn write<T: Pod>(&mut self, value: T) {
        self.write_bytes(bytemuck::bytes_of(&value));
    }

    /// Writes raw bytes and advances the write cursor.
    pub fn write_bytes(&mut self, source: &[u8]) {
        if source.is_empty() {
            return;
        }
        self.resize_if_needed(source.len());
        let start = self.write_index;
        self.data.to_mut()[start..start + source.len()].copy_from_slice(source);
        self.write_index += source.len();
    }

    /// Writes a `u32` length prefix followed by the raw string bytes.
    ///
    /// An empty string writes only the prefix. Strings longer than
    /// `u32::MAX` bytes are truncated to fit the prefix.
    pub fn write_str(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let length = StringLength::try_from(bytes.len()).unwrap_or(StringLength::MAX);
        self.write(length);
        self.write_bytes(&bytes[..length as usize]);
    }

    /// Reads a `T` and advances the read cursor.
    ///
    /// Returns a zeroed `T` without moving the cursor if fewer than
    /// `size_of::<T>()` bytes are unread.
    pub fn read<T: Pod>(&mut self) -> T {
        let size = std::mem::size_of::<T>();
        if size > self.size_left_to_read() {
            return T::zeroed();
        }
        let start = self.read_index;
        self.read_index += size;
        bytemuck::pod_read_unaligned(&self.data[start..start + size])
    }

    /// Reads a `T` at an absolute offset without moving any cursor.
    ///
    /// Returns a zeroed `T` if the value would extend past the write cursor.
    #[must_use]
    pub fn peek<T: Pod>(&self, index: usize) -> T {
        let size = std::mem::size_of::<T>();
        match index.checked_add(size) {
            Some(end) if end <= self.write_index => {
                bytemuck::pod_read_unaligned(&self.data[index..end])
            }
            _ => T::zeroed(),
        }
    }

    /// Fills `destination` from the unread bytes.
    ///
    /// Returns false and leaves the stream untouched if there are not enough
    /// unread bytes.
    pub fn read_bytes(&mut self, destination: &mut [u8]) -> bool {
        if destination.len() > self.size_left_to_read() {
            return false;
        }
        let start = self.read_index;
        destination.copy_from_slice(&self.data[start..start + destination.len()]);
        self.read_index += destination.len();
        true
    }

    /// Reads a length-prefixed string.
    ///
    /// Returns an empty string and leaves the stream untouched if the prefix
    /// or the body is incomplete. Invalid UTF-8 is replaced, not rejected.
    pub fn read_string(&mut self) -> String {
        let prefix = std::mem::size_of::<StringLength>();
        if prefix > self.size_left_to_read() {
            return String::new();
        }
        let length = self.peek::<StringLength>(self.read_index) as usize;
        if prefix + length > self.size_left_to_read() {
            return String::new();
        }
        let start = self.read_index + prefix;
        self.read_index = start + length;
        String::from_utf8_lossy(&self.data[start..start + length]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_primitives() {
        let mut stream = ByteStream::new();
        stream.write(42u32);
        stream.write(-7i16);
        stream.write(1.5f32);
        stream.write(u64::MAX);

        assert_eq!(stream.read::<u32>(), 42);
        assert_eq!(stream.read::<i16>(), -7);
        assert!((stream.read::<f32>() - 1.5).abs() < f32::EPSILON);
        assert_eq!(stream.read::<u64>(), u64::MAX);
        assert_eq!(stream.size_left_to_read(), 0);
    }

    #[test]
    fn test_host_byte_order() {
        let mut stream = ByteStream::new();
        stream.write(0x0102_0304u32);
        assert_eq!(stream.written(), &0x0102_0304u32.to_ne_bytes());
    }

    #[test]
    fn test_short_read_returns_zero_and_keeps_cursor() {
        let mut stream = ByteStream::new();
        stream.write(9u16);

        assert_eq!(stream.read::<u32>(), 0);
        assert_eq!(stream.read_index(), 0);
        assert_eq!(stream.read::<u16>(), 9);
    }

    #[test]
    fn test_string_round_trip() {
        let mut stream = ByteStream::new();
        stream.write_str("dragon");
        stream.write_str("");
        stream.write(3u8);

        assert_eq!(stream.written().len(), 4 + 6 + 4 + 1);
        assert_eq!(stream.read_string(), "dragon");
        assert_eq!(stream.read_string(), "");
        assert_eq!(stream.read::<u8>(), 3);
    }

    #[test]
    fn test_truncated_string_leaves_stream_untouched() {
        let mut stream = ByteStream::new();
        stream.write(10u32);
        stream.write_bytes(b"abc");

        assert_eq!(stream.read_string(), "");
        assert_eq!(stream.read_index(), 0);
    }

    #[test]
    fn test_growth_preserves_written_bytes() {
        let mut stream = ByteStream::with_capacity(2);
        for i in 0..100u8 {
            stream.write(i);
        }
        assert!(stream.size() >= 100);
        assert_eq!(stream.written(), (0..100u8).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_growth_formula() {
        let mut stream = ByteStream::with_capacity(10);
        stream.write_bytes(&[1; 8]);
        stream.write(0u32);
        assert_eq!(stream.size(), 10 * 2 + 4 + GROWTH_SLACK);
    }

    #[test]
    fn test_shift_read_to_begin() {
        let mut stream = ByteStream::new();
        stream.write_bytes(&[1, 2, 3, 4, 5]);
        stream.move_read_index(3);

        stream.shift_read_to_begin();

        assert_eq!(stream.read_index(), 0);
        assert_eq!(stream.write_index(), 2);
        assert_eq!(stream.unread(), &[4, 5]);
    }

    #[test]
    fn test_resize_shrink_clamps_cursors() {
        let mut stream = ByteStream::with_capacity(16);
        stream.write_bytes(&[7; 12]);
        stream.set_read_index(10);

        stream.resize(8);

        assert_eq!(stream.size(), 8);
        assert_eq!(stream.write_index(), 8);
        assert_eq!(stream.read_index(), 8);
    }

    #[test]
    fn test_view_does_not_own_and_copies_on_write() {
        let external = [1u8, 2, 3, 4];
        let mut stream = ByteStream::view(&external);
        assert!(!stream.is_owner());
        assert_eq!(stream.read::<u8>(), 1);

        stream.write(5u8);

        assert!(stream.is_owner());
        assert_eq!(stream.written(), &[1, 2, 3, 4, 5]);
        assert_eq!(external, [1, 2, 3, 4]);
    }

    #[test]
    fn test_moved_from_stream_is_empty() {
        let mut stream = ByteStream::copy_from(b"payload");
        let moved = std::mem::take(&mut stream);

        assert_eq!(moved.unread(), b"payload");
        assert_eq!(stream.size(), 0);
        assert_eq!(stream.size_left_to_read(), 0);
        assert!(stream.is_owner());
    }

    #[test]
    fn test_peek_does_not_move() {
        let mut stream = ByteStream::new();
        stream.write(1u32);
        stream.write(2u32);

        assert_eq!(stream.peek::<u32>(4), 2);
        assert_eq!(stream.peek::<u32>(6), 0);
        assert_eq!(stream.read_index(), 0);
    }

    #[test]
    fn test_backpatch_with_write_index() {
        let mut stream = ByteStream::new();
        stream.write(0u32);
        stream.write_bytes(b"xyz");

        let end = stream.write_index();
        stream.set_write_index(0);
        stream.write(3u32);
        stream.set_write_index(end);

        assert_eq!(stream.read::<u32>(), 3);
        assert_eq!(stream.unread(), b"xyz");
    }

    #[test]
    fn test_into_written_truncates_capacity() {
        let mut stream = ByteStream::with_capacity(64);
        stream.write_bytes(b"abc");
        assert_eq!(stream.into_written(), b"abc".to_vec());
    }
}
