use std::fmt;

use super::headers::CompressedTableHeader;
use super::tables::TableType;
use super::{FormatError, FormatErrorKind};

/// One of the three heaps that table rows index into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heap {
    /// The `#Strings` heap of NUL-terminated UTF-8 strings.
    Strings,
    /// The `#GUID` heap, a 1-based array of 16-byte GUIDs.
    Guid,
    /// The `#Blob` heap of length-prefixed binary data.
    Blob,
}

impl Heap {
    /// The bit in the `heap_sizes` field of the table stream header for this heap.
    fn size_flag(self) -> u8 {
        match self {
            Heap::Strings => 0x01,
            Heap::Guid => 0x02,
            Heap::Blob => 0x04,
        }
    }
}

/// The `heap_sizes` flags of the table stream header.
///
/// A set bit means indices into the corresponding heap are 4 bytes wide instead of 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapSizes(pub u8);

impl HeapSizes {
    /// Returns the width in bytes of an index into `heap`.
    pub fn index_size(self, heap: Heap) -> usize {
        if self.0 & heap.size_flag() == 0 {
            2
        } else {
            4
        }
    }
}

/// A cursor over an immutable byte buffer.
///
/// The cursor is restricted to a logical window `[begin, end)` of the underlying buffer.
/// Positions reported and accepted by the stream are relative to `begin`. Every read checks
/// against the logical end and fails with [`FormatErrorKind::InvalidLength`] rather than reading
/// past it.
///
/// Parsers that own a sub-region of the buffer receive their own stream via
/// [`sub_stream`](Self::sub_stream) instead of saving and restoring the cursor of their caller.
#[derive(Clone)]
pub struct ByteStream<'data> {
    buf: &'data [u8],
    begin: usize,
    pos: usize,
    end: usize,
}

impl fmt::Debug for ByteStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("begin", &self.begin)
            .field("position", &self.pos)
            .field("end", &self.end)
            .finish()
    }
}

impl<'data> ByteStream<'data> {
    /// Creates a stream covering the whole buffer.
    pub fn new(buf: &'data [u8]) -> Self {
        Self {
            buf,
            begin: 0,
            pos: 0,
            end: buf.len(),
        }
    }

    /// Creates a new stream over `len` bytes starting `offset` bytes after this stream's start.
    ///
    /// The new stream is independent of this one: reading from it does not move this cursor.
    pub fn sub_stream(&self, offset: usize, len: usize) -> Result<Self, FormatError> {
        let begin = self
            .begin
            .checked_add(offset)
            .ok_or(FormatErrorKind::InvalidLength)?;
        let end = begin.checked_add(len).ok_or(FormatErrorKind::InvalidLength)?;
        if end > self.end {
            return Err(FormatErrorKind::InvalidLength.into());
        }
        Ok(Self {
            buf: self.buf,
            begin,
            pos: begin,
            end,
        })
    }

    /// The current position, relative to the start of the stream.
    pub fn position(&self) -> usize {
        self.pos - self.begin
    }

    /// The logical length of the stream.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Returns `true` if the stream has a logical length of zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of bytes left before the logical end.
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Returns `true` if at least one more byte can be read.
    pub fn has_next(&self) -> bool {
        self.pos < self.end
    }

    /// Clips the logical end of the stream to `len` bytes after its start.
    ///
    /// The end can only move backwards; extending the stream is an error. Clipping below the
    /// current position is an error as well.
    pub fn set_length(&mut self, len: usize) -> Result<(), FormatError> {
        let end = self
            .begin
            .checked_add(len)
            .ok_or(FormatErrorKind::InvalidLength)?;
        if end > self.end || end < self.pos {
            return Err(FormatErrorKind::InvalidLength.into());
        }
        self.end = end;
        Ok(())
    }

    /// Moves the cursor to `offset` bytes after the start of the stream.
    pub fn seek_from_origin(&mut self, offset: usize) -> Result<(), FormatError> {
        let pos = self
            .begin
            .checked_add(offset)
            .ok_or(FormatErrorKind::InvalidSeek)?;
        if pos > self.end {
            return Err(FormatErrorKind::InvalidSeek.into());
        }
        self.pos = pos;
        Ok(())
    }

    /// Moves the cursor by `delta` bytes, which may be negative.
    pub fn seek_from_current(&mut self, delta: isize) -> Result<(), FormatError> {
        let pos = self
            .pos
            .checked_add_signed(delta)
            .ok_or(FormatErrorKind::InvalidSeek)?;
        if pos < self.begin || pos > self.end {
            return Err(FormatErrorKind::InvalidSeek.into());
        }
        self.pos = pos;
        Ok(())
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Result<u8, FormatError> {
        if self.has_next() {
            Ok(self.buf[self.pos])
        } else {
            Err(FormatErrorKind::InvalidLength.into())
        }
    }

    /// Consumes and returns the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'data [u8], FormatError> {
        if len > self.remaining() {
            return Err(FormatErrorKind::InvalidLength.into());
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Consumes and returns all bytes up to the logical end.
    pub fn read_remaining(&mut self) -> &'data [u8] {
        let bytes = &self.buf[self.pos..self.end];
        self.pos = self.end;
        bytes
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut array = [0; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, FormatError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads the raw bits of an ECMA-335 compressed integer, along with its width in bytes.
    ///
    /// The top bits of the first byte select the width: `0xxxxxxx` is one byte, `10xxxxxx` two
    /// bytes and `110xxxxx` four bytes. The remaining bits form a big-endian value.
    fn read_compressed_bits(&mut self, kind: FormatErrorKind) -> Result<(u32, usize), FormatError> {
        let first = self.peek().map_err(|_| kind)?;

        if first & 0b1000_0000 == 0 {
            self.pos += 1;
            return Ok((first as u32, 1));
        }

        if first & 0b0100_0000 == 0 {
            let bytes: [u8; 2] = self.read_array().map_err(|_| kind)?;
            let value = u16::from_be_bytes(bytes) & 0x3FFF;
            return Ok((value as u32, 2));
        }

        if first & 0b0010_0000 == 0 {
            let bytes: [u8; 4] = self.read_array().map_err(|_| kind)?;
            let value = u32::from_be_bytes(bytes) & 0x1FFF_FFFF;
            return Ok((value, 4));
        }

        Err(kind.into())
    }

    /// Reads a compressed unsigned integer (ECMA-335 II.23.2).
    pub fn read_compressed_u32(&mut self) -> Result<u32, FormatError> {
        self.read_compressed_bits(FormatErrorKind::InvalidCompressedUnsigned)
            .map(|(value, _)| value)
    }

    /// Reads a compressed signed integer (ECMA-335 II.23.2).
    ///
    /// The encoded value is rotated left by one bit, so the sign lives in the least significant
    /// bit. After shifting it back out, negative values are sign-extended from 6, 13 or 28 value
    /// bits for the 1, 2 and 4 byte encodings respectively.
    pub fn read_compressed_i32(&mut self) -> Result<i32, FormatError> {
        let (bits, width) = self.read_compressed_bits(FormatErrorKind::InvalidCompressedSigned)?;

        let negative = bits & 1 != 0;
        let value = bits >> 1;
        if !negative {
            return Ok(value as i32);
        }

        let mask: u32 = match width {
            1 => 0xFFFF_FFC0,
            2 => 0xFFFF_E000,
            _ => 0xF000_0000,
        };
        Ok((value | mask) as i32)
    }

    /// Reads an index into `heap`, which is 2 or 4 bytes wide depending on `heap_sizes`.
    pub fn read_heap_index(
        &mut self,
        heap: Heap,
        heap_sizes: HeapSizes,
    ) -> Result<u32, FormatError> {
        match heap_sizes.index_size(heap) {
            4 => self.read_u32(),
            _ => self.read_u16().map(u32::from),
        }
    }

    /// Reads a 1-based row index into `table`.
    ///
    /// The index is 2 bytes wide if the table has fewer than 2^16 rows and 4 bytes otherwise.
    /// Tables missing from the header's valid bitset are read with 2 bytes. That includes the
    /// ECMA-335 tables that live in the companion module rather than the symbol file, which are
    /// therefore limited to 2^16 rows.
    pub fn read_table_index(
        &mut self,
        table: TableType,
        header: &CompressedTableHeader,
    ) -> Result<u32, FormatError> {
        match header.table_index_size(table) {
            4 => self.read_u32(),
            _ => self.read_u16().map(u32::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_fixed_width_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut stream = ByteStream::new(&data);

        assert_eq!(stream.read_u8().unwrap(), 0x01);
        assert_eq!(stream.read_u16().unwrap(), 0x0302);
        assert_eq!(stream.position(), 3);
        assert_eq!(stream.read_u32().unwrap(), 0x0706_0504);
        assert!(!stream.has_next());

        let err = stream.read_u8().unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidLength));
    }

    #[test]
    fn test_read_u32_truncated_does_not_advance() {
        let data = [0x01, 0x02, 0x03];
        let mut stream = ByteStream::new(&data);
        assert!(stream.read_u32().is_err());
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_decode_unsigned() {
        let cases = [
            (&[0x03][..], 0x03),
            (&[0x7F], 0x7F),
            (&[0x80, 0x80], 0x80),
            (&[0xAE, 0x57], 0x2E57),
            (&[0xBF, 0xFF], 0x3FFF),
            (&[0xC0, 0x00, 0x40, 0x00], 0x4000),
            (&[0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (arg, res) in cases.iter() {
            let mut stream = ByteStream::new(arg);
            assert_eq!(stream.read_compressed_u32().unwrap(), *res);
            assert!(!stream.has_next());
        }
    }

    #[test]
    fn test_decode_signed() {
        let cases = [
            (&[0x00][..], 0),
            (&[0x01], -64),
            (&[0x7E], 63),
            (&[0x7B], -3),
            (&[0x80, 0x80], 64),
            (&[0x80, 0x01], -8192),
            (&[0xBF, 0xFE], 8191),
            (&[0xC0, 0x00, 0x40, 0x00], 8192),
            (&[0xDF, 0xFF, 0xFF, 0xFE], 268435455),
            (&[0xC0, 0x00, 0x00, 0x01], -268435456),
        ];

        for (arg, res) in cases.iter() {
            let mut stream = ByteStream::new(arg);
            assert_eq!(stream.read_compressed_i32().unwrap(), *res);
        }
    }

    #[test]
    fn test_compressed_width_edges() {
        let unsigned = [
            (0, 1),
            (0x7F, 1),
            (0x80, 2),
            (0x3FFF, 2),
            (0x4000, 4),
            (0x1FFF_FFFF, 4),
        ];

        for (value, width) in unsigned {
            let bytes = clrdbg_testutils::encode_unsigned(value);
            assert_eq!(bytes.len(), width, "width of {value:#x}");

            let mut stream = ByteStream::new(&bytes);
            assert_eq!(stream.read_compressed_u32().unwrap(), value);
            assert_eq!(stream.position(), width);
        }

        let signed = [
            (0, 1),
            (0x3F, 1),
            (-0x40, 1),
            (0x40, 2),
            (-0x41, 2),
            (0x1FFF, 2),
            (-0x2000, 2),
            (0x2000, 4),
            (-0x2001, 4),
            (0x0FFF_FFFF, 4),
            (-0x1000_0000, 4),
        ];

        for (value, width) in signed {
            let bytes = clrdbg_testutils::encode_signed(value);
            assert_eq!(bytes.len(), width, "width of {value}");

            let mut stream = ByteStream::new(&bytes);
            assert_eq!(stream.read_compressed_i32().unwrap(), value);
            assert_eq!(stream.position(), width);
        }
    }

    #[test]
    fn test_invalid_compressed_prefix() {
        let mut stream = ByteStream::new(&[0xE0, 0, 0, 0]);
        let err = stream.read_compressed_u32().unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidCompressedUnsigned));

        let mut stream = ByteStream::new(&[0x80]);
        let err = stream.read_compressed_i32().unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidCompressedSigned));
    }

    #[test]
    fn test_set_length_only_shrinks() {
        let data = [0u8; 8];
        let mut stream = ByteStream::new(&data);
        stream.set_length(4).unwrap();
        assert_eq!(stream.remaining(), 4);
        assert!(stream.set_length(6).is_err());
        assert_eq!(stream.read_u32().unwrap(), 0);
        assert!(stream.read_u8().is_err());
    }

    #[test]
    fn test_seek_and_sub_stream() {
        let data = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15];
        let mut stream = ByteStream::new(&data);
        stream.seek_from_origin(4).unwrap();
        assert_eq!(stream.peek().unwrap(), 0x14);
        stream.seek_from_current(-3).unwrap();
        assert_eq!(stream.read_u8().unwrap(), 0x11);
        assert!(stream.seek_from_current(-3).is_err());
        assert!(stream.seek_from_origin(7).is_err());

        let mut sub = stream.sub_stream(2, 3).unwrap();
        assert_eq!(sub.position(), 0);
        assert_eq!(sub.read_u8().unwrap(), 0x12);
        sub.seek_from_origin(3).unwrap();
        assert!(sub.read_u8().is_err());
        assert!(stream.sub_stream(4, 3).is_err());

        // The parent cursor is untouched.
        assert_eq!(stream.position(), 2);
    }

    #[test]
    fn test_heap_index_width() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut stream = ByteStream::new(&data);
        assert_eq!(
            stream.read_heap_index(Heap::Strings, HeapSizes(0x06)).unwrap(),
            0x0201
        );

        let mut stream = ByteStream::new(&data);
        assert_eq!(
            stream.read_heap_index(Heap::Blob, HeapSizes(0x04)).unwrap(),
            0x0403_0201
        );
    }
}
