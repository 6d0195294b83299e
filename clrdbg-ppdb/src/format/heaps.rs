use clrdbg_common::Uuid;

use super::stream::ByteStream;
use super::{FormatError, FormatErrorKind};

/// The `#Blob` heap, which contains length-prefixed blobs of arbitrary binary data.
///
/// See <https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.4-us-and-blob-heaps.md>.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlobHeap<'data> {
    buf: &'data [u8],
}

impl<'data> BlobHeap<'data> {
    pub(crate) fn new(buf: &'data [u8]) -> Self {
        Self { buf }
    }

    /// Gets the blob starting at the specified offset.
    ///
    /// Offset 0 always refers to the empty blob.
    pub(crate) fn get_blob(&self, offset: u32) -> Result<&'data [u8], FormatError> {
        if offset == 0 {
            return Ok(&[]);
        }

        let offset = offset as usize;
        if offset >= self.buf.len() {
            return Err(FormatErrorKind::InvalidBlobOffset.into());
        }

        let mut stream = ByteStream::new(&self.buf[offset..]);
        let len = stream
            .read_compressed_u32()
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidBlobData, e))?;
        stream
            .read_bytes(len as usize)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidBlobData, e))
    }
}

/// The `#Strings` heap, which contains NUL-terminated UTF-8 strings.
///
/// See <https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.3-strings-heap.md>.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StringHeap<'data> {
    buf: &'data [u8],
}

impl<'data> StringHeap<'data> {
    pub(crate) fn new(buf: &'data [u8]) -> Self {
        Self { buf }
    }

    /// Reads the string starting at `offset`, up to its NUL terminator.
    pub(crate) fn get_string(&self, offset: u32) -> Result<&'data str, FormatError> {
        if offset == 0 && self.buf.is_empty() {
            return Ok("");
        }

        let string_buf = self
            .buf
            .get(offset as usize..)
            .filter(|buf| !buf.is_empty())
            .ok_or(FormatErrorKind::InvalidStringOffset)?;
        let len = string_buf
            .iter()
            .position(|c| *c == 0)
            .ok_or(FormatErrorKind::InvalidStringData)?;
        std::str::from_utf8(&string_buf[..len])
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidStringData, e))
    }
}

/// The `#GUID` heap, a 1-based array of GUIDs.
///
/// See <https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.5-guid-heap.md>.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GuidHeap<'data> {
    buf: &'data [u8],
}

impl<'data> GuidHeap<'data> {
    pub(crate) fn parse(buf: &'data [u8]) -> Result<Self, FormatError> {
        if buf.len() % 16 != 0 {
            return Err(FormatErrorKind::InvalidLength.into());
        }
        Ok(Self { buf })
    }

    /// Returns the GUID with the given 1-based index.
    ///
    /// Index 0 is the nil GUID.
    pub(crate) fn get_guid(&self, idx: u32) -> Result<Uuid, FormatError> {
        let Some(idx) = (idx as usize).checked_sub(1) else {
            return Ok(Uuid::nil());
        };

        let bytes = self
            .buf
            .get(idx * 16..idx * 16 + 16)
            .ok_or(FormatErrorKind::InvalidGuidIndex)?;
        Uuid::from_slice_le(bytes)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidGuidIndex, e))
    }
}

/// The three heaps table rows refer to.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Heaps<'data> {
    pub(crate) strings: StringHeap<'data>,
    pub(crate) blobs: BlobHeap<'data>,
    pub(crate) guids: GuidHeap<'data>,
}
