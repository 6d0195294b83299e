//! A wrapper type providing direct memory access to binary data.
//!
//! See the [`ByteView`] struct for more documentation.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

/// The owner of data behind a ByteView.
///
/// This can either be an mmapped file, an owned buffer or a borrowed binary slice.
#[derive(Debug)]
enum ByteViewBacking<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for ByteViewBacking<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            ByteViewBacking::Buf(ref buf) => buf,
            ByteViewBacking::Mmap(ref mmap) => mmap,
        }
    }
}

/// A smart pointer for symbol file data.
///
/// A `ByteView` uniformly exposes bytes that were memory mapped from a path, moved in as a vector
/// or borrowed from a slice. It dereferences into a `&[u8]` and is cheap to clone, so a parsed
/// symbol file can keep its backing buffer alive for as long as it needs to.
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use clrdbg_common::ByteView;
///
/// fn main() -> Result<(), std::io::Error> {
///     let mut file = tempfile::tempfile()?;
///     file.write_all(b"BSJB")?;
///
///     let view = ByteView::map_file(file)?;
///     assert_eq!(view.as_slice(), b"BSJB");
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ByteView<'a> {
    backing: Arc<ByteViewBacking<'a>>,
}

impl<'a> ByteView<'a> {
    fn with_backing(backing: ByteViewBacking<'a>) -> Self {
        ByteView {
            backing: Arc::new(backing),
        }
    }

    /// Constructs a `ByteView` from a `Cow`.
    pub fn from_cow(cow: Cow<'a, [u8]>) -> Self {
        ByteView::with_backing(ByteViewBacking::Buf(cow))
    }

    /// Constructs a `ByteView` from a byte slice.
    ///
    /// # Example
    ///
    /// ```
    /// use clrdbg_common::ByteView;
    ///
    /// let view = ByteView::from_slice(b"BSJB");
    /// assert_eq!(view.len(), 4);
    /// ```
    pub fn from_slice(buffer: &'a [u8]) -> Self {
        ByteView::from_cow(Cow::Borrowed(buffer))
    }

    /// Constructs a `ByteView` from a vector of bytes.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        ByteView::from_cow(Cow::Owned(buffer))
    }

    /// Constructs a `ByteView` from an open file handle by memory mapping the file.
    ///
    /// Empty files cannot be mapped and produce an empty view instead.
    pub fn map_file(file: File) -> Result<Self, io::Error> {
        // SAFETY: symbol files are treated as read-only inputs. Concurrent truncation by another
        // process is outside of what this type can protect against.
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => ByteViewBacking::Mmap(mmap),
            Err(err) => {
                // Mapping an empty file fails with `InvalidInput`; Windows reports error 1006 for
                // the same condition.
                if err.kind() == io::ErrorKind::InvalidInput
                    || (cfg!(windows) && err.raw_os_error() == Some(1006))
                {
                    ByteViewBacking::Buf(Cow::Borrowed(b""))
                } else {
                    return Err(err);
                }
            }
        };

        Ok(ByteView::with_backing(backing))
    }

    /// Constructs a `ByteView` from a file path by memory mapping the file.
    ///
    /// ```no_run
    /// use clrdbg_common::ByteView;
    ///
    /// fn main() -> Result<(), std::io::Error> {
    ///     let view = ByteView::open("Program.pdb")?;
    ///     Ok(())
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        Self::map_file(file)
    }

    /// Returns a slice of the underlying data.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        self.backing.deref()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteView<'static> {
    fn from(buffer: Vec<u8>) -> Self {
        ByteView::from_vec(buffer)
    }
}

impl<'a> From<&'a [u8]> for ByteView<'a> {
    fn from(buffer: &'a [u8]) -> Self {
        ByteView::from_slice(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_empty_file() -> Result<(), std::io::Error> {
        let tmp = NamedTempFile::new()?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(&*view, b"");

        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<(), std::io::Error> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"BSJB\x01\x00\x01\x00")?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(&*view, b"BSJB\x01\x00\x01\x00");

        Ok(())
    }

    #[test]
    fn test_clone_shares_backing() {
        let view = ByteView::from_vec(vec![1, 2, 3]);
        let other = view.clone();
        assert_eq!(view.as_ptr(), other.as_ptr());
    }
}
