use std::fmt;

use super::stream::{ByteStream, HeapSizes};
use super::tables::TableType;
use super::{FormatError, FormatErrorKind};

/// Signature for physical metadata as specified by ECMA-335.
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// The longest stream name allowed, including its NUL terminator.
const MAX_STREAM_NAME_LEN: usize = 32;

/// Rounds `len` up to the next multiple of 4.
fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// The metadata root header, as defined in ECMA-335 II.24.2.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHeader {
    /// The metadata signature, always [`METADATA_SIGNATURE`].
    pub signature: u32,
    /// Major version, always 1.
    pub major_version: u16,
    /// Minor version, always 1.
    pub minor_version: u16,
    /// The runtime version string, without its NUL padding.
    pub version: String,
    /// Reserved flags, always 0.
    pub flags: u16,
    /// The number of stream headers following this header.
    pub stream_count: u16,
}

impl RootHeader {
    /// Parses the root header from the start of `stream`.
    pub fn parse(stream: &mut ByteStream<'_>) -> Result<Self, FormatError> {
        let signature = stream.read_u32()?;
        if signature != METADATA_SIGNATURE {
            return Err(FormatErrorKind::InvalidSignature.into());
        }

        let major_version = stream.read_u16()?;
        let minor_version = stream.read_u16()?;
        if (major_version, minor_version) != (1, 1) {
            return Err(FormatErrorKind::UnsupportedVersion(major_version, minor_version).into());
        }

        if stream.read_u32()? != 0 {
            return Err(FormatErrorKind::InvalidReserved.into());
        }

        let version_length = stream.read_u32()? as usize;
        let version_buf = stream.read_bytes(version_length)?;
        let version_buf = version_buf
            .split(|c| *c == 0)
            .next()
            .unwrap_or_default();
        let version = std::str::from_utf8(version_buf)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidVersionString, e))?
            .to_owned();

        let flags = stream.read_u16()?;
        let stream_count = stream.read_u16()?;

        Ok(Self {
            signature,
            major_version,
            minor_version,
            version,
            flags,
            stream_count,
        })
    }
}

/// A stream header, as defined in ECMA-335 II.24.2.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream from the start of the metadata root.
    pub offset: u32,
    /// Size of the stream in bytes.
    pub size: u32,
    /// The stream name, such as `#Strings` or `#~`.
    pub name: String,
}

impl StreamHeader {
    /// Parses one stream header, including its NUL-padded name.
    pub fn parse(stream: &mut ByteStream<'_>) -> Result<Self, FormatError> {
        let offset = stream.read_u32()?;
        let size = stream.read_u32()?;

        let name_window = stream.remaining().min(MAX_STREAM_NAME_LEN);
        let name_len = stream
            .sub_stream(stream.position(), name_window)?
            .read_remaining()
            .iter()
            .position(|c| *c == 0)
            .ok_or(FormatErrorKind::InvalidStreamName)?;

        let name_buf = stream.read_bytes(name_len)?;
        let name = std::str::from_utf8(name_buf)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidStreamName, e))?
            .to_owned();

        // Skip the terminator and the padding up to the next 4-byte boundary.
        let padded_len = align4(name_len + 1);
        stream
            .read_bytes(padded_len - name_len)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidStreamHeader, e))?;

        Ok(Self { offset, size, name })
    }

    /// The byte range of this stream relative to the metadata root.
    pub fn range(&self) -> Result<std::ops::Range<usize>, FormatError> {
        let start = self.offset as usize;
        let end = start
            .checked_add(self.size as usize)
            .ok_or(FormatErrorKind::InvalidStreamHeader)?;
        Ok(start..end)
    }
}

/// The header of the `#Pdb` stream.
///
/// See <https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md#pdb-stream>.
#[derive(Clone, PartialEq, Eq)]
pub struct PdbStreamHeader {
    /// The PDB id: a GUID followed by a 4-byte stamp.
    pub id: [u8; 20],
    /// The MethodDef token of the entry point, or 0.
    pub entry_point: u32,
    /// Bitset of the type-system tables present in the companion module.
    pub referenced_tables: u64,
    /// Row counts of the referenced type-system tables, indexed by table number.
    pub referenced_row_counts: [u32; 64],
}

impl fmt::Debug for PdbStreamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdbStreamHeader")
            .field("id", &self.id)
            .field("entry_point", &self.entry_point)
            .field("referenced_tables", &format_args!("{:#018x}", self.referenced_tables))
            .finish()
    }
}

impl PdbStreamHeader {
    /// Parses the `#Pdb` stream.
    pub fn parse(stream: &mut ByteStream<'_>) -> Result<Self, FormatError> {
        let mut id = [0; 20];
        id.copy_from_slice(stream.read_bytes(20)?);
        let entry_point = stream.read_u32()?;
        let referenced_tables = stream.read_u64()?;

        let mut referenced_row_counts = [0; 64];
        for (i, rows) in referenced_row_counts.iter_mut().enumerate() {
            if referenced_tables >> i & 1 != 0 {
                *rows = stream.read_u32()?;
            }
        }

        Ok(Self {
            id,
            entry_point,
            referenced_tables,
            referenced_row_counts,
        })
    }

    /// Returns the row count of a type-system table living in the companion module.
    pub fn referenced_row_count(&self, table: TableType) -> u32 {
        self.referenced_row_counts[table as usize]
    }
}

/// The header of the compressed `#~` table stream, as specified in ECMA-335 II.24.2.6.
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedTableHeader {
    /// Major schema version, always 2.
    pub major_version: u8,
    /// Minor schema version, always 0.
    pub minor_version: u8,
    /// Width flags for heap indices.
    pub heap_sizes: HeapSizes,
    /// Bitset of the tables present in the stream.
    pub valid: u64,
    /// Bitset of the tables that are sorted.
    pub sorted: u64,
    row_counts: [u32; 64],
}

impl fmt::Debug for CompressedTableHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(usize, u32)> = (0..64)
            .filter(|i| self.valid >> i & 1 != 0)
            .map(|i| (i, self.row_counts[i]))
            .collect();
        f.debug_struct("CompressedTableHeader")
            .field("major_version", &self.major_version)
            .field("minor_version", &self.minor_version)
            .field("heap_sizes", &self.heap_sizes)
            .field("valid", &format_args!("{:#018x}", self.valid))
            .field("sorted", &format_args!("{:#018x}", self.sorted))
            .field("rows", &rows)
            .finish()
    }
}

impl CompressedTableHeader {
    /// Parses the table stream header, leaving `stream` positioned at the first table row.
    pub fn parse(stream: &mut ByteStream<'_>) -> Result<Self, FormatError> {
        if stream.read_u32()? != 0 {
            return Err(FormatErrorKind::InvalidReserved.into());
        }

        let major_version = stream.read_u8()?;
        let minor_version = stream.read_u8()?;
        if (major_version, minor_version) != (2, 0) {
            return Err(FormatErrorKind::InvalidTableSchema(major_version, minor_version).into());
        }

        let heap_sizes = HeapSizes(stream.read_u8()?);
        let _reserved = stream.read_u8()?;
        let valid = stream.read_u64()?;
        let sorted = stream.read_u64()?;

        let mut row_counts = [0; 64];
        for (i, rows) in row_counts.iter_mut().enumerate() {
            if valid >> i & 1 != 0 {
                *rows = stream.read_u32()?;
            }
        }

        Ok(Self {
            major_version,
            minor_version,
            heap_sizes,
            valid,
            sorted,
            row_counts,
        })
    }

    /// Creates a header directly from its parts.
    ///
    /// Row counts are only kept for tables whose bit is set in `valid`.
    pub fn new(heap_sizes: HeapSizes, valid: u64, sorted: u64, rows: &[(TableType, u32)]) -> Self {
        let mut row_counts = [0; 64];
        for &(table, count) in rows {
            if valid >> table as usize & 1 != 0 {
                row_counts[table as usize] = count;
            }
        }
        Self {
            major_version: 2,
            minor_version: 0,
            heap_sizes,
            valid,
            sorted,
            row_counts,
        }
    }

    /// Returns `true` if `table` is present in the valid bitset.
    pub fn is_present(&self, table: TableType) -> bool {
        self.valid >> table as usize & 1 != 0
    }

    /// Returns `true` if `table` is marked as sorted.
    pub fn is_sorted(&self, table: TableType) -> bool {
        self.sorted >> table as usize & 1 != 0
    }

    /// Returns the number of rows of `table`, or 0 if it is absent.
    pub fn row_count(&self, table: TableType) -> u32 {
        self.row_counts[table as usize]
    }

    /// Returns the row counts of all 64 possible tables, indexed by table number.
    pub fn row_counts(&self) -> &[u32; 64] {
        &self.row_counts
    }

    /// Returns the width in bytes of an index into `table`.
    ///
    /// Absent tables fall back to 2 bytes, see [`ByteStream::read_table_index`].
    pub fn table_index_size(&self, table: TableType) -> usize {
        if self.is_present(table) && self.row_count(table) > u16::MAX as u32 {
            4
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn root_header_bytes(major: u16, minor: u16, version: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&METADATA_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&major.to_le_bytes());
        buf.extend_from_slice(&minor.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(version.len() as u32).to_le_bytes());
        buf.extend_from_slice(version);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf
    }

    #[test]
    fn test_root_header() {
        let buf = root_header_bytes(1, 1, b"PDB v1.0\0\0\0\0");
        let mut stream = ByteStream::new(&buf);
        let header = RootHeader::parse(&mut stream).unwrap();
        assert_eq!(header.version, "PDB v1.0");
        assert_eq!(header.stream_count, 6);
        assert!(!stream.has_next());
    }

    #[test]
    fn test_root_header_bad_version() {
        let buf = root_header_bytes(1, 2, b"PDB v1.0\0\0\0\0");
        let err = RootHeader::parse(&mut ByteStream::new(&buf)).unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::UnsupportedVersion(1, 2)));
    }

    #[test]
    fn test_root_header_bad_signature() {
        let mut buf = root_header_bytes(1, 1, b"v4\0\0");
        buf[0] = b'X';
        let err = RootHeader::parse(&mut ByteStream::new(&buf)).unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidSignature));
    }

    #[test]
    fn test_stream_header_padding() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x6Cu32.to_le_bytes());
        buf.extend_from_slice(&0x10u32.to_le_bytes());
        buf.extend_from_slice(b"#Strings\0\0\0\0");
        buf.extend_from_slice(&0x7Cu32.to_le_bytes());
        buf.extend_from_slice(&0x20u32.to_le_bytes());
        buf.extend_from_slice(b"#~\0\0");

        let mut stream = ByteStream::new(&buf);
        let strings = StreamHeader::parse(&mut stream).unwrap();
        assert_eq!(strings.name, "#Strings");
        assert_eq!(strings.range().unwrap(), 0x6C..0x7C);

        let tables = StreamHeader::parse(&mut stream).unwrap();
        assert_eq!(tables.name, "#~");
        assert_eq!(tables.size, 0x20);
        assert!(!stream.has_next());
    }

    #[test]
    fn test_stream_header_unterminated_name() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[b'a'; 40]);

        let err = StreamHeader::parse(&mut ByteStream::new(&buf)).unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidStreamName));
    }

    #[test]
    fn test_table_index_size_boundary() {
        let valid = 1 << TableType::LocalVariable as u64;
        let header = CompressedTableHeader::new(
            HeapSizes(0),
            valid,
            0,
            &[(TableType::LocalVariable, 65_535)],
        );
        assert_eq!(header.table_index_size(TableType::LocalVariable), 2);

        let header = CompressedTableHeader::new(
            HeapSizes(0),
            valid,
            0,
            &[(TableType::LocalVariable, 65_536)],
        );
        assert_eq!(header.table_index_size(TableType::LocalVariable), 4);

        // Absent tables always use the 2-byte fallback.
        assert_eq!(header.table_index_size(TableType::MethodDef), 2);
    }
}
