mod headers;
mod heaps;
mod sequence_points;
mod stream;
mod tables;

use std::fmt;
use std::ops::Range;
use std::path::Path;

use thiserror::Error;

use clrdbg_common::{paths_equal_ignore_case, ByteView, DebugId, Uuid};

use crate::index::{build_document_indices, DocumentIndex};

pub use headers::{
    CompressedTableHeader, PdbStreamHeader, RootHeader, StreamHeader, METADATA_SIGNATURE,
};
pub use sequence_points::{
    decode_sequence_points, SequencePoint, DOCUMENT_CHANGE_LINE, HIDDEN_LINE,
};
pub use stream::{ByteStream, Heap, HeapSizes};
pub use tables::{
    DocumentRow, LocalConstantRow, LocalScopeRow, LocalVariableRow, MethodDebugInformationRow,
    Rows, TableRow, TableType, Tables,
};

pub(crate) use heaps::{BlobHeap, GuidHeap, Heaps, StringHeap};

/// The kind of a [`FormatError`].
#[derive(Debug, Clone, Copy, Error)]
#[non_exhaustive]
pub enum FormatErrorKind {
    /// The file could not be read from disk.
    #[error("failed to read file")]
    Io,
    /// The header of the Portable PDB does not contain the correct signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// The metadata root declares a version other than 1.1.
    #[error("unsupported metadata version {0}.{1}")]
    UnsupportedVersion(u16, u16),
    /// A reserved field has a non-zero value.
    #[error("invalid reserved field")]
    InvalidReserved,
    /// The file ends prematurely.
    #[error("invalid length")]
    InvalidLength,
    /// A seek moved outside of the stream.
    #[error("invalid seek")]
    InvalidSeek,
    /// The file does not contain a valid version string.
    #[error("invalid version string")]
    InvalidVersionString,
    /// A stream header could not be read.
    #[error("invalid stream header")]
    InvalidStreamHeader,
    /// A stream's name could not be read.
    #[error("invalid stream name")]
    InvalidStreamName,
    /// An unrecognized stream name was encountered.
    #[error("unknown stream")]
    UnknownStream,
    /// The file does not contain a `#~` stream.
    #[error("file does not contain a #~ stream")]
    NoMetadataStream,
    /// String data was requested, but the file does not contain a `#Strings` stream.
    #[error("file does not contain a #Strings stream")]
    NoStringsStream,
    /// Blob data was requested, but the file does not contain a `#Blob` stream.
    #[error("file does not contain a #Blob stream")]
    NoBlobStream,
    /// GUID data was requested, but the file does not contain a `#GUID` stream.
    #[error("file does not contain a #Guid stream")]
    NoGuidStream,
    /// The given offset is out of bounds for the string heap.
    #[error("invalid string offset")]
    InvalidStringOffset,
    /// Tried to read invalid string data.
    #[error("invalid string data")]
    InvalidStringData,
    /// The given offset is out of bounds for the `#Blob` heap.
    #[error("invalid blob offset")]
    InvalidBlobOffset,
    /// The given offset points to invalid blob data.
    #[error("invalid blob data")]
    InvalidBlobData,
    /// The given index is out of bounds for the GUID heap.
    #[error("invalid guid index")]
    InvalidGuidIndex,
    /// Tried to read an invalid compressed unsigned number.
    #[error("invalid compressed unsigned number")]
    InvalidCompressedUnsigned,
    /// Tried to read an invalid compressed signed number.
    #[error("invalid compressed signed number")]
    InvalidCompressedSigned,
    /// The table stream declares a schema version other than 2.0.
    #[error("unsupported table schema {0}.{1}")]
    InvalidTableSchema(u8, u8),
    /// A table that cannot appear in a Portable PDB has rows.
    #[error("unexpected rows in table {0:#04x}")]
    UnexpectedTable(usize),
    /// The given row index is out of bounds for the table.
    #[error("row index {1} is out of bounds for table {0:?}")]
    RowIndexOutOfBounds(TableType, usize),
    /// Could not read a document name.
    #[error("invalid document name")]
    InvalidDocumentName,
    /// Failed to parse a sequence point.
    #[error("invalid sequence point")]
    InvalidSequencePoint,
    /// The rows owned by a local scope overlap with those of the next scope.
    #[error("overlapping {0:?} run in local scope {1}")]
    OverlappingLocalRun(TableType, usize),
}

/// An error encountered while parsing a [`PdbFile`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct FormatError {
    pub(crate) kind: FormatErrorKind,
    #[source]
    pub(crate) source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FormatError {
    /// Creates a new FormatError error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: FormatErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`FormatErrorKind`] for this error.
    pub fn kind(&self) -> FormatErrorKind {
        self.kind
    }
}

impl From<FormatErrorKind> for FormatError {
    fn from(kind: FormatErrorKind) -> Self {
        Self { kind, source: None }
    }
}

/// Byte ranges of the streams of a file, relative to the metadata root.
#[derive(Debug, Clone, Default)]
struct StreamRanges {
    pdb: Option<Range<usize>>,
    tables: Option<Range<usize>>,
    strings: Option<Range<usize>>,
    user_strings: Option<Range<usize>>,
    blobs: Option<Range<usize>>,
    guids: Option<Range<usize>>,
}

/// A parsed Portable PDB file.
///
/// The file owns its buffer and an index of all documents, built once during parsing. It is
/// immutable afterwards and can be shared across threads.
pub struct PdbFile {
    data: ByteView<'static>,
    root_header: RootHeader,
    stream_headers: Vec<StreamHeader>,
    pdb_header: Option<PdbStreamHeader>,
    table_header: CompressedTableHeader,
    tables: Tables,
    ranges: StreamRanges,
    documents: Vec<DocumentIndex>,
    skipped_methods: usize,
    skipped_documents: usize,
}

impl fmt::Debug for PdbFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdbFile")
            .field("root_header", &self.root_header)
            .field("pdb_header", &self.pdb_header)
            .field("table_header", &self.table_header)
            .field("has_strings_stream", &self.ranges.strings.is_some())
            .field("has_us_stream", &self.ranges.user_strings.is_some())
            .field("has_blob_stream", &self.ranges.blobs.is_some())
            .field("has_guid_stream", &self.ranges.guids.is_some())
            .field("documents", &self.documents.len())
            .field("skipped_methods", &self.skipped_methods)
            .field("skipped_documents", &self.skipped_documents)
            .finish()
    }
}

impl PdbFile {
    /// Checks whether the provided buffer could potentially be a Portable PDB file,
    /// without fully parsing it.
    pub fn peek(buf: &[u8]) -> bool {
        ByteStream::new(buf)
            .read_u32()
            .map_or(false, |signature| signature == METADATA_SIGNATURE)
    }

    /// Opens and parses the Portable PDB file at `path`.
    ///
    /// The file is memory mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let data = ByteView::open(path).map_err(|e| FormatError::new(FormatErrorKind::Io, e))?;
        Self::parse(data)
    }

    /// Parses a Portable PDB file from an owned buffer.
    pub fn from_vec(data: Vec<u8>) -> Result<Self, FormatError> {
        Self::parse(ByteView::from_vec(data))
    }

    /// Parses the provided buffer into a Portable PDB file.
    ///
    /// Malformed headers, streams or tables fail the whole file. A malformed document or method
    /// is logged and left out of the index, see [`skipped_documents`](Self::skipped_documents)
    /// and [`skipped_methods`](Self::skipped_methods).
    #[tracing::instrument(level = "trace", name = "PdbFile::parse", skip_all)]
    pub fn parse(data: ByteView<'static>) -> Result<Self, FormatError> {
        let buf = data.as_slice();
        let mut stream = ByteStream::new(buf);

        let root_header = RootHeader::parse(&mut stream)?;
        let mut stream_headers = Vec::with_capacity(root_header.stream_count as usize);
        let mut ranges = StreamRanges::default();

        for _ in 0..root_header.stream_count {
            let header = StreamHeader::parse(&mut stream)?;
            let range = header.range()?;
            if range.end > buf.len() {
                return Err(FormatErrorKind::InvalidLength.into());
            }

            let slot = match header.name.as_str() {
                "#Pdb" => &mut ranges.pdb,
                "#~" => &mut ranges.tables,
                "#Strings" => &mut ranges.strings,
                "#US" => &mut ranges.user_strings,
                "#Blob" => &mut ranges.blobs,
                "#GUID" => &mut ranges.guids,
                _ => return Err(FormatErrorKind::UnknownStream.into()),
            };
            *slot = Some(range);
            stream_headers.push(header);
        }

        let pdb_header = ranges
            .pdb
            .clone()
            .map(|range| PdbStreamHeader::parse(&mut ByteStream::new(&buf[range])))
            .transpose()?;

        let heaps = tracing::trace_span!("heaps").in_scope(|| heaps_from_ranges(buf, &ranges))?;

        let (table_header, tables) = tracing::trace_span!("tables").in_scope(|| {
            let range = ranges.tables.clone().ok_or(FormatErrorKind::NoMetadataStream)?;
            let mut stream = ByteStream::new(&buf[range]);
            let header = CompressedTableHeader::parse(&mut stream)?;
            let tables = Tables::parse(&mut stream, &header)?;
            Ok::<_, FormatError>((header, tables))
        })?;

        if let Some(pdb_header) = &pdb_header {
            let methods = pdb_header.referenced_row_count(TableType::MethodDef);
            if methods > u32::from(u16::MAX) && !tables.local_scopes.is_empty() {
                tracing::warn!(
                    methods,
                    "method indices of local scopes are read as 2 bytes and may be truncated"
                );
            }
        }

        let built = tracing::trace_span!("document indices")
            .in_scope(|| build_document_indices(&tables, &heaps));

        Ok(Self {
            root_header,
            stream_headers,
            pdb_header,
            table_header,
            tables,
            ranges,
            documents: built.documents,
            skipped_methods: built.skipped_methods,
            skipped_documents: built.skipped_documents,
            data,
        })
    }

    /// The metadata root header.
    pub fn root_header(&self) -> &RootHeader {
        &self.root_header
    }

    /// The headers of all streams, in file order.
    pub fn stream_headers(&self) -> &[StreamHeader] {
        &self.stream_headers
    }

    /// The header of the `#Pdb` stream, if the file has one.
    pub fn pdb_header(&self) -> Option<&PdbStreamHeader> {
        self.pdb_header.as_ref()
    }

    /// The header of the `#~` table stream.
    pub fn table_header(&self) -> &CompressedTableHeader {
        &self.table_header
    }

    /// The decoded table rows.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// One index per successfully decoded Document row, in row order.
    pub fn documents(&self) -> &[DocumentIndex] {
        &self.documents
    }

    /// Returns the documents whose path equals `path`, ignoring case and separator style.
    pub fn find_documents<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a DocumentIndex> + 'a {
        self.documents
            .iter()
            .filter(move |document| paths_equal_ignore_case(&document.file_path, path))
    }

    /// The number of methods left out of the index because their data was malformed.
    pub fn skipped_methods(&self) -> usize {
        self.skipped_methods
    }

    /// The number of documents left out of the index because their data was malformed.
    pub fn skipped_documents(&self) -> usize {
        self.skipped_documents
    }

    /// Reads the string starting at the given offset from this file's string heap.
    pub fn get_heap_string(&self, offset: u32) -> Result<&str, FormatError> {
        let range = self
            .ranges
            .strings
            .clone()
            .ok_or(FormatErrorKind::NoStringsStream)?;
        StringHeap::new(&self.data[range]).get_string(offset)
    }

    /// Reads the blob starting at the given offset from this file's blob heap.
    pub fn get_heap_blob(&self, offset: u32) -> Result<&[u8], FormatError> {
        let range = self.ranges.blobs.clone().ok_or(FormatErrorKind::NoBlobStream)?;
        BlobHeap::new(&self.data[range]).get_blob(offset)
    }

    /// Reads the GUID with the given index from this file's GUID heap.
    ///
    /// Note that the index is 1-based!
    pub fn get_heap_guid(&self, idx: u32) -> Result<Uuid, FormatError> {
        let range = self.ranges.guids.clone().ok_or(FormatErrorKind::NoGuidStream)?;
        GuidHeap::parse(&self.data[range])?.get_guid(idx)
    }

    /// Reads this file's PDB ID from its #PDB stream.
    ///
    /// The id is the GUID of the symbol file followed by a 4-byte stamp, which becomes the
    /// appendix of the [`DebugId`].
    pub fn pdb_id(&self) -> Option<DebugId> {
        let id = &self.pdb_header.as_ref()?.id;
        let guid = Uuid::from_slice_le(&id[..16]).ok()?;
        let age = u32::from_le_bytes([id[16], id[17], id[18], id[19]]);
        Some(DebugId::from_parts(guid, age))
    }

    /// The MethodDef token of the entry point, if the file has one.
    pub fn entry_point(&self) -> Option<u32> {
        self.pdb_header
            .as_ref()
            .map(|header| header.entry_point)
            .filter(|token| *token != 0)
    }

    /// The raw bytes of the file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Resolves the heaps from their stream ranges.
///
/// Missing heaps are empty, so only index 0 resolves in them.
fn heaps_from_ranges<'data>(
    buf: &'data [u8],
    ranges: &StreamRanges,
) -> Result<Heaps<'data>, FormatError> {
    let slice = |range: &Option<Range<usize>>| range.clone().map_or(&buf[..0], |r| &buf[r]);
    Ok(Heaps {
        strings: StringHeap::new(slice(&ranges.strings)),
        blobs: BlobHeap::new(slice(&ranges.blobs)),
        guids: GuidHeap::parse(slice(&ranges.guids))?,
    })
}
