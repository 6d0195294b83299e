use std::fmt;

use super::stream::ByteStream;
use super::{FormatError, FormatErrorKind};

/// The line number of a hidden sequence point.
pub const HIDDEN_LINE: u32 = 0xFE_EFEE;

/// The line number of a document-change record.
pub const DOCUMENT_CHANGE_LINE: u32 = 0xFD_DFDD;

/// Exclusive upper bound of IL offsets and line numbers.
const MAX_LINE_OR_OFFSET: i64 = 0x2000_0000;

/// Exclusive upper bound of column numbers.
const MAX_COLUMN: i64 = 0x1_0000;

/// A mapping from an IL offset to a span in a source document.
///
/// Besides real source spans, a decoded sequence point list contains two kinds of flagged
/// records: hidden points (no source, line [`HIDDEN_LINE`]) and document changes (line
/// [`DOCUMENT_CHANGE_LINE`], switching the document of the records that follow).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequencePoint {
    /// The absolute IL offset within the method body.
    pub il_offset: u32,
    /// First line of the span, 1-based.
    pub start_line: u32,
    /// First column of the span, 1-based.
    pub start_column: u32,
    /// Last line of the span.
    pub end_line: u32,
    /// Column after the end of the span.
    pub end_column: u32,
    /// The Document row this point belongs to.
    pub document: u32,
}

impl SequencePoint {
    fn hidden(il_offset: u32, document: u32) -> Self {
        Self {
            il_offset,
            start_line: HIDDEN_LINE,
            start_column: 0,
            end_line: HIDDEN_LINE,
            end_column: 0,
            document,
        }
    }

    fn document_change(il_offset: u32, document: u32) -> Self {
        Self {
            il_offset,
            start_line: DOCUMENT_CHANGE_LINE,
            start_column: 0,
            end_line: DOCUMENT_CHANGE_LINE,
            end_column: 0,
            document,
        }
    }

    fn visible(
        il_offset: u32,
        start_line: i64,
        start_column: i64,
        end_line: i64,
        end_column: i64,
        document: u32,
    ) -> Result<Self, FormatError> {
        let lines = 1..MAX_LINE_OR_OFFSET;
        let columns = 0..MAX_COLUMN;
        if !lines.contains(&start_line)
            || !lines.contains(&end_line)
            || !columns.contains(&start_column)
            || !columns.contains(&end_column)
            || [start_line, end_line]
                .iter()
                .any(|line| *line == HIDDEN_LINE as i64 || *line == DOCUMENT_CHANGE_LINE as i64)
            || end_line < start_line
            || (end_line == start_line && end_column <= start_column)
        {
            return Err(FormatErrorKind::InvalidSequencePoint.into());
        }

        Ok(Self {
            il_offset,
            start_line: start_line as u32,
            start_column: start_column as u32,
            end_line: end_line as u32,
            end_column: end_column as u32,
            document,
        })
    }

    /// Returns `true` if this is a hidden sequence point.
    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_LINE
    }

    /// Returns `true` if this record switches the current document.
    pub fn is_document_change(&self) -> bool {
        self.start_line == DOCUMENT_CHANGE_LINE
    }

    /// Returns `true` if this point maps to source, meaning it is neither hidden nor a document
    /// change.
    pub fn is_visible(&self) -> bool {
        !self.is_hidden() && !self.is_document_change()
    }

    /// Returns `true` if this point is visible and its lines include `line`.
    pub fn contains_line(&self, line: u32) -> bool {
        self.is_visible() && self.start_line <= line && line <= self.end_line
    }
}

impl fmt::Debug for SequencePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hidden() {
            f.debug_struct("HiddenSequencePoint")
                .field("il_offset", &self.il_offset)
                .field("document", &self.document)
                .finish()
        } else if self.is_document_change() {
            f.debug_struct("DocumentChange")
                .field("il_offset", &self.il_offset)
                .field("document", &self.document)
                .finish()
        } else {
            f.debug_struct("SequencePoint")
                .field("il_offset", &self.il_offset)
                .field("start_line", &self.start_line)
                .field("start_column", &self.start_column)
                .field("end_line", &self.end_line)
                .field("end_column", &self.end_column)
                .field("document", &self.document)
                .finish()
        }
    }
}

/// Decodes the sequence points blob of one method.
///
/// `document` is the `Document` column of the method's `MethodDebugInformation` row. If it is 0,
/// the blob starts with the initial document, which is emitted as a document-change record.
///
/// The returned list is in blob order. IL offsets are absolute; document-change records carry
/// the running offset unchanged.
///
/// See <https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md#sequence-points-blob>.
pub fn decode_sequence_points(
    blob: &[u8],
    document: u32,
) -> Result<Vec<SequencePoint>, FormatError> {
    let mut stream = ByteStream::new(blob);
    let mut points = Vec::new();

    let _local_signature = stream.read_compressed_u32()?;

    let mut current_document = document;
    if document == 0 {
        current_document = stream.read_compressed_u32()?;
        points.push(SequencePoint::document_change(0, current_document));
    }

    let mut il_offset: u32 = 0;
    let mut last_visible: Option<SequencePoint> = None;
    let mut first = true;

    while stream.has_next() {
        let delta_il_offset = stream.read_compressed_u32()?;

        if !first && delta_il_offset == 0 {
            current_document = stream.read_compressed_u32()?;
            points.push(SequencePoint::document_change(il_offset, current_document));
            continue;
        }

        il_offset = il_offset
            .checked_add(delta_il_offset)
            .filter(|offset| (*offset as i64) < MAX_LINE_OR_OFFSET)
            .ok_or(FormatErrorKind::InvalidSequencePoint)?;
        first = false;

        let point = decode_record(&mut stream, il_offset, last_visible, current_document)?;
        if point.is_visible() {
            last_visible = Some(point);
        }
        points.push(point);
    }

    Ok(points)
}

/// Decodes the line and column part of one sequence point record.
fn decode_record(
    stream: &mut ByteStream<'_>,
    il_offset: u32,
    last_visible: Option<SequencePoint>,
    document: u32,
) -> Result<SequencePoint, FormatError> {
    let delta_lines = stream.read_compressed_u32()? as i64;
    let delta_columns = if delta_lines == 0 {
        stream.read_compressed_u32()? as i64
    } else {
        stream.read_compressed_i32()? as i64
    };

    if delta_lines == 0 && delta_columns == 0 {
        return Ok(SequencePoint::hidden(il_offset, document));
    }

    let (start_line, start_column) = match last_visible {
        Some(prev) => (
            prev.start_line as i64 + stream.read_compressed_i32()? as i64,
            prev.start_column as i64 + stream.read_compressed_i32()? as i64,
        ),
        None => (
            stream.read_compressed_u32()? as i64,
            stream.read_compressed_u32()? as i64,
        ),
    };

    SequencePoint::visible(
        il_offset,
        start_line,
        start_column,
        start_line + delta_lines,
        start_column + delta_columns,
        document,
    )
}
