use std::ops::Index;

use super::headers::CompressedTableHeader;
use super::stream::{ByteStream, Heap};
use super::{FormatError, FormatErrorKind};

/// The table numbers referenced by Portable PDB files.
///
/// The ECMA-335 type-system tables live in the companion module. Of those, only `MethodDef` is
/// referenced from the symbol file, by the `LocalScope` table.
#[repr(usize)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableType {
    MethodDef = 0x06,
    // portable pdb extension starts here
    Document = 0x30,
    MethodDebugInformation = 0x31,
    LocalScope = 0x32,
    LocalVariable = 0x33,
    LocalConstant = 0x34,
    ImportScope = 0x35,
    StateMachineMethod = 0x36,
    CustomDebugInformation = 0x37,
}

impl TableType {
    /// Tables that are decoded into rows, in the order their rows appear in the stream.
    pub const DECODED: [TableType; 5] = [
        TableType::Document,
        TableType::MethodDebugInformation,
        TableType::LocalScope,
        TableType::LocalVariable,
        TableType::LocalConstant,
    ];

    /// Tables that may follow the decoded ones and whose rows are left unread.
    pub const TRAILING: [TableType; 3] = [
        TableType::ImportScope,
        TableType::StateMachineMethod,
        TableType::CustomDebugInformation,
    ];

    /// Returns `true` if a Portable PDB table stream may contain rows for table number `index`.
    fn is_allowed(index: usize) -> bool {
        Self::DECODED
            .iter()
            .chain(Self::TRAILING.iter())
            .any(|table| *table as usize == index)
    }
}

/// A row of the `Document` table (0x30).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentRow {
    /// Blob heap offset of the encoded document name.
    pub name: u32,
    /// GUID heap index of the hash algorithm.
    pub hash_algorithm: u32,
    /// Blob heap offset of the document hash.
    pub hash: u32,
    /// GUID heap index of the source language.
    pub language: u32,
}

/// A row of the `MethodDebugInformation` table (0x31).
///
/// Row `n` describes the method with MethodDef row `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodDebugInformationRow {
    /// Document row containing all sequence points, or 0 if they span several documents.
    pub document: u32,
    /// Blob heap offset of the sequence points blob, or 0 if there are none.
    pub sequence_points: u32,
}

/// A row of the `LocalScope` table (0x32).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalScopeRow {
    /// The MethodDef row owning this scope.
    pub method: u32,
    /// The ImportScope row of this scope.
    pub import_scope: u32,
    /// First LocalVariable row owned by this scope.
    pub variable_list: u32,
    /// First LocalConstant row owned by this scope.
    pub constant_list: u32,
    /// IL offset where the scope starts.
    pub start_offset: u32,
    /// Length of the scope in bytes of IL.
    pub length: u32,
}

/// A row of the `LocalVariable` table (0x33).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalVariableRow {
    /// Variable attributes, `0x1` marks debugger-hidden variables.
    pub attributes: u16,
    /// The slot index in the method's local signature.
    pub index: u16,
    /// String heap offset of the variable name.
    pub name: u32,
}

/// A row of the `LocalConstant` table (0x34).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalConstantRow {
    /// String heap offset of the constant name.
    pub name: u32,
    /// Blob heap offset of the constant's signature and value.
    pub signature: u32,
}

/// A fixed-shape table row that can be read from the table stream.
pub trait TableRow: Sized + Default + Copy {
    /// The table these rows belong to.
    const TABLE: TableType;

    /// Reads one row, using index widths derived from `header`.
    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError>;
}

impl TableRow for DocumentRow {
    const TABLE: TableType = TableType::Document;

    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        let sizes = header.heap_sizes;
        Ok(Self {
            name: stream.read_heap_index(Heap::Blob, sizes)?,
            hash_algorithm: stream.read_heap_index(Heap::Guid, sizes)?,
            hash: stream.read_heap_index(Heap::Blob, sizes)?,
            language: stream.read_heap_index(Heap::Guid, sizes)?,
        })
    }
}

impl TableRow for MethodDebugInformationRow {
    const TABLE: TableType = TableType::MethodDebugInformation;

    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            document: stream.read_table_index(TableType::Document, header)?,
            sequence_points: stream.read_heap_index(Heap::Blob, header.heap_sizes)?,
        })
    }
}

impl TableRow for LocalScopeRow {
    const TABLE: TableType = TableType::LocalScope;

    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            method: stream.read_table_index(TableType::MethodDef, header)?,
            import_scope: stream.read_table_index(TableType::ImportScope, header)?,
            variable_list: stream.read_table_index(TableType::LocalVariable, header)?,
            constant_list: stream.read_table_index(TableType::LocalConstant, header)?,
            start_offset: stream.read_u32()?,
            length: stream.read_u32()?,
        })
    }
}

impl TableRow for LocalVariableRow {
    const TABLE: TableType = TableType::LocalVariable;

    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            attributes: stream.read_u16()?,
            index: stream.read_u16()?,
            name: stream.read_heap_index(Heap::Strings, header.heap_sizes)?,
        })
    }
}

impl TableRow for LocalConstantRow {
    const TABLE: TableType = TableType::LocalConstant;

    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        let sizes = header.heap_sizes;
        Ok(Self {
            name: stream.read_heap_index(Heap::Strings, sizes)?,
            signature: stream.read_heap_index(Heap::Blob, sizes)?,
        })
    }
}

/// The rows of one table.
///
/// Row ids in the format are 1-based, so slot 0 holds a zeroed sentinel row and `rows[n]` is the
/// row with id `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rows<R> {
    rows: Vec<R>,
}

impl<R: TableRow> Rows<R> {
    fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        let count = header.row_count(R::TABLE) as usize;
        // Guard the allocation against row counts the stream can never hold.
        let mut rows = Vec::with_capacity(count.min(stream.remaining()) + 1);
        rows.push(R::default());
        for _ in 0..count {
            rows.push(R::parse(stream, header)?);
        }
        Ok(Self { rows })
    }
}

impl<R> Rows<R> {
    /// The number of real rows, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.rows.len() - 1
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the row with the given 1-based id.
    pub fn get(&self, id: usize) -> Option<&R> {
        match id {
            0 => None,
            id => self.rows.get(id),
        }
    }

    /// Iterates over `(row id, row)` pairs, skipping the sentinel.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &R)> + '_ {
        self.rows.iter().enumerate().skip(1)
    }
}

impl<R> Default for Rows<R>
where
    R: Default,
{
    fn default() -> Self {
        Self {
            rows: vec![R::default()],
        }
    }
}

impl<R> Index<usize> for Rows<R> {
    type Output = R;

    /// Returns the row with id `id`; id 0 is the zeroed sentinel.
    fn index(&self, id: usize) -> &R {
        &self.rows[id]
    }
}

/// All decoded tables of a Portable PDB file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    /// The `Document` table.
    pub documents: Rows<DocumentRow>,
    /// The `MethodDebugInformation` table.
    pub method_debug_information: Rows<MethodDebugInformationRow>,
    /// The `LocalScope` table.
    pub local_scopes: Rows<LocalScopeRow>,
    /// The `LocalVariable` table.
    pub local_variables: Rows<LocalVariableRow>,
    /// The `LocalConstant` table.
    pub local_constants: Rows<LocalConstantRow>,
}

impl Tables {
    /// Reads the decoded tables from `stream`, which must be positioned right after `header`.
    ///
    /// Tables that cannot appear in a Portable PDB must have no rows.
    pub fn parse(
        stream: &mut ByteStream<'_>,
        header: &CompressedTableHeader,
    ) -> Result<Self, FormatError> {
        for (index, rows) in header.row_counts().iter().enumerate() {
            if *rows != 0 && !TableType::is_allowed(index) {
                return Err(FormatErrorKind::UnexpectedTable(index).into());
            }
        }

        Ok(Self {
            documents: Rows::parse(stream, header)?,
            method_debug_information: Rows::parse(stream, header)?,
            local_scopes: Rows::parse(stream, header)?,
            local_variables: Rows::parse(stream, header)?,
            local_constants: Rows::parse(stream, header)?,
        })
    }
}
