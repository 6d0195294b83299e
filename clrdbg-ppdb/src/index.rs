//! Per-document indices of methods, sequence points and local scopes.
//!
//! The index is built once while parsing a [`PdbFile`](crate::PdbFile). It holds plain copies of
//! everything it needs, so it never refers back into the file's buffer.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use clrdbg_common::{file_name, paths_equal_ignore_case, Language, Uuid};

use crate::format::{
    decode_sequence_points, ByteStream, DocumentRow, FormatError, FormatErrorKind, Heaps,
    LocalScopeRow, SequencePoint, TableType, Tables,
};

/// The high byte of a MethodDef metadata token.
const METHOD_DEF_TOKEN: u32 = 0x0600_0000;

/// LocalVariable attribute marking variables the debugger should not display.
const DEBUGGER_HIDDEN: u16 = 0x1;

// https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md#document-table-0x30
const LANGUAGE_CSHARP: Uuid = uuid::uuid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");
const LANGUAGE_VB: Uuid = uuid::uuid!("3a12d0b8-c26c-11d0-b442-00a0244a1dd2");
const LANGUAGE_FSHARP: Uuid = uuid::uuid!("ab4f38c9-b6e6-43ba-be3b-58080b2ccce3");

const HASH_SHA1: Uuid = uuid::uuid!("ff1816ec-aa5e-4d10-87f7-6f4963833460");
const HASH_SHA256: Uuid = uuid::uuid!("8829d00f-11b8-4213-878b-770e8597ac16");

/// Maps a document's language GUID to a [`Language`].
fn language_from_guid(guid: Uuid) -> Language {
    if guid == LANGUAGE_CSHARP {
        Language::CSharp
    } else if guid == LANGUAGE_VB {
        Language::VisualBasic
    } else if guid == LANGUAGE_FSHARP {
        Language::FSharp
    } else {
        Language::Unknown
    }
}

/// The algorithm used to hash a document's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// The document has no hash.
    None,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// Any other algorithm, identified by its GUID.
    Other(Uuid),
}

impl From<Uuid> for HashAlgorithm {
    fn from(guid: Uuid) -> Self {
        if guid.is_nil() {
            Self::None
        } else if guid == HASH_SHA1 {
            Self::Sha1
        } else if guid == HASH_SHA256 {
            Self::Sha256
        } else {
            Self::Other(guid)
        }
    }
}

/// A local variable declared in a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// The slot index in the method's local signature.
    pub index: u16,
    /// The raw variable attributes.
    pub attributes: u16,
    /// The variable name.
    pub name: String,
}

impl LocalVariable {
    /// Returns `true` if the compiler marked this variable as hidden from the debugger.
    pub fn is_debugger_hidden(&self) -> bool {
        self.attributes & DEBUGGER_HIDDEN != 0
    }
}

/// A local constant declared in a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConstant {
    /// The constant name.
    pub name: String,
    /// The encoded type and value of the constant.
    pub signature: Vec<u8>,
}

/// A lexical scope of a method, covering the IL range `[start_offset, start_offset + length)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// The first IL offset inside the scope.
    pub start_offset: u32,
    /// The length of the scope in bytes of IL.
    pub length: u32,
    /// The variables declared in this scope.
    pub variables: Vec<LocalVariable>,
    /// The constants declared in this scope.
    pub constants: Vec<LocalConstant>,
}

impl Scope {
    /// The IL offset right after the end of the scope.
    pub fn end_offset(&self) -> u64 {
        u64::from(self.start_offset) + u64::from(self.length)
    }

    /// Returns `true` if `il_offset` lies inside the scope.
    pub fn contains(&self, il_offset: u32) -> bool {
        il_offset >= self.start_offset && u64::from(il_offset) < self.end_offset()
    }
}

/// The debug information of one method, restricted to a single document.
#[derive(Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// The MethodDef metadata token of the method.
    pub method_def: u32,
    /// The smallest line of any visible sequence point.
    pub first_line: u32,
    /// The largest end line of any visible sequence point.
    pub last_line: u32,
    /// The method's sequence points in this document, in IL order. Hidden points are kept,
    /// document changes are not.
    pub sequence_points: Vec<SequencePoint>,
    /// The method's scopes, ordered by start offset with enclosing scopes first.
    pub scopes: Vec<Scope>,
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInfo")
            .field("method_def", &format_args!("{:#010x}", self.method_def))
            .field("first_line", &self.first_line)
            .field("last_line", &self.last_line)
            .field("sequence_points", &self.sequence_points)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl MethodInfo {
    /// Creates the info of the method with MethodDef row `method_row`.
    ///
    /// Document-change records are dropped. Returns `None` if no visible sequence point remains,
    /// since such a method has no line range.
    pub fn new(
        method_row: u32,
        sequence_points: Vec<SequencePoint>,
        mut scopes: Vec<Scope>,
    ) -> Option<Self> {
        let sequence_points: Vec<_> = sequence_points
            .into_iter()
            .filter(|sp| !sp.is_document_change())
            .collect();

        let visible = sequence_points.iter().filter(|sp| sp.is_visible());
        let first_line = visible.clone().map(|sp| sp.start_line).min()?;
        let last_line = visible.map(|sp| sp.end_line).max()?;

        scopes.sort_by_key(|scope| (scope.start_offset, Reverse(scope.length)));

        Some(Self {
            method_def: METHOD_DEF_TOKEN | method_row,
            first_line,
            last_line,
            sequence_points,
            scopes,
        })
    }

    /// The 1-based MethodDef row of the method.
    pub fn method_row(&self) -> u32 {
        self.method_def & !METHOD_DEF_TOKEN
    }

    /// Returns `true` if `line` lies within `[first_line, last_line]`.
    pub fn contains_line(&self, line: u32) -> bool {
        self.first_line <= line && line <= self.last_line
    }

    /// Returns the smallest IL offset of a visible sequence point whose lines include `line`.
    pub fn il_offset_for_line(&self, line: u32) -> Option<u32> {
        self.sequence_points
            .iter()
            .filter(|sp| sp.contains_line(line))
            .map(|sp| sp.il_offset)
            .min()
    }

    /// Returns the variables visible at `il_offset`, outermost scope first.
    pub fn locals_at(&self, il_offset: u32) -> impl Iterator<Item = &LocalVariable> + '_ {
        self.scopes
            .iter()
            .filter(move |scope| scope.contains(il_offset))
            .flat_map(|scope| scope.variables.iter())
    }
}

/// All methods with sequence points in one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIndex {
    /// The 1-based Document row.
    pub document: u32,
    /// The document path as recorded by the compiler.
    pub file_path: String,
    /// The source language.
    pub language: Language,
    /// The algorithm of [`hash`](Self::hash).
    pub hash_algorithm: HashAlgorithm,
    /// The hash of the document contents.
    pub hash: Vec<u8>,
    /// The methods with at least one visible sequence point in this document, ordered by
    /// MethodDef row.
    pub methods: Vec<MethodInfo>,
}

impl DocumentIndex {
    /// The last component of the document path.
    pub fn file_name(&self) -> &str {
        file_name(&self.file_path)
    }

    /// Returns `true` if `path` names this document, ignoring case and separator style.
    pub fn matches_path(&self, path: &str) -> bool {
        paths_equal_ignore_case(&self.file_path, path)
    }

    /// Returns the methods whose line range contains `line`.
    pub fn methods_at_line(&self, line: u32) -> impl Iterator<Item = &MethodInfo> + '_ {
        self.methods
            .iter()
            .filter(move |method| method.contains_line(line))
    }
}

/// Decodes a document name blob.
///
/// The blob holds a separator byte followed by compressed blob indices of the name parts.
/// The name is the parts joined by the separator. A separator of 0 joins without separator.
fn decode_document_name(heaps: &Heaps<'_>, offset: u32) -> Result<String, FormatError> {
    let blob = heaps.blobs.get_blob(offset)?;
    let mut stream = ByteStream::new(blob);

    let separator = stream
        .read_u8()
        .map_err(|e| FormatError::new(FormatErrorKind::InvalidDocumentName, e))?;
    if !separator.is_ascii() {
        return Err(FormatErrorKind::InvalidDocumentName.into());
    }

    let mut name = String::new();
    let mut first = true;
    while stream.has_next() {
        let part_offset = stream
            .read_compressed_u32()
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidDocumentName, e))?;
        let part = heaps.blobs.get_blob(part_offset)?;
        let part = std::str::from_utf8(part)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidDocumentName, e))?;

        if !first && separator != 0 {
            name.push(separator as char);
        }
        name.push_str(part);
        first = false;
    }

    Ok(name)
}

/// Computes the row ranges owned by consecutive scopes.
///
/// `starts` are the list columns of the scopes in table order. Each run ends where the next
/// scope's run starts, and the last one at the end of the table. A scope whose start is out of
/// bounds or lies past the next scope's start gets an error, without affecting the others.
pub(crate) fn local_runs(
    starts: &[u32],
    rows: usize,
    table: TableType,
) -> Vec<Result<Range<usize>, FormatError>> {
    let table_end = rows + 1;

    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let start = *start as usize;
            if start == 0 || start > table_end {
                return Err(FormatErrorKind::RowIndexOutOfBounds(table, start).into());
            }

            let end = starts
                .get(i + 1)
                .map_or(table_end, |next| (*next as usize).min(table_end));
            if start > end {
                return Err(FormatErrorKind::OverlappingLocalRun(table, i + 1).into());
            }
            Ok(start..end)
        })
        .collect()
}

/// Copies the locals owned by one scope out of the tables.
fn build_scope(
    tables: &Tables,
    heaps: &Heaps<'_>,
    row: &LocalScopeRow,
    variables: Range<usize>,
    constants: Range<usize>,
) -> Result<Scope, FormatError> {
    let mut scope = Scope {
        start_offset: row.start_offset,
        length: row.length,
        variables: Vec::with_capacity(variables.len()),
        constants: Vec::with_capacity(constants.len()),
    };

    for id in variables {
        let row = &tables.local_variables[id];
        scope.variables.push(LocalVariable {
            index: row.index,
            attributes: row.attributes,
            name: heaps.strings.get_string(row.name)?.to_owned(),
        });
    }

    for id in constants {
        let row = &tables.local_constants[id];
        scope.constants.push(LocalConstant {
            name: heaps.strings.get_string(row.name)?.to_owned(),
            signature: heaps.blobs.get_blob(row.signature)?.to_vec(),
        });
    }

    Ok(scope)
}

/// Builds the scopes of every method, keyed by MethodDef row.
///
/// A scope that cannot be built is kept as an error under its method, so that only the owning
/// method is affected.
fn build_scopes(
    tables: &Tables,
    heaps: &Heaps<'_>,
) -> BTreeMap<u32, Vec<Result<Scope, FormatError>>> {
    let scopes = &tables.local_scopes;
    let variable_starts: Vec<_> = scopes.iter().map(|(_, row)| row.variable_list).collect();
    let constant_starts: Vec<_> = scopes.iter().map(|(_, row)| row.constant_list).collect();

    let variable_runs = local_runs(
        &variable_starts,
        tables.local_variables.len(),
        TableType::LocalVariable,
    );
    let constant_runs = local_runs(
        &constant_starts,
        tables.local_constants.len(),
        TableType::LocalConstant,
    );

    let mut by_method: BTreeMap<u32, Vec<Result<Scope, FormatError>>> = BTreeMap::new();
    for ((_, row), (variables, constants)) in scopes
        .iter()
        .zip(variable_runs.into_iter().zip(constant_runs))
    {
        let scope = variables
            .and_then(|variables| build_scope(tables, heaps, row, variables, constants?));
        by_method.entry(row.method).or_default().push(scope);
    }

    by_method
}

/// Decodes one method's sequence points and splits them by document.
fn build_method_infos(
    tables: &Tables,
    heaps: &Heaps<'_>,
    method_row: usize,
    scopes: Vec<Scope>,
) -> Result<Vec<(u32, MethodInfo)>, FormatError> {
    let row = &tables.method_debug_information[method_row];
    if row.sequence_points == 0 {
        return Ok(Vec::new());
    }

    let blob = heaps.blobs.get_blob(row.sequence_points)?;
    let points = decode_sequence_points(blob, row.document)?;

    let mut by_document: BTreeMap<u32, Vec<SequencePoint>> = BTreeMap::new();
    for point in points {
        let document = point.document as usize;
        if tables.documents.get(document).is_none() {
            return Err(FormatErrorKind::RowIndexOutOfBounds(TableType::Document, document).into());
        }
        by_document.entry(point.document).or_default().push(point);
    }

    Ok(by_document
        .into_iter()
        .filter_map(|(document, points)| {
            MethodInfo::new(method_row as u32, points, scopes.clone()).map(|info| (document, info))
        })
        .collect())
}

/// Decodes the name, language and hash of a document. Its methods are added later.
fn decode_document(
    heaps: &Heaps<'_>,
    id: usize,
    row: &DocumentRow,
) -> Result<DocumentIndex, FormatError> {
    Ok(DocumentIndex {
        document: id as u32,
        file_path: decode_document_name(heaps, row.name)?,
        language: language_from_guid(heaps.guids.get_guid(row.language)?),
        hash_algorithm: heaps.guids.get_guid(row.hash_algorithm)?.into(),
        hash: heaps.blobs.get_blob(row.hash)?.to_vec(),
        methods: Vec::new(),
    })
}

/// The outcome of indexing all documents of a file.
#[derive(Debug, Default)]
pub(crate) struct BuiltIndex {
    pub(crate) documents: Vec<DocumentIndex>,
    pub(crate) skipped_methods: usize,
    pub(crate) skipped_documents: usize,
}

/// Builds one [`DocumentIndex`] per decodable Document row.
///
/// A malformed document or method is logged and skipped; the remaining entries are still
/// indexed.
pub(crate) fn build_document_indices(tables: &Tables, heaps: &Heaps<'_>) -> BuiltIndex {
    let mut built = BuiltIndex::default();

    let mut documents: Vec<Option<DocumentIndex>> = Vec::with_capacity(tables.documents.len() + 1);
    documents.push(None);
    for (id, row) in tables.documents.iter() {
        let document = decode_document(heaps, id, row);

        match document {
            Ok(document) => documents.push(Some(document)),
            Err(error) => {
                tracing::warn!(document = id, error = %error, "skipping malformed document");
                built.skipped_documents += 1;
                documents.push(None);
            }
        }
    }

    let mut scopes = build_scopes(tables, heaps);

    for (method_row, _) in tables.method_debug_information.iter() {
        let method_scopes = scopes
            .remove(&(method_row as u32))
            .unwrap_or_default()
            .into_iter()
            .collect::<Result<Vec<_>, _>>();

        let infos = method_scopes
            .and_then(|method_scopes| build_method_infos(tables, heaps, method_row, method_scopes));

        match infos {
            Ok(infos) => {
                for (document, info) in infos {
                    if let Some(Some(index)) = documents.get_mut(document as usize) {
                        index.methods.push(info);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(method = method_row, error = %error, "skipping malformed method");
                built.skipped_methods += 1;
            }
        }
    }

    built.documents = documents.into_iter().flatten().collect();
    built
}
