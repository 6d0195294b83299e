//! Test helpers for `clrdbg`.
//!
//! Instead of checked-in binary fixtures, tests describe the Portable PDB they need with a
//! [`PdbBuilder`] and serialize it to bytes.
#![warn(missing_docs)]

use std::io::{self, Write};

use uuid::Uuid;
use watto::Writer;

/// The C# language GUID.
pub const LANGUAGE_CSHARP: Uuid = uuid::uuid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");
/// The Visual Basic language GUID.
pub const LANGUAGE_VB: Uuid = uuid::uuid!("3a12d0b8-c26c-11d0-b442-00a0244a1dd2");
/// The F# language GUID.
pub const LANGUAGE_FSHARP: Uuid = uuid::uuid!("ab4f38c9-b6e6-43ba-be3b-58080b2ccce3");
/// The SHA-256 hash algorithm GUID.
pub const HASH_SHA256: Uuid = uuid::uuid!("8829d00f-11b8-4213-878b-770e8597ac16");

const METADATA_SIGNATURE: u32 = 0x424A_5342;

const TABLE_METHOD_DEF: usize = 0x06;
const TABLE_DOCUMENT: usize = 0x30;
const TABLE_METHOD_DEBUG_INFORMATION: usize = 0x31;
const TABLE_LOCAL_SCOPE: usize = 0x32;
const TABLE_LOCAL_VARIABLE: usize = 0x33;
const TABLE_LOCAL_CONSTANT: usize = 0x34;

/// Encodes `value` as an ECMA-335 compressed unsigned integer, using the shortest width.
///
/// # Panics
///
/// Panics if `value` does not fit into 29 bits.
pub fn encode_unsigned(value: u32) -> Vec<u8> {
    match value {
        0..=0x7F => vec![value as u8],
        0x80..=0x3FFF => vec![0x80 | (value >> 8) as u8, value as u8],
        0x4000..=0x1FFF_FFFF => vec![
            0xC0 | (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ],
        _ => panic!("{value:#x} cannot be encoded as a compressed integer"),
    }
}

/// Encodes `value` as an ECMA-335 compressed signed integer, using the shortest width.
///
/// The magnitude is rotated left by one bit with the sign in the lowest bit.
///
/// # Panics
///
/// Panics if `value` does not fit into 29 bits.
pub fn encode_signed(value: i32) -> Vec<u8> {
    let sign = u32::from(value < 0);
    let bits = value as u32;
    match value {
        -0x40..=0x3F => encode_unsigned((bits & 0x3F) << 1 | sign),
        -0x2000..=0x1FFF => {
            let encoded = (bits & 0x1FFF) << 1 | sign;
            vec![0x80 | (encoded >> 8) as u8, encoded as u8]
        }
        -0x1000_0000..=0x0FFF_FFFF => {
            let encoded = (bits & 0x0FFF_FFFF) << 1 | sign;
            vec![
                0xC0 | (encoded >> 24) as u8,
                (encoded >> 16) as u8,
                (encoded >> 8) as u8,
                encoded as u8,
            ]
        }
        _ => panic!("{value} cannot be encoded as a compressed signed integer"),
    }
}

/// One record of a sequence points blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Point {
    /// A point mapping an IL offset to a source span.
    Visible {
        /// The absolute IL offset.
        il_offset: u32,
        /// The first line of the span.
        start_line: u32,
        /// The first column of the span.
        start_column: u32,
        /// The last line of the span.
        end_line: u32,
        /// The column after the span.
        end_column: u32,
    },
    /// A hidden point at an absolute IL offset.
    Hidden(u32),
    /// Switches to another document row.
    Document(u32),
}

impl Point {
    /// A visible point spanning `lines` with columns 1 to 2 on single lines.
    pub fn lines(il_offset: u32, start_line: u32, end_line: u32) -> Self {
        Self::Visible {
            il_offset,
            start_line,
            start_column: 1,
            end_line,
            end_column: 2,
        }
    }
}

/// Encodes a sequence points blob.
///
/// If `document` is 0, `points` must start with [`Point::Document`], which becomes the initial
/// document of the blob.
///
/// # Panics
///
/// Panics if the points are not ordered by IL offset or a multi-document blob lacks its initial
/// document.
pub fn encode_sequence_points(document: u32, points: &[Point]) -> Vec<u8> {
    let mut out = encode_unsigned(0);

    let mut points = points;
    if document == 0 {
        match points.split_first() {
            Some((Point::Document(initial), rest)) => {
                out.extend(encode_unsigned(*initial));
                points = rest;
            }
            _ => panic!("a multi-document blob must start with its initial document"),
        }
    }

    let mut prev_offset = 0;
    let mut prev_start: Option<(u32, u32)> = None;
    for point in points {
        match *point {
            Point::Document(document) => {
                out.push(0);
                out.extend(encode_unsigned(document));
            }
            Point::Hidden(il_offset) => {
                out.extend(encode_unsigned(il_offset - prev_offset));
                out.extend([0, 0]);
                prev_offset = il_offset;
            }
            Point::Visible {
                il_offset,
                start_line,
                start_column,
                end_line,
                end_column,
            } => {
                out.extend(encode_unsigned(il_offset - prev_offset));
                let delta_lines = end_line - start_line;
                let delta_columns = end_column as i32 - start_column as i32;
                out.extend(encode_unsigned(delta_lines));
                if delta_lines == 0 {
                    out.extend(encode_unsigned(delta_columns as u32));
                } else {
                    out.extend(encode_signed(delta_columns));
                }
                match prev_start {
                    None => {
                        out.extend(encode_unsigned(start_line));
                        out.extend(encode_unsigned(start_column));
                    }
                    Some((line, column)) => {
                        out.extend(encode_signed(start_line as i32 - line as i32));
                        out.extend(encode_signed(start_column as i32 - column as i32));
                    }
                }
                prev_start = Some((start_line, start_column));
                prev_offset = il_offset;
            }
        }
    }

    out
}

/// A local variable to add with [`PdbBuilder::add_scope`].
#[derive(Debug, Clone, Copy)]
pub struct Local<'a> {
    /// The variable name.
    pub name: &'a str,
    /// The slot index.
    pub index: u16,
    /// The raw attributes.
    pub attributes: u16,
}

/// A builder for synthetic Portable PDB images.
///
/// Rows are appended in call order, which must match the sort order the format requires
/// (scopes by method, for instance). Heap and table index widths are chosen from the final sizes.
///
/// # Example
///
/// ```
/// use clrdbg_testutils::{PdbBuilder, Point, LANGUAGE_CSHARP};
///
/// let mut builder = PdbBuilder::new();
/// let doc = builder.add_document("/src/Program.cs", LANGUAGE_CSHARP);
/// builder.add_method(doc, &[Point::lines(0, 10, 10)]);
/// let bytes = builder.build();
/// assert_eq!(&bytes[..4], b"BSJB");
/// ```
#[derive(Debug, Clone)]
pub struct PdbBuilder {
    version: String,
    strings: Vec<u8>,
    blobs: Vec<u8>,
    guids: Vec<u8>,
    documents: Vec<[u32; 4]>,
    methods: Vec<[u32; 2]>,
    scopes: Vec<[u32; 6]>,
    variables: Vec<(u16, u16, u32)>,
    constants: Vec<(u32, u32)>,
    pdb_stream: bool,
    pdb_id: [u8; 20],
    entry_point: u32,
    referenced_rows: Vec<(usize, u32)>,
    extra_rows: Vec<(usize, u32)>,
    extra_streams: Vec<(String, Vec<u8>)>,
}

impl Default for PdbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdbBuilder {
    /// Creates a builder for an empty file with a `#Pdb` stream.
    pub fn new() -> Self {
        Self {
            version: "PDB v1.0".into(),
            strings: vec![0],
            blobs: vec![0],
            guids: Vec::new(),
            documents: Vec::new(),
            methods: Vec::new(),
            scopes: Vec::new(),
            variables: Vec::new(),
            constants: Vec::new(),
            pdb_stream: true,
            pdb_id: [0; 20],
            entry_point: 0,
            referenced_rows: Vec::new(),
            extra_rows: Vec::new(),
            extra_streams: Vec::new(),
        }
    }

    /// Appends a string to the `#Strings` heap and returns its offset.
    pub fn add_string(&mut self, string: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(string.as_bytes());
        self.strings.push(0);
        offset
    }

    /// Appends a blob to the `#Blob` heap and returns its offset.
    pub fn add_blob(&mut self, blob: &[u8]) -> u32 {
        let offset = self.blobs.len() as u32;
        self.blobs.extend(encode_unsigned(blob.len() as u32));
        self.blobs.extend_from_slice(blob);
        offset
    }

    /// Appends a GUID to the `#GUID` heap and returns its 1-based index.
    pub fn add_guid(&mut self, guid: Uuid) -> u32 {
        self.guids.extend_from_slice(&guid.to_bytes_le());
        (self.guids.len() / 16) as u32
    }

    /// Encodes a document name blob, splitting `path` at its separators.
    pub fn add_document_name(&mut self, path: &str) -> u32 {
        let separator = if path.contains('\\') { '\\' } else { '/' };
        let mut name = vec![separator as u8];
        for part in path.split(separator) {
            let offset = if part.is_empty() {
                0
            } else {
                self.add_blob(part.as_bytes())
            };
            name.extend(encode_unsigned(offset));
        }
        self.add_blob(&name)
    }

    /// Adds a Document row without hash and returns its row id.
    pub fn add_document(&mut self, path: &str, language: Uuid) -> u32 {
        let name = self.add_document_name(path);
        let language = self.add_guid(language);
        self.push_document([name, 0, 0, language])
    }

    /// Adds a Document row with a hash and returns its row id.
    pub fn add_document_with_hash(
        &mut self,
        path: &str,
        language: Uuid,
        hash_algorithm: Uuid,
        hash: &[u8],
    ) -> u32 {
        let name = self.add_document_name(path);
        let hash_algorithm = self.add_guid(hash_algorithm);
        let hash = self.add_blob(hash);
        let language = self.add_guid(language);
        self.push_document([name, hash_algorithm, hash, language])
    }

    /// Adds a raw Document row made of heap indices and returns its row id.
    pub fn push_document(&mut self, row: [u32; 4]) -> u32 {
        self.documents.push(row);
        self.documents.len() as u32
    }

    /// Adds a MethodDebugInformation row and returns the method's row id.
    ///
    /// A method without points gets no sequence points blob.
    pub fn add_method(&mut self, document: u32, points: &[Point]) -> u32 {
        if points.is_empty() {
            return self.add_method_blob(document, None);
        }
        let blob = encode_sequence_points(document, points);
        self.add_method_blob(document, Some(&blob))
    }

    /// Adds a MethodDebugInformation row with a raw sequence points blob.
    pub fn add_method_blob(&mut self, document: u32, blob: Option<&[u8]>) -> u32 {
        let blob = blob.map_or(0, |blob| self.add_blob(blob));
        self.methods.push([document, blob]);
        self.methods.len() as u32
    }

    /// Adds a LocalScope row owning the given locals and returns its row id.
    pub fn add_scope(
        &mut self,
        method: u32,
        start_offset: u32,
        length: u32,
        variables: &[Local<'_>],
        constants: &[(&str, &[u8])],
    ) -> u32 {
        let variable_list = self.variables.len() as u32 + 1;
        let constant_list = self.constants.len() as u32 + 1;

        for local in variables {
            let name = self.add_string(local.name);
            self.variables.push((local.attributes, local.index, name));
        }
        for (name, signature) in constants {
            let name = self.add_string(name);
            let signature = self.add_blob(signature);
            self.constants.push((name, signature));
        }

        self.push_scope([method, 0, variable_list, constant_list, start_offset, length])
    }

    /// Adds a raw LocalScope row and returns its row id.
    pub fn push_scope(&mut self, row: [u32; 6]) -> u32 {
        self.scopes.push(row);
        self.scopes.len() as u32
    }

    /// Sets the PDB id and entry point token of the `#Pdb` stream.
    pub fn set_pdb_id(&mut self, id: [u8; 20], entry_point: u32) -> &mut Self {
        self.pdb_id = id;
        self.entry_point = entry_point;
        self
    }

    /// Declares the row count of a type-system table in the `#Pdb` stream.
    pub fn set_referenced_rows(&mut self, table: usize, rows: u32) -> &mut Self {
        self.referenced_rows.push((table, rows));
        self
    }

    /// Declares rows for an arbitrary table in the `#~` header without writing them.
    pub fn set_extra_rows(&mut self, table: usize, rows: u32) -> &mut Self {
        self.extra_rows.push((table, rows));
        self
    }

    /// Leaves out the `#Pdb` stream.
    pub fn without_pdb_stream(&mut self) -> &mut Self {
        self.pdb_stream = false;
        self
    }

    /// Appends an additional stream.
    pub fn add_stream(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.extra_streams.push((name.to_owned(), data.to_vec()));
        self
    }

    /// Serializes the file.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf)
            .expect("writing into a Vec cannot fail");
        buf
    }

    fn write<W: Write>(&self, target: W) -> io::Result<()> {
        let mut streams: Vec<(&str, Vec<u8>)> = Vec::new();
        if self.pdb_stream {
            streams.push(("#Pdb", self.pdb_stream_bytes()?));
        }
        streams.push(("#~", self.table_stream_bytes()?));
        streams.push(("#Strings", self.strings.clone()));
        streams.push(("#US", vec![0]));
        streams.push(("#GUID", self.guids.clone()));
        streams.push(("#Blob", self.blobs.clone()));
        for (name, data) in &self.extra_streams {
            streams.push((name.as_str(), data.clone()));
        }

        let version_len = align4(self.version.len() + 1);
        let headers_len: usize = streams
            .iter()
            .map(|(name, _)| 8 + align4(name.len() + 1))
            .sum();
        let mut offset = 16 + version_len + 4 + headers_len;

        let mut writer = Writer::new(target);
        writer.write_all(&METADATA_SIGNATURE.to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&(version_len as u32).to_le_bytes())?;
        writer.write_all(self.version.as_bytes())?;
        writer.write_all(&[0])?;
        writer.align_to(4)?;
        writer.write_all(&0u16.to_le_bytes())?;
        writer.write_all(&(streams.len() as u16).to_le_bytes())?;

        for (name, data) in &streams {
            writer.write_all(&(offset as u32).to_le_bytes())?;
            writer.write_all(&(data.len() as u32).to_le_bytes())?;
            writer.write_all(name.as_bytes())?;
            writer.write_all(&[0])?;
            writer.align_to(4)?;
            offset += align4(data.len());
        }

        for (_, data) in &streams {
            writer.write_all(data)?;
            writer.align_to(4)?;
        }

        Ok(())
    }

    fn pdb_stream_bytes(&self) -> io::Result<Vec<u8>> {
        let mut referenced = [0u32; 64];
        for &(table, rows) in &self.referenced_rows {
            referenced[table] = rows;
        }
        let bitset = bitset(&referenced);

        let mut buf = Vec::new();
        buf.write_all(&self.pdb_id)?;
        buf.write_all(&self.entry_point.to_le_bytes())?;
        buf.write_all(&bitset.to_le_bytes())?;
        write_row_counts(&mut buf, &referenced)?;
        Ok(buf)
    }

    fn table_stream_bytes(&self) -> io::Result<Vec<u8>> {
        let mut rows = [0u32; 64];
        rows[TABLE_DOCUMENT] = self.documents.len() as u32;
        rows[TABLE_METHOD_DEBUG_INFORMATION] = self.methods.len() as u32;
        rows[TABLE_LOCAL_SCOPE] = self.scopes.len() as u32;
        rows[TABLE_LOCAL_VARIABLE] = self.variables.len() as u32;
        rows[TABLE_LOCAL_CONSTANT] = self.constants.len() as u32;
        for &(table, count) in &self.extra_rows {
            rows[table] = count;
        }
        let valid = bitset(&rows);

        let mut heap_sizes = 0u8;
        if self.strings.len() > 0xFFFF {
            heap_sizes |= 0x1;
        }
        if self.guids.len() / 16 > 0xFFFF {
            heap_sizes |= 0x2;
        }
        if self.blobs.len() > 0xFFFF {
            heap_sizes |= 0x4;
        }

        let string = |buf: &mut Vec<u8>, v: u32| write_index(buf, v, heap_sizes & 0x1 != 0);
        let guid = |buf: &mut Vec<u8>, v: u32| write_index(buf, v, heap_sizes & 0x2 != 0);
        let blob = |buf: &mut Vec<u8>, v: u32| write_index(buf, v, heap_sizes & 0x4 != 0);
        let table = |buf: &mut Vec<u8>, v: u32, t: usize| {
            write_index(buf, v, t != TABLE_METHOD_DEF && rows[t] > 0xFFFF)
        };

        let mut buf = Vec::new();
        buf.write_all(&0u32.to_le_bytes())?;
        buf.write_all(&[2, 0, heap_sizes, 1])?;
        buf.write_all(&valid.to_le_bytes())?;
        buf.write_all(&valid.to_le_bytes())?;
        write_row_counts(&mut buf, &rows)?;

        for [name, hash_algorithm, hash, language] in &self.documents {
            blob(&mut buf, *name)?;
            guid(&mut buf, *hash_algorithm)?;
            blob(&mut buf, *hash)?;
            guid(&mut buf, *language)?;
        }
        for [document, points] in &self.methods {
            table(&mut buf, *document, TABLE_DOCUMENT)?;
            blob(&mut buf, *points)?;
        }
        for [method, import_scope, variables, constants, start, length] in &self.scopes {
            table(&mut buf, *method, TABLE_METHOD_DEF)?;
            table(&mut buf, *import_scope, 0x35)?;
            table(&mut buf, *variables, TABLE_LOCAL_VARIABLE)?;
            table(&mut buf, *constants, TABLE_LOCAL_CONSTANT)?;
            buf.write_all(&start.to_le_bytes())?;
            buf.write_all(&length.to_le_bytes())?;
        }
        for (attributes, index, name) in &self.variables {
            buf.write_all(&attributes.to_le_bytes())?;
            buf.write_all(&index.to_le_bytes())?;
            string(&mut buf, *name)?;
        }
        for (name, signature) in &self.constants {
            string(&mut buf, *name)?;
            blob(&mut buf, *signature)?;
        }

        Ok(buf)
    }
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn bitset(rows: &[u32; 64]) -> u64 {
    rows.iter()
        .enumerate()
        .filter(|(_, rows)| **rows > 0)
        .fold(0, |bits, (table, _)| bits | 1 << table)
}

fn write_row_counts(buf: &mut Vec<u8>, rows: &[u32; 64]) -> io::Result<()> {
    for count in rows.iter().filter(|count| **count > 0) {
        buf.write_all(&count.to_le_bytes())?;
    }
    Ok(())
}

fn write_index(buf: &mut Vec<u8>, value: u32, wide: bool) -> io::Result<()> {
    if wide {
        buf.write_all(&value.to_le_bytes())
    } else {
        buf.write_all(&(value as u16).to_le_bytes())
    }
}
