//! Provides support for reading Portable PDB files, specifically the line and local variable
//! information needed to place source breakpoints in managed code.
//!
//! [Portable PDB](https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md)
//! is a debugging information file format for Common Language Infrastructure (CLI) languages.
//! It is an extension of the [ECMA-335 format](https://www.ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf).
//!
//! # Functionality
//!
//! * Parse Portable PDB files with [`PdbFile::parse`] or [`PdbFile::open`].
//! * Look up the [`DocumentIndex`] of a source file with [`PdbFile::find_documents`].
//! * Find the methods covering a line with [`DocumentIndex::methods_at_line`] and the IL offset
//!   of a line inside a method with [`MethodInfo::il_offset_for_line`].
//! * Decode single sequence point blobs with [`decode_sequence_points`].
//!
//! ## Example
//! ```no_run
//! use clrdbg_ppdb::PdbFile;
//!
//! let pdb = PdbFile::open("Program.pdb").unwrap();
//! for document in pdb.find_documents("/src/Program.cs") {
//!     for method in document.methods_at_line(12) {
//!         let il_offset = method.il_offset_for_line(12).unwrap_or(0);
//!         println!("{:#x} at IL_{:04x}", method.method_def, il_offset);
//!     }
//! }
//! ```
//!
//! # Structure of a Portable PDB file
//! An ECMA-335 file is divided into sections called _streams_. The possible streams are
//! * `#~` ("metadata"), comprising the debug tables. The tables this crate decodes are
//!   `Document`, `MethodDebugInformation`, `LocalScope`, `LocalVariable` and `LocalConstant`.
//! * `#Strings`, comprising null-terminated UTF-8 strings.
//! * `#GUID`, a list of GUIDs.
//! * `#US` ("user strings"), comprising UTF-16 encoded strings.
//! * `#Blob`, comprising blobs of data that don't fit in any of the other streams.
//!
//! The Portable PDB format extends ECMA-335 by the addition of another steam, `#Pdb`, which holds
//! the id of the file and the row counts of the type-system tables in the companion module.

#![warn(missing_docs)]

mod format;
mod index;

pub use format::{
    decode_sequence_points, ByteStream, CompressedTableHeader, DocumentRow, FormatError,
    FormatErrorKind, Heap, HeapSizes, LocalConstantRow, LocalScopeRow, LocalVariableRow,
    MethodDebugInformationRow, PdbFile, PdbStreamHeader, RootHeader, Rows, SequencePoint,
    StreamHeader, TableRow, TableType, Tables, DOCUMENT_CHANGE_LINE, HIDDEN_LINE,
    METADATA_SIGNATURE,
};
pub use index::{
    DocumentIndex, HashAlgorithm, LocalConstant, LocalVariable, MethodInfo, Scope,
};
