use std::io::Write;

use clrdbg_common::{ByteView, DebugId, Language, Uuid};
use clrdbg_ppdb::{FormatErrorKind, HashAlgorithm, PdbFile, TableType};
use clrdbg_testutils::{
    Local, PdbBuilder, Point, HASH_SHA256, LANGUAGE_CSHARP, LANGUAGE_FSHARP,
};

use similar_asserts::assert_eq;

fn program_pdb() -> PdbBuilder {
    let mut builder = PdbBuilder::new();
    let program = builder.add_document("/src/app/Program.cs", LANGUAGE_CSHARP);
    let util = builder.add_document("/src/app/Util.fs", LANGUAGE_FSHARP);

    // Main: lines 10 to 14
    builder.add_method(
        program,
        &[
            Point::lines(0, 10, 10),
            Point::Hidden(3),
            Point::lines(6, 12, 13),
            Point::lines(12, 14, 14),
        ],
    );
    // A method without sequence points.
    builder.add_method(0, &[]);
    // Helper: lines 20 to 21
    builder.add_method(util, &[Point::lines(0, 20, 20), Point::lines(4, 21, 21)]);
    builder
}

#[test]
fn test_documents() {
    let pdb = PdbFile::from_vec(program_pdb().build()).unwrap();

    assert_eq!(pdb.root_header().version, "PDB v1.0");
    assert_eq!(pdb.tables().documents.len(), 2);
    assert_eq!(pdb.tables().method_debug_information.len(), 3);
    assert_eq!(pdb.skipped_methods(), 0);
    assert_eq!(pdb.skipped_documents(), 0);

    let documents = pdb.documents();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].file_path, "/src/app/Program.cs");
    assert_eq!(documents[0].language, Language::CSharp);
    assert_eq!(documents[0].hash_algorithm, HashAlgorithm::None);
    assert_eq!(documents[1].file_path, "/src/app/Util.fs");
    assert_eq!(documents[1].file_name(), "Util.fs");
    assert_eq!(documents[1].language, Language::FSharp);

    let main = &documents[0].methods[0];
    assert_eq!(main.method_def, 0x0600_0001);
    assert_eq!(main.first_line, 10);
    assert_eq!(main.last_line, 14);
    assert_eq!(main.sequence_points.len(), 4);
    assert!(main.sequence_points[1].is_hidden());
    assert_eq!(main.sequence_points[1].il_offset, 3);
    assert_eq!(main.il_offset_for_line(13), Some(6));

    let helper = &documents[1].methods[0];
    assert_eq!(helper.method_row(), 3);
    assert_eq!((helper.first_line, helper.last_line), (20, 21));
}

#[test]
fn test_parse_is_deterministic() {
    let bytes = program_pdb().build();
    let first = PdbFile::from_vec(bytes.clone()).unwrap();
    let second = PdbFile::parse(ByteView::from_vec(bytes)).unwrap();
    assert_eq!(first.documents(), second.documents());
}

#[test]
fn test_line_bounds_ignore_flagged_points() {
    let mut builder = PdbBuilder::new();
    let doc = builder.add_document("/src/Lines.cs", LANGUAGE_CSHARP);
    builder.add_method(
        doc,
        &[
            Point::Hidden(0),
            Point::lines(2, 10, 12),
            Point::Document(doc),
            Point::lines(5, 5, 6),
        ],
    );

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    let method = &pdb.documents()[0].methods[0];
    assert_eq!(method.first_line, 5);
    assert_eq!(method.last_line, 12);

    let offsets: Vec<_> = method.sequence_points.iter().map(|sp| sp.il_offset).collect();
    assert_eq!(offsets, vec![0, 2, 5]);
    assert!(method.sequence_points.iter().all(|sp| !sp.is_document_change()));
}

#[test]
fn test_multi_document_method() {
    let mut builder = PdbBuilder::new();
    let first = builder.add_document("/src/Partial.A.cs", LANGUAGE_CSHARP);
    let second = builder.add_document("/src/Partial.B.cs", LANGUAGE_CSHARP);
    builder.add_method(
        0,
        &[
            Point::Document(first),
            Point::lines(0, 10, 12),
            Point::Document(second),
            Point::lines(5, 5, 6),
        ],
    );

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    let [a, b] = pdb.documents() else {
        panic!("expected two documents");
    };

    assert_eq!(a.methods.len(), 1);
    assert_eq!((a.methods[0].first_line, a.methods[0].last_line), (10, 12));
    assert_eq!(b.methods.len(), 1);
    assert_eq!((b.methods[0].first_line, b.methods[0].last_line), (5, 6));
    assert_eq!(a.methods[0].method_def, b.methods[0].method_def);
    assert_eq!(b.methods[0].sequence_points[0].document, second);
}

#[test]
fn test_locals() {
    let mut builder = PdbBuilder::new();
    let doc = builder.add_document("/src/Locals.cs", LANGUAGE_CSHARP);
    let method = builder.add_method(doc, &[Point::lines(0, 3, 3), Point::lines(8, 4, 4)]);
    let limit: &[u8] = &[0x08, 0x2A, 0x00, 0x00, 0x00];
    builder.add_scope(
        method,
        0,
        20,
        &[Local {
            name: "outer",
            index: 0,
            attributes: 0,
        }],
        &[("Limit", limit)],
    );
    builder.add_scope(
        method,
        4,
        6,
        &[
            Local {
                name: "item",
                index: 1,
                attributes: 0,
            },
            Local {
                name: "CS$<>8__locals0",
                index: 2,
                attributes: 1,
            },
        ],
        &[],
    );

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    let method = &pdb.documents()[0].methods[0];

    assert_eq!(method.scopes.len(), 2);
    assert_eq!(method.scopes[0].constants[0].name, "Limit");
    assert_eq!(method.scopes[0].constants[0].signature, limit);

    let names: Vec<_> = method.locals_at(5).map(|var| var.name.as_str()).collect();
    assert_eq!(names, vec!["outer", "item", "CS$<>8__locals0"]);

    let visible: Vec<_> = method
        .locals_at(5)
        .filter(|var| !var.is_debugger_hidden())
        .map(|var| var.index)
        .collect();
    assert_eq!(visible, vec![0, 1]);

    let names: Vec<_> = method.locals_at(12).map(|var| var.name.as_str()).collect();
    assert_eq!(names, vec!["outer"]);
}

#[test]
fn test_malformed_method_is_skipped() {
    let mut builder = PdbBuilder::new();
    let doc = builder.add_document("/src/Broken.cs", LANGUAGE_CSHARP);
    // Starts on line 0.
    builder.add_method_blob(doc, Some(&[0x00, 0x00, 0x01, 0x02, 0x00, 0x01][..]));
    builder.add_method(doc, &[Point::lines(0, 7, 7)]);

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    assert_eq!(pdb.skipped_methods(), 1);

    let methods = &pdb.documents()[0].methods;
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].method_row(), 2);
}

#[test]
fn test_overlapping_scope_skips_only_its_method() {
    let mut builder = PdbBuilder::new();
    let doc = builder.add_document("/src/Scopes.cs", LANGUAGE_CSHARP);
    let bad = builder.add_method(doc, &[Point::lines(0, 3, 3)]);
    let good = builder.add_method(doc, &[Point::lines(0, 8, 8)]);

    // Its variable run starts past the start of the next scope's run.
    builder.push_scope([bad, 0, 3, 1, 0, 4]);
    builder.add_scope(
        good,
        0,
        10,
        &[
            Local {
                name: "a",
                index: 0,
                attributes: 0,
            },
            Local {
                name: "b",
                index: 1,
                attributes: 0,
            },
        ],
        &[],
    );

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    assert_eq!(pdb.skipped_methods(), 1);

    let methods = &pdb.documents()[0].methods;
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].method_row(), good);
    assert_eq!(methods[0].scopes.len(), 1);

    let names: Vec<_> = methods[0].locals_at(2).map(|var| var.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_malformed_document_is_skipped() {
    let mut builder = PdbBuilder::new();
    let bad_name = builder.add_blob(&[0xFF, 0x00]);
    let bad = builder.push_document([bad_name, 0, 0, 0]);
    let good = builder.add_document("/src/Good.cs", LANGUAGE_CSHARP);
    builder.add_method(bad, &[Point::lines(0, 1, 1)]);
    builder.add_method(good, &[Point::lines(0, 2, 2)]);

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    assert_eq!(pdb.skipped_documents(), 1);
    assert_eq!(pdb.skipped_methods(), 0);
    assert_eq!(pdb.documents().len(), 1);
    assert_eq!(pdb.documents()[0].document, good);
    assert_eq!(pdb.documents()[0].methods[0].method_row(), 2);
}

#[test]
fn test_document_hash() {
    let mut builder = PdbBuilder::new();
    builder.add_document_with_hash("C:\\src\\Hashed.cs", LANGUAGE_CSHARP, HASH_SHA256, &[0xAB; 32]);

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    let document = &pdb.documents()[0];
    assert_eq!(document.file_path, "C:\\src\\Hashed.cs");
    assert_eq!(document.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(document.hash, vec![0xAB; 32]);
    assert!(document.methods.is_empty());
}

#[test]
fn test_find_documents() {
    let pdb = PdbFile::from_vec(program_pdb().build()).unwrap();

    let found: Vec<_> = pdb
        .find_documents("\\SRC\\app\\program.cs")
        .map(|doc| doc.document)
        .collect();
    assert_eq!(found, vec![1]);

    assert_eq!(pdb.find_documents("app/Program.cs").count(), 0);
    assert_eq!(pdb.find_documents("/src/app/MyProgram.cs").count(), 0);
}

#[test]
fn test_pdb_id_and_entry_point() {
    let guid = Uuid::parse_str("0b4b9d1e-2c5e-4b47-8f28-0b23ce9d4a61").unwrap();
    let mut id = [0; 20];
    id[..16].copy_from_slice(&guid.to_bytes_le());
    id[16..].copy_from_slice(&7u32.to_le_bytes());

    let mut builder = program_pdb();
    builder.set_pdb_id(id, 0x0600_0001);
    let pdb = PdbFile::from_vec(builder.build()).unwrap();

    assert_eq!(pdb.pdb_id(), Some(DebugId::from_parts(guid, 7)));
    assert_eq!(pdb.entry_point(), Some(0x0600_0001));
}

#[test]
fn test_without_pdb_stream() {
    let mut builder = program_pdb();
    builder.without_pdb_stream();
    let pdb = PdbFile::from_vec(builder.build()).unwrap();

    assert!(pdb.pdb_header().is_none());
    assert_eq!(pdb.pdb_id(), None);
    assert_eq!(pdb.entry_point(), None);
    assert_eq!(pdb.documents().len(), 2);
}

#[test]
fn test_heap_accessors() {
    let mut builder = PdbBuilder::new();
    let name = builder.add_string("value");
    let blob = builder.add_blob(&[1, 2, 3]);
    let guid = builder.add_guid(LANGUAGE_CSHARP);
    let pdb = PdbFile::from_vec(builder.build()).unwrap();

    assert_eq!(pdb.get_heap_string(name).unwrap(), "value");
    assert_eq!(pdb.get_heap_blob(blob).unwrap(), &[1, 2, 3]);
    assert_eq!(pdb.get_heap_guid(guid).unwrap(), LANGUAGE_CSHARP);
    assert!(pdb.get_heap_guid(guid + 1).is_err());
}

#[test]
fn test_unknown_stream() {
    let mut builder = PdbBuilder::new();
    builder.add_stream("#Custom", &[0; 4]);
    let err = PdbFile::from_vec(builder.build()).unwrap_err();
    assert!(matches!(err.kind(), FormatErrorKind::UnknownStream));
}

#[test]
fn test_unexpected_table() {
    let mut builder = program_pdb();
    // TypeDef
    builder.set_extra_rows(0x02, 1);
    let err = PdbFile::from_vec(builder.build()).unwrap_err();
    assert!(matches!(err.kind(), FormatErrorKind::UnexpectedTable(0x02)));
}

#[test]
fn test_trailing_tables_are_allowed() {
    let mut builder = program_pdb();
    builder.set_extra_rows(TableType::CustomDebugInformation as usize, 3);
    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    assert_eq!(
        pdb.table_header().row_count(TableType::CustomDebugInformation),
        3
    );
    assert_eq!(pdb.documents().len(), 2);
}

#[test]
fn test_large_method_def_table() {
    // The method column of LocalScope stays 2 bytes wide even for huge companion modules.
    let mut builder = PdbBuilder::new();
    let doc = builder.add_document("/src/Big.cs", LANGUAGE_CSHARP);
    let method = builder.add_method(doc, &[Point::lines(0, 1, 1)]);
    builder.add_scope(
        method,
        0,
        4,
        &[Local {
            name: "x",
            index: 0,
            attributes: 0,
        }],
        &[],
    );
    builder.set_referenced_rows(TableType::MethodDef as usize, 70_000);

    let pdb = PdbFile::from_vec(builder.build()).unwrap();
    let header = pdb.pdb_header().unwrap();
    assert_eq!(header.referenced_row_count(TableType::MethodDef), 70_000);
    assert_eq!(pdb.documents()[0].methods[0].scopes[0].variables[0].name, "x");
}

#[test]
fn test_invalid_signature() {
    let mut bytes = program_pdb().build();
    assert!(PdbFile::peek(&bytes));

    bytes[0] = b'X';
    assert!(!PdbFile::peek(&bytes));
    let err = PdbFile::from_vec(bytes).unwrap_err();
    assert!(matches!(err.kind(), FormatErrorKind::InvalidSignature));
}

#[test]
fn test_truncated_file() {
    let bytes = program_pdb().build();
    let err = PdbFile::from_vec(bytes[..bytes.len() - 8].to_vec()).unwrap_err();
    assert!(matches!(err.kind(), FormatErrorKind::InvalidLength));
}

#[test]
fn test_open() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&program_pdb().build()).unwrap();
    file.flush().unwrap();

    let pdb = PdbFile::open(file.path()).unwrap();
    assert_eq!(pdb.documents().len(), 2);

    let err = PdbFile::open(file.path().with_extension("missing")).unwrap_err();
    assert!(matches!(err.kind(), FormatErrorKind::Io));
}
