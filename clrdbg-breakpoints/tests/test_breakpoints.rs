use std::sync::Arc;

use clrdbg_breakpoints::{
    resolve, BreakpointCollection, BreakpointError, BreakpointEvent, BreakpointId,
    BreakpointRequest, BreakpointState,
};
use clrdbg_ppdb::PdbFile;
use clrdbg_testutils::{PdbBuilder, Point, LANGUAGE_CSHARP};

use similar_asserts::assert_eq;

/// `Program.cs` with `Main` on lines 10 to 14 and `Run` on lines 20 to 40, which contains a
/// lambda on lines 27 to 35.
fn program_pdb() -> PdbFile {
    let mut builder = PdbBuilder::new();
    let program = builder.add_document("/src/app/Program.cs", LANGUAGE_CSHARP);
    let nested = builder.add_document("/src/app/test/program.cs", LANGUAGE_CSHARP);

    builder.add_method(
        program,
        &[
            Point::lines(0x00, 10, 10),
            Point::Hidden(0x02),
            Point::lines(0x06, 12, 13),
            Point::lines(0x0c, 14, 14),
        ],
    );
    builder.add_method(
        program,
        &[
            Point::lines(0x00, 20, 20),
            Point::lines(0x08, 32, 32),
            Point::lines(0x10, 40, 40),
        ],
    );
    builder.add_method(
        program,
        &[
            Point::lines(0x00, 27, 27),
            Point::lines(0x04, 32, 32),
            Point::lines(0x0a, 35, 35),
        ],
    );
    builder.add_method(nested, &[Point::lines(0x00, 5, 6)]);

    PdbFile::from_vec(builder.build()).unwrap()
}

fn util_pdb() -> PdbFile {
    let mut builder = PdbBuilder::new();
    let util = builder.add_document("C:\\src\\lib\\Util.cs", LANGUAGE_CSHARP);
    builder.add_method(util, &[Point::lines(0x00, 3, 3), Point::lines(0x05, 4, 4)]);
    PdbFile::from_vec(builder.build()).unwrap()
}

fn request(id: u32, location: &str) -> BreakpointRequest {
    let request: BreakpointRequest = location.parse().unwrap();
    request.with_id(BreakpointId(id))
}

#[test]
fn test_closest_enclosing_method() {
    let pdb = program_pdb();

    let location = resolve(&pdb, "/src/app/Program.cs", 32).unwrap();
    assert_eq!(location.method_def, 0x0600_0003);
    assert_eq!(location.il_offset, 0x04);

    let location = resolve(&pdb, "/src/app/Program.cs", 20).unwrap();
    assert_eq!(location.method_def, 0x0600_0002);
    assert_eq!(location.il_offset, 0x00);
}

#[test]
fn test_resolve_skips_hidden_points() {
    let pdb = program_pdb();

    let location = resolve(&pdb, "/src/app/Program.cs", 13).unwrap();
    assert_eq!(location.method_def, 0x0600_0001);
    assert_eq!(location.il_offset, 0x06);
    assert_eq!((location.start_line, location.end_line), (12, 13));

    // Inside the method, but no statement on this line.
    assert_eq!(resolve(&pdb, "/src/app/Program.cs", 11), None);
    assert_eq!(resolve(&pdb, "/src/app/Program.cs", 100), None);
}

#[test]
fn test_path_matching() {
    let pdb = program_pdb();

    assert!(resolve(&pdb, "/src/app/Program.cs", 10).is_some());
    assert!(resolve(&pdb, "/SRC/APP/program.cs", 10).is_some());
    assert!(resolve(&pdb, "\\src\\app\\Program.cs", 10).is_some());
    assert!(resolve(&pdb, "/src/app/MyProgram.cs", 10).is_none());
    assert!(resolve(&pdb, "app/Program.cs", 10).is_none());

    let location = resolve(&pdb, "/src/app/test/Program.cs", 5).unwrap();
    assert_eq!(location.file_path, "/src/app/test/program.cs");
    assert!(resolve(&pdb, "/src/app/blah/test/program.cs", 5).is_none());
    assert!(resolve(&pdb, "/src/app/test/different_program.cs", 5).is_none());
}

#[test]
fn test_sync_reconciles() {
    let collection = BreakpointCollection::new();
    collection.add_pdb(Arc::new(program_pdb()));

    let events = collection
        .sync(vec![
            request(1, "/src/app/Program.cs:12"),
            request(2, "/src/app/Program.cs:40"),
        ])
        .unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(
        collection.get(BreakpointId(1)).unwrap().state(),
        BreakpointState::Activated
    );

    let events = collection
        .sync(vec![
            request(1, "/src/app/Program.cs:12"),
            request(3, "/src/app/Missing.cs:1"),
        ])
        .unwrap();

    let breakpoints = collection.breakpoints();
    let ids: Vec<_> = breakpoints.iter().map(|bp| bp.id()).collect();
    assert_eq!(ids, [BreakpointId(1), BreakpointId(3)]);
    assert_eq!(breakpoints[0].state(), BreakpointState::Activated);
    assert_eq!(breakpoints[0].location().unwrap().il_offset, 0x06);
    assert_eq!(breakpoints[1].state(), BreakpointState::Unresolved);

    // Only the removal is reported, the kept breakpoint is untouched.
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        BreakpointEvent::Removed { id: BreakpointId(2), location: Some(location) }
            if location.method_def == 0x0600_0002
    ));
}

#[test]
fn test_sync_moved_breakpoint() {
    let collection = BreakpointCollection::new();
    collection.add_pdb(Arc::new(program_pdb()));
    collection
        .sync(vec![request(1, "/src/app/Program.cs:12")])
        .unwrap();

    let events = collection
        .sync(vec![request(1, "/src/app/Program.cs:14")])
        .unwrap();
    let kinds: Vec<_> = events
        .iter()
        .map(|event| match event {
            BreakpointEvent::Resolved { .. } => "resolved",
            BreakpointEvent::Unresolved { .. } => "unresolved",
            BreakpointEvent::Activated { .. } => "activated",
            BreakpointEvent::Deactivated { .. } => "deactivated",
            BreakpointEvent::Removed { .. } => "removed",
        })
        .collect();
    assert_eq!(kinds, ["unresolved", "resolved", "activated"]);

    let breakpoint = collection.get(BreakpointId(1)).unwrap();
    assert_eq!(breakpoint.line(), 14);
    assert_eq!(breakpoint.location().unwrap().il_offset, 0x0c);
}

#[test]
fn test_sync_same_path_other_spelling() {
    let collection = BreakpointCollection::new();
    collection.add_pdb(Arc::new(program_pdb()));
    collection
        .sync(vec![request(1, "/src/app/Program.cs:12")])
        .unwrap();

    let events = collection
        .sync(vec![request(1, "\\SRC\\app\\program.cs:12")])
        .unwrap();
    assert!(events.is_empty());

    let breakpoint = collection.get(BreakpointId(1)).unwrap();
    assert_eq!(breakpoint.state(), BreakpointState::Activated);
    assert_eq!(breakpoint.location().unwrap().il_offset, 0x06);
}

#[test]
fn test_sync_rejects_invalid_requests() {
    let collection = BreakpointCollection::new();
    collection
        .sync(vec![request(1, "/src/app/Program.cs:12")])
        .unwrap();

    let duplicate = collection.sync(vec![
        request(2, "/src/app/Program.cs:12"),
        request(2, "/src/app/Program.cs:13"),
    ]);
    assert_eq!(duplicate, Err(BreakpointError::DuplicateId(BreakpointId(2))));

    let zero_line = collection.sync(vec![BreakpointRequest::new(
        BreakpointId(3),
        "/src/app/Program.cs",
        0,
    )]);
    assert_eq!(zero_line, Err(BreakpointError::ZeroLine));

    let ids: Vec<_> = collection.breakpoints().iter().map(|bp| bp.id()).collect();
    assert_eq!(ids, [BreakpointId(1)]);
}

#[test]
fn test_resolve_when_pdb_loads() {
    let collection = BreakpointCollection::new();
    let events = collection
        .sync(vec![
            request(1, "C:/src/lib/util.cs:4"),
            request(2, "/src/app/Program.cs:10").with_activated(false),
        ])
        .unwrap();
    assert!(events.is_empty());

    let program = Arc::new(program_pdb());
    let events = collection.add_pdb(Arc::clone(&program));
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], BreakpointEvent::Resolved { id: BreakpointId(2), .. }));
    assert!(matches!(events[1], BreakpointEvent::Deactivated { id: BreakpointId(2), .. }));

    let util = Arc::new(util_pdb());
    let events = collection.add_pdb(Arc::clone(&util));
    assert_eq!(events.len(), 2);
    let location = collection
        .get(BreakpointId(1))
        .unwrap()
        .location()
        .cloned()
        .unwrap();
    assert_eq!(location.file_path, "C:\\src\\lib\\Util.cs");
    assert_eq!(location.il_offset, 0x05);
    assert_eq!(collection.pdb_count(), 2);

    let events = collection.remove_pdb(&util);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], BreakpointEvent::Unresolved { id: BreakpointId(1), .. }));
    assert_eq!(
        collection.get(BreakpointId(1)).unwrap().state(),
        BreakpointState::Unresolved
    );
    assert_eq!(
        collection.get(BreakpointId(2)).unwrap().state(),
        BreakpointState::Deactivated
    );

    assert!(collection.resolve_pending().is_empty());
}

#[test]
fn test_activate_deactivate() {
    let collection = BreakpointCollection::new();
    collection.add_pdb(Arc::new(program_pdb()));
    collection
        .sync(vec![
            request(1, "/src/app/Program.cs:14"),
            request(2, "/src/app/Nowhere.cs:14"),
        ])
        .unwrap();

    let event = collection.deactivate(BreakpointId(1)).unwrap();
    assert!(matches!(event, Some(BreakpointEvent::Deactivated { .. })));
    assert_eq!(collection.deactivate(BreakpointId(1)), Ok(None));

    let event = collection.activate(BreakpointId(1)).unwrap();
    assert!(matches!(event, Some(BreakpointEvent::Activated { .. })));

    assert_eq!(
        collection.activate(BreakpointId(2)),
        Err(BreakpointError::NotResolved(BreakpointId(2)))
    );
    assert_eq!(
        collection.activate(BreakpointId(9)),
        Err(BreakpointError::UnknownId(BreakpointId(9)))
    );
}

#[test]
fn test_shared_between_threads() {
    let collection = Arc::new(BreakpointCollection::new());
    collection.add_pdb(Arc::new(program_pdb()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let collection = Arc::clone(&collection);
            std::thread::spawn(move || {
                collection
                    .sync(vec![request(i, "/src/app/Program.cs:32")])
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let breakpoints = collection.breakpoints();
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(breakpoints[0].state(), BreakpointState::Activated);
}

#[cfg(feature = "serde")]
#[test]
fn test_request_from_json() {
    let request: BreakpointRequest =
        serde_json::from_str(r#"{"id": 4, "file_path": "/src/app/Program.cs", "line": 12}"#)
            .unwrap();
    assert_eq!(
        request,
        BreakpointRequest::new(BreakpointId(4), "/src/app/Program.cs", 12)
    );
    assert_eq!(request.column, 0);
    assert!(request.activated);

    let request: BreakpointRequest = serde_json::from_str(
        r#"{"id": 5, "file_path": "a.cs", "line": 3, "column": 9, "activated": false}"#,
    )
    .unwrap();
    assert_eq!(request.column, 9);
    assert!(!request.activated);
}

#[cfg(feature = "serde")]
#[test]
fn test_event_json_layout() {
    let collection = BreakpointCollection::new();
    collection.add_pdb(Arc::new(program_pdb()));
    let events = collection
        .sync(vec![request(1, "/src/app/Program.cs:14")])
        .unwrap();

    let json = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "event": "activated",
            "id": 1,
            "location": {
                "method_def": 0x0600_0001,
                "il_offset": 0x0c,
                "file_path": "/src/app/Program.cs",
                "start_line": 14,
                "end_line": 14,
            },
        })
    );

    let event: BreakpointEvent = serde_json::from_value(json).unwrap();
    assert_eq!(event, events[1]);
}
