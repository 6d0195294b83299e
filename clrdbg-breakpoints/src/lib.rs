//! Resolution of source breakpoints in managed (.NET) code.
//!
//! A debugger receives breakpoints as source locations, `file:line[:column]`, but sets them in
//! the running process as a method token and an IL offset within that method. This crate maps
//! one to the other using the sequence points of [Portable PDB](clrdbg_ppdb) files.
//!
//! # Functionality
//!
//! * Parse and validate requests with [`BreakpointRequest`].
//! * Resolve a single location with [`resolve`] or [`Breakpoint::try_resolve`].
//! * Keep a session's breakpoints in a [`BreakpointCollection`], which resolves them as PDB files
//!   are loaded and reports every change as a [`BreakpointEvent`].
//!
//! Paths are compared as a whole, ignoring case and the style of path separators. A request
//! for `test/program.cs` matches a document `Test\Program.cs` but neither
//! `blah/test/program.cs` nor `test/different_program.cs`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use clrdbg_breakpoints::{BreakpointCollection, BreakpointEvent, BreakpointRequest};
//! use clrdbg_ppdb::PdbFile;
//!
//! let collection = BreakpointCollection::new();
//! let request: BreakpointRequest = "/src/app/Program.cs:12".parse().unwrap();
//! collection.sync(vec![request]).unwrap();
//!
//! let pdb = Arc::new(PdbFile::open("app.pdb").unwrap());
//! for event in collection.add_pdb(pdb) {
//!     if let BreakpointEvent::Activated { id, location } = event {
//!         println!("{id} at {:#x}+{:#x}", location.method_def, location.il_offset);
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - `serde` (optional): Implements `serde::Deserialize` and `serde::Serialize` for requests,
//!   locations, breakpoint snapshots and events.

#![warn(missing_docs)]

mod breakpoint;
mod collection;
mod request;

pub use breakpoint::{resolve, Breakpoint, BreakpointState, ResolvedLocation};
pub use collection::{BreakpointCollection, BreakpointEvent};
pub use request::{BreakpointError, BreakpointId, BreakpointRequest};
