//! Common functionality for `clrdbg`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ByteView`]: Gives access to binary data in-memory or on the file system.
//!  - [`Language`]: The source language of a document recorded in a symbol file.
//!  - Functions to compare and split paths coming from different platforms.
//!
//! # Features
//!
//! - `serde` (optional): Implements `serde::Deserialize` and `serde::Serialize` for all data types.

#![warn(missing_docs)]

mod byteview;
mod path;
mod types;

pub use crate::byteview::*;
pub use crate::path::*;
pub use crate::types::*;

pub use debugid::*;
pub use uuid::Uuid;
