//! `clrdbg` reads the debug information of managed (.NET) programs and maps source locations to
//! code, as a debugger needs to when setting breakpoints. It consists of multiple crates which are
//! bundled here behind features.
//!
//! # What's in the package
//!
//! - Decoding of Portable PDB files
//!   - Metadata root, stream and table headers
//!   - Document, method, local scope, variable and constant tables
//!   - Sequence points, including hidden and multi-document methods
//! - Per-document indices of methods with their line ranges and locals
//! - Breakpoint resolution
//!   - Parsing and validation of `file:line[:column]` requests
//!   - Innermost-method matching of lines to method tokens and IL offsets
//!   - A thread-safe breakpoint collection reporting changes as events
//!
//! # Usage
//!
//! Add `clrdbg` as a dependency to your `Cargo.toml`. The following features are available:
//!
//! - **`ppdb`** (default): Decoding of Portable PDB files.
//! - **`breakpoints`** (default): Breakpoint resolution and bookkeeping. Implies `ppdb`.
//!
//! There are also alternate versions for some of the above features that additionally add
//! implementations for `serde::{Deserialize, Serialize}` on suitable types:
//!
//! - **`common-serde`**
//! - **`breakpoints-serde`**

#![warn(missing_docs)]

#[doc(inline)]
pub use clrdbg_common as common;
#[doc(inline)]
#[cfg(feature = "ppdb")]
pub use clrdbg_ppdb as ppdb;
#[doc(inline)]
#[cfg(feature = "breakpoints")]
pub use clrdbg_breakpoints as breakpoints;
