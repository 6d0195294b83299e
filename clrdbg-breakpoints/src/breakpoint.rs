use std::cmp::Reverse;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use clrdbg_common::paths_equal_ignore_case;
use clrdbg_ppdb::{DocumentIndex, MethodInfo, PdbFile};

use crate::request::{BreakpointError, BreakpointId, BreakpointRequest};

/// The code location a breakpoint resolved to.
///
/// `method_def` and `il_offset` are what a debugger needs to set the breakpoint in the live
/// process.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResolvedLocation {
    /// The MethodDef token of the method containing the breakpoint.
    pub method_def: u32,
    /// The IL offset within the method.
    pub il_offset: u32,
    /// The path of the matched document, as recorded in the PDB.
    pub file_path: String,
    /// The first line of the sequence point the breakpoint binds to.
    pub start_line: u32,
    /// The last line of the sequence point the breakpoint binds to.
    pub end_line: u32,
}

impl fmt::Debug for ResolvedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLocation")
            .field("method_def", &format_args!("{:#010x}", self.method_def))
            .field("il_offset", &format_args!("{:#x}", self.il_offset))
            .field("file_path", &self.file_path)
            .field("start_line", &self.start_line)
            .field("end_line", &self.end_line)
            .finish()
    }
}

/// The lifecycle state of a [`Breakpoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BreakpointState {
    /// No loaded PDB contains code at the requested line.
    Unresolved,
    /// Bound to a code location, but neither activated nor deactivated yet.
    Resolved,
    /// Bound and enabled.
    Activated,
    /// Bound and disabled.
    Deactivated,
}

impl BreakpointState {
    /// Returns `true` for every state that has a [`ResolvedLocation`].
    pub fn is_resolved(self) -> bool {
        self != Self::Unresolved
    }
}

/// Finds the code location for `line` in the document at `file_path`.
///
/// Every method of a matching document whose line range contains `line` is a candidate. The
/// candidates are tried in descending order of their first line, so that the innermost of
/// nested methods (lambdas, local functions) wins. The first candidate with a visible sequence
/// point covering `line` is chosen, at the smallest IL offset of such points.
///
/// Returns `None` if no document matches or no candidate has code on that line.
pub fn resolve(pdb: &PdbFile, file_path: &str, line: u32) -> Option<ResolvedLocation> {
    let mut candidates: Vec<(&DocumentIndex, &MethodInfo)> = pdb
        .find_documents(file_path)
        .flat_map(|document| {
            document
                .methods_at_line(line)
                .map(move |method| (document, method))
        })
        .collect();

    candidates.sort_by_key(|(_, method)| Reverse(method.first_line));

    candidates.into_iter().find_map(|(document, method)| {
        let il_offset = method.il_offset_for_line(line)?;
        let point = method
            .sequence_points
            .iter()
            .find(|sp| sp.il_offset == il_offset && sp.contains_line(line))?;

        Some(ResolvedLocation {
            method_def: method.method_def,
            il_offset,
            file_path: document.file_path.clone(),
            start_line: point.start_line,
            end_line: point.end_line,
        })
    })
}

/// A source breakpoint and its resolution state.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Breakpoint {
    id: BreakpointId,
    file_path: String,
    line: u32,
    column: u32,
    state: BreakpointState,
    location: Option<ResolvedLocation>,
}

impl Breakpoint {
    /// Creates an unresolved breakpoint from a request.
    ///
    /// The request is validated first. Its activation flag is not applied, since only resolved
    /// breakpoints can be activated.
    pub fn new(request: &BreakpointRequest) -> Result<Self, BreakpointError> {
        request.validate()?;
        Ok(Self {
            id: request.id,
            file_path: request.file_path.clone(),
            line: request.line,
            column: request.column,
            state: BreakpointState::Unresolved,
            location: None,
        })
    }

    /// The client's identifier of this breakpoint.
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    /// The requested source path.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// The requested 1-based line.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The requested column, or 0. Resolution is line based and ignores it.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// The current lifecycle state.
    pub fn state(&self) -> BreakpointState {
        self.state
    }

    /// The resolved location, if any.
    pub fn location(&self) -> Option<&ResolvedLocation> {
        self.location.as_ref()
    }

    /// Returns `true` if this breakpoint was created from an equivalent source location.
    ///
    /// Paths compare the way resolution matches them, ignoring case and separator style.
    pub(crate) fn same_source(&self, request: &BreakpointRequest) -> bool {
        paths_equal_ignore_case(&self.file_path, &request.file_path)
            && self.line == request.line
            && self.column == request.column
    }

    /// Tries to bind this breakpoint to code in `pdb`.
    ///
    /// Returns `true` if the breakpoint is resolved afterwards. A breakpoint that is already
    /// resolved keeps its location. If `pdb` has no code at the requested line, the breakpoint
    /// stays unresolved and the caller can try the next file.
    pub fn try_resolve(&mut self, pdb: &PdbFile) -> bool {
        if self.state.is_resolved() {
            return true;
        }

        match resolve(pdb, &self.file_path, self.line) {
            Some(location) => {
                tracing::debug!(
                    id = %self.id,
                    file = %self.file_path,
                    line = self.line,
                    method_def = location.method_def,
                    il_offset = location.il_offset,
                    "breakpoint resolved"
                );
                self.location = Some(location);
                self.state = BreakpointState::Resolved;
                true
            }
            None => {
                tracing::debug!(
                    id = %self.id,
                    file = %self.file_path,
                    line = self.line,
                    "no code at breakpoint location"
                );
                false
            }
        }
    }

    /// Enables a resolved breakpoint.
    pub fn activate(&mut self) -> Result<(), BreakpointError> {
        self.set_active(true)
    }

    /// Disables a resolved breakpoint.
    pub fn deactivate(&mut self) -> Result<(), BreakpointError> {
        self.set_active(false)
    }

    pub(crate) fn set_active(&mut self, active: bool) -> Result<(), BreakpointError> {
        if !self.state.is_resolved() {
            return Err(BreakpointError::NotResolved(self.id));
        }

        self.state = if active {
            BreakpointState::Activated
        } else {
            BreakpointState::Deactivated
        };
        Ok(())
    }

    /// Drops the resolved location, returning it.
    pub(crate) fn unresolve(&mut self) -> Option<ResolvedLocation> {
        self.state = BreakpointState::Unresolved;
        self.location.take()
    }
}
