use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// The identifier a client assigns to a breakpoint.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An error returned for invalid breakpoint requests or operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BreakpointError {
    /// The request names no file.
    #[error("breakpoint path is empty")]
    EmptyPath,
    /// Lines are 1-based, so line 0 can never match.
    #[error("breakpoint line must be greater than zero")]
    ZeroLine,
    /// A breakpoint string is not of the form `file:line[:column]`.
    #[error("malformed breakpoint `{0}`, expected `file:line[:column]`")]
    Malformed(String),
    /// No breakpoint with this id exists.
    #[error("unknown breakpoint {0}")]
    UnknownId(BreakpointId),
    /// The operation needs a resolved breakpoint.
    #[error("breakpoint {0} is not resolved")]
    NotResolved(BreakpointId),
    /// Several requests of one sync share an id.
    #[error("duplicate breakpoint {0}")]
    DuplicateId(BreakpointId),
}

/// A request to set a breakpoint at a source location.
///
/// This is the record a client sends to create or update a breakpoint. It can be parsed from
/// strings like `Program.cs:12` or `C:\src\Program.cs:12:9`:
///
/// ```
/// use clrdbg_breakpoints::BreakpointRequest;
///
/// let request: BreakpointRequest = "C:\\src\\Program.cs:12:9".parse().unwrap();
/// assert_eq!(request.file_path, "C:\\src\\Program.cs");
/// assert_eq!(request.line, 12);
/// assert_eq!(request.column, 9);
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BreakpointRequest {
    /// The client's identifier of the breakpoint.
    pub id: BreakpointId,
    /// The path of the source file, compared ignoring case and separator style.
    pub file_path: String,
    /// The 1-based line.
    pub line: u32,
    /// The 1-based column, or 0 if unspecified.
    #[cfg_attr(feature = "serde", serde(default))]
    pub column: u32,
    /// Whether the breakpoint should be active once resolved.
    #[cfg_attr(feature = "serde", serde(default = "default_activated"))]
    pub activated: bool,
}

#[cfg(feature = "serde")]
fn default_activated() -> bool {
    true
}

impl BreakpointRequest {
    /// Creates an active request for `file_path:line`.
    pub fn new(id: BreakpointId, file_path: impl Into<String>, line: u32) -> Self {
        Self {
            id,
            file_path: file_path.into(),
            line,
            column: 0,
            activated: true,
        }
    }

    /// Replaces the id of this request.
    pub fn with_id(mut self, id: BreakpointId) -> Self {
        self.id = id;
        self
    }

    /// Sets whether the breakpoint should be active once resolved.
    pub fn with_activated(mut self, activated: bool) -> Self {
        self.activated = activated;
        self
    }

    /// Checks that the request can possibly be resolved.
    pub fn validate(&self) -> Result<(), BreakpointError> {
        if self.file_path.trim().is_empty() {
            return Err(BreakpointError::EmptyPath);
        }
        if self.line == 0 {
            return Err(BreakpointError::ZeroLine);
        }
        Ok(())
    }
}

impl FromStr for BreakpointRequest {
    type Err = BreakpointError;

    /// Parses `file:line[:column]`, splitting from the right so drive letters stay in the path.
    ///
    /// The parsed request has id 0 and is active.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BreakpointError::Malformed(s.to_owned());

        let (rest, last) = s.rsplit_once(':').ok_or_else(malformed)?;
        let last: u32 = last.trim().parse().map_err(|_| malformed())?;

        let (file_path, line, column) = match rest.rsplit_once(':') {
            Some((file_path, line)) => match line.trim().parse::<u32>() {
                Ok(line) => (file_path, line, last),
                Err(_) => (rest, last, 0),
            },
            None => (rest, last, 0),
        };

        let request = Self {
            column,
            ..Self::new(BreakpointId::default(), file_path, line)
        };
        request.validate()?;
        Ok(request)
    }
}
