//! Common data types used across `clrdbg` crates.

use std::fmt;
use std::str;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An error returned for unknown or invalid [`Language`] names.
#[derive(Debug)]
pub struct UnknownLanguageError;

impl fmt::Display for UnknownLanguageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown language")
    }
}

impl std::error::Error for UnknownLanguageError {}

/// The source language of a document, as recorded in a Portable PDB `Document` row.
///
/// The language is identified by a GUID in the symbol file. Languages without a well-known GUID
/// map to [`Language::Unknown`].
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Language {
    #[default]
    Unknown = 0,
    CSharp = 1,
    VisualBasic = 2,
    FSharp = 3,
}

impl Language {
    /// Creates a `Language` from its `u32` representation.
    ///
    /// Returns `Language::Unknown` for all unknown values.
    pub fn from_u32(val: u32) -> Language {
        match val {
            1 => Self::CSharp,
            2 => Self::VisualBasic,
            3 => Self::FSharp,
            _ => Self::Unknown,
        }
    }

    /// Returns the name of the language.
    ///
    /// The name is always given in lower case without special characters or spaces, suitable for
    /// serialization and parsing. For a human readable name, use the `Display` implementation.
    ///
    /// ```
    /// use clrdbg_common::Language;
    ///
    /// assert_eq!(Language::CSharp.name(), "csharp");
    /// assert_eq!(Language::CSharp.to_string(), "C#");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::CSharp => "csharp",
            Language::VisualBasic => "vb",
            Language::FSharp => "fsharp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = match *self {
            Language::Unknown => "unknown",
            Language::CSharp => "C#",
            Language::VisualBasic => "Visual Basic",
            Language::FSharp => "F#",
        };

        f.write_str(formatted)
    }
}

impl str::FromStr for Language {
    type Err = UnknownLanguageError;

    fn from_str(string: &str) -> Result<Language, UnknownLanguageError> {
        Ok(match string {
            "unknown" => Language::Unknown,
            "csharp" => Language::CSharp,
            "vb" => Language::VisualBasic,
            "fsharp" => Language::FSharp,
            _ => return Err(UnknownLanguageError),
        })
    }
}
