//! Source locations that comments are anchored to.

use serde::{Deserialize, Serialize};

/// Sentinel path unified diffs use for a side with no file.
pub const NON_EXISTENT_FILE: &str = "/dev/null";

/// A file as seen by the location machinery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "path")]
pub enum FileRef {
    /// A real repository-relative path.
    Normal(String),
    /// The file does not exist on this side (deleted or not yet created).
    NonExistent,
    /// Origin could not be determined.
    Unknown,
}

impl FileRef {
    /// Interpret a path taken from a unified diff header.
    #[must_use]
    pub fn from_diff_path(path: &str) -> Self {
        if path == NON_EXISTENT_FILE {
            Self::NonExistent
        } else {
            Self::Normal(path.to_string())
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Normal(path) => Some(path),
            Self::NonExistent | Self::Unknown => None,
        }
    }
}

/// A (file, line, column) anchor. Locations are primarily line-based;
/// `col` is carried through remapping untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: FileRef,
    pub line: u32,
    pub col: u32,
}

impl Location {
    #[must_use]
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            file: FileRef::Normal(path.into()),
            line,
            col: 0,
        }
    }
}
