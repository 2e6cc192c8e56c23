//! Interface to the external VCS service.
//!
//! The actual git/mercurial porcelain runs elsewhere; this crate only
//! consumes the operations below. Command failures are values carrying the
//! captured output, never panics: the verification pipeline turns them
//! into `Invalid` statuses with persisted error records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A revision selector: either the symbolic current tip or an opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Revision {
    Current,
    Id(String),
}

impl Revision {
    /// Parse a user- or DB-supplied revision string.
    #[must_use]
    pub fn parse(rep: &str) -> Self {
        match rep.to_ascii_lowercase().as_str() {
            "" | "tip" | "head" | "current" => Self::Current,
            _ => Self::Id(rep.to_string()),
        }
    }

    /// Selector for a stored, possibly unresolved revision column.
    #[must_use]
    pub fn from_stored(stored: Option<&str>) -> Self {
        stored.map_or(Self::Current, |rep| Self::parse(rep))
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// A failed VCS operation, carrying whatever the command printed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("vcs operation failed: {output}")]
pub struct VcsFailure {
    pub output: String,
}

impl VcsFailure {
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

pub type VcsResult<T> = Result<T, VcsFailure>;

/// Where the service is with cloning a remote repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStatus {
    Pending,
    Done,
    Failed,
}

/// Handle to a (possibly still arriving) local clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Opaque handle the service resolves to the local clone.
    pub uid: String,
    pub status: CloneStatus,
    /// Captured command output; interesting when `status` is `Failed`.
    pub output: String,
}

/// The VCS operations the verification core consumes.
#[async_trait]
pub trait VcsService: Send + Sync {
    /// Ensure a clone of `repo_url` exists (or is on its way) and report
    /// its status. Idempotent; covers the external clone/update lifecycle.
    async fn repository(&self, repo_url: &str) -> RepositoryInfo;

    /// Contents of `path` at `rev`.
    async fn cat(&self, uid: &str, path: &str, rev: &Revision) -> VcsResult<String>;

    /// All paths present at `rev`. Also the cheapest probe for whether a
    /// revision exists at all.
    async fn ls(&self, uid: &str, rev: &Revision) -> VcsResult<Vec<String>>;

    /// Unified diff of one file between two revisions.
    async fn diff_file(
        &self,
        uid: &str,
        path: &str,
        from: &Revision,
        to: &Revision,
    ) -> VcsResult<String>;

    /// Unified diff of the whole tree between two revisions.
    async fn diff_all(&self, uid: &str, from: &Revision, to: &Revision) -> VcsResult<String>;

    /// Resolve `rev` (and optionally a branch) to `(revision_id, branch)`.
    async fn info(
        &self,
        uid: &str,
        rev: &Revision,
        branch: Option<&str>,
    ) -> VcsResult<(String, String)>;
}
