//! Verification state model shared by every entity type.
//!
//! A [`VerificationData`] answers "is this entity ready for use?": either we
//! do not know yet, somebody is working on it, it is good, or it is broken
//! with at least one persisted error record attached.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod engine;
pub mod service;

pub use cache::VerificationCache;
pub use engine::{Verifier, VerificationEngine};
pub use service::VerificationService;

/// Database id of an entity row.
pub type EntityId = i64;

/// Id of a persisted error record explaining an `Invalid` status.
pub type ErrorId = i64;

/// Entity types that participate in verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Project,
    Submission,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Project => "project",
            Self::Submission => "submission",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an entity row in another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    #[must_use]
    pub const fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

/// Lifecycle status of a verification cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// Never verified, or needs re-verification.
    Unknown,
    /// Somebody is processing this entity right now; poll again later.
    NotReady,
    /// Terminal success.
    Processed,
    /// Terminal failure with attached error records.
    Invalid,
}

/// Verification status plus the error records backing an `Invalid` result.
///
/// Invariant: `errors` is non-empty iff `status == Invalid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationData {
    pub status: VerificationStatus,
    pub errors: Vec<ErrorId>,
}

impl VerificationData {
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: VerificationStatus::Unknown,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn not_ready() -> Self {
        Self {
            status: VerificationStatus::NotReady,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn processed() -> Self {
        Self {
            status: VerificationStatus::Processed,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid(error: ErrorId) -> Self {
        Self::invalid_all(vec![error])
    }

    #[must_use]
    pub fn invalid_all(errors: Vec<ErrorId>) -> Self {
        debug_assert!(!errors.is_empty(), "Invalid requires at least one error");
        Self {
            status: VerificationStatus::Invalid,
            errors,
        }
    }

    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.status == VerificationStatus::Processed
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.status == VerificationStatus::Invalid
    }

    /// Combine two results: `Invalid` dominates and unions its errors,
    /// then `NotReady`, then `Unknown`; `Processed` only survives meeting
    /// another `Processed`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        use VerificationStatus::{Invalid, NotReady, Processed};
        match (self.status, other.status) {
            (Invalid, Invalid) => {
                let mut errors = self.errors;
                errors.extend(other.errors);
                Self::invalid_all(errors)
            }
            (Invalid, _) => self,
            (_, Invalid) => other,
            (NotReady, _) | (_, NotReady) => Self::not_ready(),
            (Processed, Processed) => Self::processed(),
            _ => Self::unknown(),
        }
    }
}

impl Default for VerificationData {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Result type alias for verification operations.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors surfaced by the verification layer itself.
///
/// Domain failures (VCS down, broken comment lineage, duplicate builds) do
/// not show up here: those become `Invalid` cache entries with persisted
/// error records. This enum only covers requests the layer cannot answer.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("course not found: {0}")]
    CourseNotFound(EntityId),

    #[error("project not found: {0}")]
    ProjectNotFound(EntityId),

    #[error("submission not found: {0}")]
    SubmissionNotFound(EntityId),

    /// An internal error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
