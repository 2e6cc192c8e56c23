//! In-memory entity store.
//!
//! One concurrent map per table, process-lifetime, ids handed out from a
//! single monotonic counter. The store is deliberately dumb: all domain
//! rules live in the processors, except the few integrity constraints that
//! must hold by construction (acyclic submission lineage, at most one
//! comment row per `(submission, persistent id)`).

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::verify::{EntityId, EntityRef, ErrorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub course_id: EntityId,
    pub name: String,
    pub repo_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    Open,
    Closed,
    Invalid,
    /// Superseded by a successfully processed resubmission.
    Obsolete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: EntityId,
    pub project_id: EntityId,
    /// Forward-only lineage link; the parent is always strictly older.
    pub parent_submission_id: Option<EntityId>,
    /// Resolved exactly once during processing when submitted as "current".
    pub revision: Option<String>,
    pub state: SubmissionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Local row id; never shared across submissions.
    pub id: EntityId,
    /// Stable identity linking copies of this comment across the lineage.
    pub persistent_id: EntityId,
    pub submission_id: EntityId,
    /// The lineage submission this comment was originally authored on.
    pub original_submission_id: EntityId,
    pub sourcefile: String,
    pub sourceline: u32,
    /// Local id of the comment this one replies to, if any.
    pub previous_comment_id: Option<EntityId>,
    pub author_id: EntityId,
    pub text: String,
    pub state: CommentState,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when a human authors a brand-new comment.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub submission_id: EntityId,
    pub sourcefile: String,
    pub sourceline: u32,
    pub previous_comment_id: Option<EntityId>,
    pub author_id: EntityId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: EntityId,
    pub submission_id: EntityId,
    pub build_request_id: i64,
}

/// Persisted explanation behind an `Invalid` verification status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub entity: EntityRef,
    pub failure: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Database {
    courses: DashMap<EntityId, Course>,
    projects: DashMap<EntityId, Project>,
    submissions: DashMap<EntityId, Submission>,
    comments: DashMap<EntityId, Comment>,
    /// `(submission_id, persistent_id)` -> local comment id. Guards the
    /// at-most-one-copy-per-submission invariant under concurrent
    /// migration.
    comment_index: DashMap<(EntityId, EntityId), EntityId>,
    builds: DashMap<EntityId, Build>,
    errors: DashMap<ErrorId, ErrorRecord>,
    next_id: AtomicI64,
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn next_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create_course(&self, name: impl Into<String>) -> Course {
        let course = Course {
            id: self.next_id(),
            name: name.into(),
        };
        self.courses.insert(course.id, course.clone());
        course
    }

    pub fn create_project(
        &self,
        course_id: EntityId,
        name: impl Into<String>,
        repo_url: impl Into<String>,
    ) -> Result<Project> {
        if !self.courses.contains_key(&course_id) {
            bail!("cannot create project: course {course_id} does not exist");
        }
        let project = Project {
            id: self.next_id(),
            course_id,
            name: name.into(),
            repo_url: repo_url.into(),
        };
        self.projects.insert(project.id, project.clone());
        Ok(project)
    }

    /// First submission of a project, no parent.
    pub fn create_submission(
        &self,
        project_id: EntityId,
        revision: Option<String>,
    ) -> Result<Submission> {
        if !self.projects.contains_key(&project_id) {
            bail!("cannot create submission: project {project_id} does not exist");
        }
        let submission = Submission {
            id: self.next_id(),
            project_id,
            parent_submission_id: None,
            revision,
            state: SubmissionState::Pending,
        };
        self.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    /// Resubmission against an existing parent. The parent must already
    /// exist, which (with monotonic ids) makes lineage acyclic by
    /// construction rather than by a cycle-detection pass.
    pub fn create_resubmission(
        &self,
        parent_submission_id: EntityId,
        revision: Option<String>,
    ) -> Result<Submission> {
        let parent = self
            .submission(parent_submission_id)
            .ok_or_else(|| anyhow!("parent submission {parent_submission_id} does not exist"))?;
        let submission = Submission {
            id: self.next_id(),
            project_id: parent.project_id,
            parent_submission_id: Some(parent.id),
            revision,
            state: SubmissionState::Pending,
        };
        self.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    #[must_use]
    pub fn course(&self, id: EntityId) -> Option<Course> {
        self.courses.get(&id).map(|row| row.clone())
    }

    #[must_use]
    pub fn project(&self, id: EntityId) -> Option<Project> {
        self.projects.get(&id).map(|row| row.clone())
    }

    #[must_use]
    pub fn submission(&self, id: EntityId) -> Option<Submission> {
        self.submissions.get(&id).map(|row| row.clone())
    }

    pub fn update_submission(&self, submission: &Submission) -> Result<()> {
        match self.submissions.get_mut(&submission.id) {
            Some(mut row) => {
                *row = submission.clone();
                Ok(())
            }
            None => bail!("submission {} does not exist", submission.id),
        }
    }

    pub fn set_submission_state(&self, id: EntityId, state: SubmissionState) -> Result<()> {
        match self.submissions.get_mut(&id) {
            Some(mut row) => {
                row.state = state;
                Ok(())
            }
            None => bail!("submission {id} does not exist"),
        }
    }

    /// Author a brand-new comment; mints a fresh persistent id.
    pub fn create_comment(&self, new: NewComment) -> Result<Comment> {
        if !self.submissions.contains_key(&new.submission_id) {
            bail!(
                "cannot create comment: submission {} does not exist",
                new.submission_id
            );
        }
        let id = self.next_id();
        let comment = Comment {
            id,
            persistent_id: id,
            submission_id: new.submission_id,
            original_submission_id: new.submission_id,
            sourcefile: new.sourcefile,
            sourceline: new.sourceline,
            previous_comment_id: new.previous_comment_id,
            author_id: new.author_id,
            text: new.text,
            state: CommentState::Open,
            created_at: Utc::now(),
        };
        self.comments.insert(comment.id, comment.clone());
        self.comment_index
            .insert((comment.submission_id, comment.persistent_id), comment.id);
        Ok(comment)
    }

    /// Copy a lineage comment onto another submission. Duplicate detection,
    /// not locking: if a row for `(submission, persistent id)` already
    /// exists the existing row is returned and nothing is written.
    pub fn copy_comment(&self, source: &Comment, submission_id: EntityId) -> Comment {
        match self
            .comment_index
            .entry((submission_id, source.persistent_id))
        {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                // The index only ever points at inserted rows.
                self.comments
                    .get(&id)
                    .map(|row| row.clone())
                    .unwrap_or_else(|| {
                        let mut ghost = source.clone();
                        ghost.id = id;
                        ghost.submission_id = submission_id;
                        ghost
                    })
            }
            Entry::Vacant(slot) => {
                let mut copy = source.clone();
                copy.id = self.next_id();
                copy.submission_id = submission_id;
                slot.insert(copy.id);
                self.comments.insert(copy.id, copy.clone());
                copy
            }
        }
    }

    #[must_use]
    pub fn comment(&self, id: EntityId) -> Option<Comment> {
        self.comments.get(&id).map(|row| row.clone())
    }

    pub fn update_comment(&self, comment: &Comment) -> Result<()> {
        match self.comments.get_mut(&comment.id) {
            Some(mut row) => {
                *row = comment.clone();
                Ok(())
            }
            None => bail!("comment {} does not exist", comment.id),
        }
    }

    #[must_use]
    pub fn comments_for_submission(&self, submission_id: EntityId) -> Vec<Comment> {
        let mut rows: Vec<Comment> = self
            .comments
            .iter()
            .filter(|row| row.submission_id == submission_id)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Comment rows on `submission_id` carrying `persistent_id`; by
    /// invariant there is at most one, but lineage integrity checks want
    /// to observe violations rather than assume.
    #[must_use]
    pub fn find_comments(&self, submission_id: EntityId, persistent_id: EntityId) -> Vec<Comment> {
        let mut rows: Vec<Comment> = self
            .comments
            .iter()
            .filter(|row| {
                row.submission_id == submission_id && row.persistent_id == persistent_id
            })
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub fn create_build(&self, submission_id: EntityId, build_request_id: i64) -> Build {
        let build = Build {
            id: self.next_id(),
            submission_id,
            build_request_id,
        };
        self.builds.insert(build.id, build.clone());
        build
    }

    #[must_use]
    pub fn builds_for_submission(&self, submission_id: EntityId) -> Vec<Build> {
        let mut rows: Vec<Build> = self
            .builds
            .iter()
            .filter(|row| row.submission_id == submission_id)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Persist an error record and hand back its id for an `Invalid` status.
    pub fn create_error(
        &self,
        entity: EntityRef,
        failure: impl Into<String>,
        details: serde_json::Value,
    ) -> ErrorId {
        let record = ErrorRecord {
            id: self.next_id(),
            entity,
            failure: failure.into(),
            details,
            created_at: Utc::now(),
        };
        let id = record.id;
        self.errors.insert(id, record);
        id
    }

    #[must_use]
    pub fn error(&self, id: ErrorId) -> Option<ErrorRecord> {
        self.errors.get(&id).map(|row| row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::EntityKind;

    fn fixture(db: &Database) -> (Course, Project, Submission) {
        let course = db.create_course("algorithms");
        let project = db
            .create_project(course.id, "solution", "https://vcs/solution.git")
            .expect("project");
        let submission = db.create_submission(project.id, None).expect("submission");
        (course, project, submission)
    }

    #[test]
    fn test_resubmission_requires_existing_parent() {
        let db = Database::new();
        assert!(db.create_resubmission(999, None).is_err());

        let (_, _, parent) = fixture(&db);
        let child = db.create_resubmission(parent.id, None).expect("child");
        assert_eq!(child.parent_submission_id, Some(parent.id));
        assert_eq!(child.project_id, parent.project_id);
        // Monotonic ids keep lineage strictly forward.
        assert!(child.id > parent.id);
    }

    #[test]
    fn test_new_comment_mints_persistent_id() {
        let db = Database::new();
        let (_, _, submission) = fixture(&db);
        let comment = db
            .create_comment(NewComment {
                submission_id: submission.id,
                sourcefile: "a.kt".into(),
                sourceline: 5,
                previous_comment_id: None,
                author_id: 1,
                text: "why?".into(),
            })
            .expect("comment");
        assert_eq!(comment.persistent_id, comment.id);
        assert_eq!(comment.original_submission_id, submission.id);
    }

    #[test]
    fn test_copy_comment_is_duplicate_safe() {
        let db = Database::new();
        let (_, _, parent) = fixture(&db);
        let child = db.create_resubmission(parent.id, None).expect("child");
        let original = db
            .create_comment(NewComment {
                submission_id: parent.id,
                sourcefile: "a.kt".into(),
                sourceline: 5,
                previous_comment_id: None,
                author_id: 1,
                text: "why?".into(),
            })
            .expect("comment");

        let first = db.copy_comment(&original, child.id);
        let second = db.copy_comment(&original, child.id);
        assert_eq!(first.id, second.id);
        assert_eq!(db.comments_for_submission(child.id).len(), 1);
        assert_eq!(
            db.find_comments(child.id, original.persistent_id).len(),
            1
        );
    }

    #[test]
    fn test_error_records_round_trip() {
        let db = Database::new();
        let id = db.create_error(
            EntityRef::new(EntityKind::Submission, 3),
            "fetching remote repository failed",
            serde_json::json!({ "output": "boom" }),
        );
        let record = db.error(id).expect("record");
        assert_eq!(record.entity.id, 3);
        assert_eq!(record.failure, "fetching remote repository failed");
    }
}
