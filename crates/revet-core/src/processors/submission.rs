//! The submission pipeline: revision resolution, comment migration,
//! build triggering.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::build::{project_scheduler, BuildService};
use crate::db::{Database, Submission, SubmissionState};
use crate::processors::CommentMigrator;
use crate::vcs::{CloneStatus, Revision, VcsService};
use crate::verify::{
    EntityId, EntityKind, EntityRef, VerificationData, Verifier, VerifyError, VerifyResult,
};

pub struct SubmissionVerifier {
    db: Arc<Database>,
    vcs: Arc<dyn VcsService>,
    builds: Arc<dyn BuildService>,
    migrator: CommentMigrator,
}

/// Outcome of the availability checks shared by `verify` and `do_process`.
enum Preflight {
    /// Clone is there and the revision exists; `uid` addresses the clone.
    Ready { uid: String },
    /// Not ready or broken; install this instead.
    Settled(VerificationData),
}

impl SubmissionVerifier {
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        vcs: Arc<dyn VcsService>,
        builds: Arc<dyn BuildService>,
        migrator: CommentMigrator,
    ) -> Self {
        Self {
            db,
            vcs,
            builds,
            migrator,
        }
    }

    fn invalid(&self, id: EntityId, failure: &str, details: serde_json::Value) -> VerificationData {
        warn!(submission = id, failure, "submission invalid");
        let error = self
            .db
            .create_error(EntityRef::new(EntityKind::Submission, id), failure, details);
        VerificationData::invalid(error)
    }

    /// Checks 1-2: VCS clone availability, then revision existence.
    async fn preflight(&self, submission: &Submission) -> Preflight {
        let Some(project) = self.db.project(submission.project_id) else {
            return Preflight::Settled(self.invalid(
                submission.id,
                "owning project does not exist",
                json!({ "project_id": submission.project_id }),
            ));
        };

        let repo = self.vcs.repository(&project.repo_url).await;
        match repo.status {
            CloneStatus::Pending => return Preflight::Settled(VerificationData::unknown()),
            CloneStatus::Failed => {
                return Preflight::Settled(self.invalid(
                    submission.id,
                    "fetching remote repository failed",
                    json!({ "repo_url": project.repo_url, "output": repo.output }),
                ));
            }
            CloneStatus::Done => {}
        }

        let rev = Revision::from_stored(submission.revision.as_deref());
        if let Err(failure) = self.vcs.ls(&repo.uid, &rev).await {
            return Preflight::Settled(self.invalid(
                submission.id,
                "revision not found in repository",
                json!({ "revision": rev.to_string(), "output": failure.output }),
            ));
        }

        Preflight::Ready { uid: repo.uid }
    }

    /// The hand-off barrier for resubmissions: the child only counts as
    /// verified once `do_process` (here or on another node) has migrated
    /// every parent comment and retired the parent.
    fn parent_handed_off(&self, submission: &Submission) -> VerifyResult<bool> {
        let Some(parent_id) = submission.parent_submission_id else {
            return Ok(true);
        };
        let parent = self
            .db
            .submission(parent_id)
            .ok_or(VerifyError::SubmissionNotFound(parent_id))?;
        if parent.state != SubmissionState::Obsolete {
            return Ok(false);
        }
        let child_ids: HashSet<EntityId> = self
            .db
            .comments_for_submission(submission.id)
            .iter()
            .map(|c| c.persistent_id)
            .collect();
        Ok(self
            .db
            .comments_for_submission(parent.id)
            .iter()
            .all(|c| child_ids.contains(&c.persistent_id)))
    }

    async fn process_inner(&self, submission: &Submission) -> anyhow::Result<VerificationData> {
        let uid = match self.preflight(submission).await {
            Preflight::Ready { uid } => uid,
            Preflight::Settled(data) => return Ok(data),
        };

        // Pin the revision exactly once; every later remap and build uses
        // the resolved id, not the moving tip.
        let mut submission = submission.clone();
        if submission.revision.is_none() {
            let (resolved, _branch) = self
                .vcs
                .info(&uid, &Revision::Current, None)
                .await
                .map_err(anyhow::Error::from)?;
            info!(submission = submission.id, revision = %resolved, "pinned revision");
            submission.revision = Some(resolved);
            self.db.update_submission(&submission)?;
        }

        if let Some(parent_id) = submission.parent_submission_id {
            let parent = self
                .db
                .submission(parent_id)
                .ok_or_else(|| anyhow::anyhow!("parent submission {parent_id} is gone"))?;
            // Migration strictly precedes retiring the parent; the barrier
            // in verify reads these two effects in the same order.
            self.migrator.migrate(&uid, &parent, &submission).await?;
            self.db
                .set_submission_state(parent.id, SubmissionState::Obsolete)?;
        }

        let builds = self.db.builds_for_submission(submission.id);
        match builds.len() {
            0 => {
                let project = self
                    .db
                    .project(submission.project_id)
                    .ok_or_else(|| anyhow::anyhow!("owning project is gone"))?;
                let revision = submission
                    .revision
                    .clone()
                    .unwrap_or_else(|| Revision::Current.to_string());
                let scheduler = project_scheduler(&project.name);
                match self.builds.trigger(&scheduler, &revision).await {
                    Ok(request_id) => {
                        self.db.create_build(submission.id, request_id);
                        Ok(VerificationData::processed())
                    }
                    Err(err) => Ok(self.invalid(
                        submission.id,
                        "triggering build failed",
                        json!({ "scheduler": scheduler, "error": err.to_string() }),
                    )),
                }
            }
            1 => Ok(VerificationData::processed()),
            n => Ok(self.invalid(
                submission.id,
                "multiple build records for one submission",
                json!({ "count": n }),
            )),
        }
    }
}

#[async_trait]
impl Verifier for SubmissionVerifier {
    type Entity = Submission;

    fn kind(&self) -> EntityKind {
        EntityKind::Submission
    }

    async fn fetch(&self, id: EntityId) -> VerifyResult<Submission> {
        self.db
            .submission(id)
            .ok_or(VerifyError::SubmissionNotFound(id))
    }

    async fn verify(&self, submission: &Submission) -> VerificationData {
        match self.preflight(submission).await {
            Preflight::Ready { .. } => {}
            Preflight::Settled(data) => return data,
        }

        match self.parent_handed_off(submission) {
            Ok(true) => {}
            Ok(false) => return VerificationData::unknown(),
            Err(err) => {
                return self.invalid(
                    submission.id,
                    "parent submission is gone",
                    json!({ "error": err.to_string() }),
                );
            }
        }

        match self.db.builds_for_submission(submission.id).len() {
            0 => VerificationData::unknown(),
            1 => VerificationData::processed(),
            n => self.invalid(
                submission.id,
                "multiple build records for one submission",
                json!({ "count": n }),
            ),
        }
    }

    async fn do_process(&self, submission: &Submission) -> VerificationData {
        let result = match self.process_inner(submission).await {
            Ok(data) => data,
            Err(err) => self.invalid(
                submission.id,
                "submission processing failed",
                json!({ "error": format!("{err:#}") }),
            ),
        };

        // A submission still pending review opens (or dies) with its first
        // completed processing round.
        if let Some(current) = self.db.submission(submission.id) {
            if current.state == SubmissionState::Pending {
                let next = if result.is_processed() {
                    Some(SubmissionState::Open)
                } else if result.is_invalid() {
                    Some(SubmissionState::Invalid)
                } else {
                    None
                };
                if let Some(state) = next {
                    if let Err(err) = self.db.set_submission_state(current.id, state) {
                        warn!(submission = current.id, %err, "state advance failed");
                    }
                }
            }
        }

        result
    }

    fn prerequisites(&self, submission: &Submission) -> Vec<EntityRef> {
        // The parent link is deliberately not a prerequisite; the hand-off
        // barrier in verify covers it without recursing up the lineage.
        vec![EntityRef::new(EntityKind::Project, submission.project_id)]
    }
}
