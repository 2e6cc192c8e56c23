//! Wires one engine per entity kind and exposes the public surface.

use std::sync::Arc;

use crate::build::{BoundedBuilds, BuildService};
use crate::db::Database;
use crate::processors::{CommentMigrator, CourseVerifier, ProjectVerifier, SubmissionVerifier};
use crate::remap::LocationMapper;
use crate::vcs::VcsService;
use crate::verify::engine::StatusSource;
use crate::verify::{EntityId, EntityKind, VerificationData, VerificationEngine, VerifyResult};

/// The verification front door: `status` for poll-safe reads, `process`
/// to drive an entity forward. Engines are wired bottom-up so each one
/// answers status queries for the kinds depending on it.
pub struct VerificationService {
    courses: Arc<VerificationEngine<CourseVerifier>>,
    projects: Arc<VerificationEngine<ProjectVerifier>>,
    submissions: Arc<VerificationEngine<SubmissionVerifier>>,
}

/// Default cap on simultaneously in-flight build triggers.
const MAX_IN_FLIGHT_BUILDS: usize = 4;

impl VerificationService {
    /// Wire the engines over the given stores and services. The build
    /// service is wrapped in a [`BoundedBuilds`] gate so a burst of
    /// submissions cannot fan out unbounded triggers.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        vcs: Arc<dyn VcsService>,
        builds: Arc<dyn BuildService>,
    ) -> Self {
        Self::with_build_cap(db, vcs, builds, MAX_IN_FLIGHT_BUILDS)
    }

    #[must_use]
    pub fn with_build_cap(
        db: Arc<Database>,
        vcs: Arc<dyn VcsService>,
        builds: Arc<dyn BuildService>,
        max_in_flight_builds: usize,
    ) -> Self {
        let builds: Arc<dyn BuildService> =
            Arc::new(BoundedBuilds::new(builds, max_in_flight_builds));
        let courses = Arc::new(VerificationEngine::new(CourseVerifier::new(
            Arc::clone(&db),
            Arc::clone(&builds),
        )));
        let projects = Arc::new(
            VerificationEngine::new(ProjectVerifier::new(Arc::clone(&db), Arc::clone(&builds)))
                .with_prerequisite(
                    EntityKind::Course,
                    Arc::clone(&courses) as Arc<dyn StatusSource>,
                ),
        );
        let migrator =
            CommentMigrator::new(Arc::clone(&db), LocationMapper::new(Arc::clone(&vcs)));
        let submissions = Arc::new(
            VerificationEngine::new(SubmissionVerifier::new(db, vcs, builds, migrator))
                .with_prerequisite(
                    EntityKind::Project,
                    Arc::clone(&projects) as Arc<dyn StatusSource>,
                ),
        );
        Self {
            courses,
            projects,
            submissions,
        }
    }

    /// Idempotent, side-effect-free status read.
    pub async fn status(&self, kind: EntityKind, id: EntityId) -> VerifyResult<VerificationData> {
        match kind {
            EntityKind::Course => self.courses.verify(id).await,
            EntityKind::Project => self.projects.verify(id).await,
            EntityKind::Submission => self.submissions.verify(id).await,
        }
    }

    /// Drive an entity through processing (may trigger builds, migrate
    /// comments). Poll again on `NotReady`.
    pub async fn process(&self, kind: EntityKind, id: EntityId) -> VerifyResult<VerificationData> {
        match kind {
            EntityKind::Course => self.courses.process(id).await,
            EntityKind::Project => self.projects.process(id).await,
            EntityKind::Submission => self.submissions.process(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeBuilds, FakeVcs};
    use crate::verify::VerificationStatus;

    struct Fixture {
        db: Arc<Database>,
        builds: Arc<FakeBuilds>,
        service: VerificationService,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::new());
        let vcs = Arc::new(FakeVcs::new("r1"));
        let builds = Arc::new(FakeBuilds::new());
        let service = VerificationService::new(
            Arc::clone(&db),
            vcs as Arc<dyn VcsService>,
            Arc::clone(&builds) as Arc<dyn BuildService>,
        );
        Fixture {
            db,
            builds,
            service,
        }
    }

    #[tokio::test]
    async fn test_submission_processes_through_the_whole_chain() {
        let fx = fixture();
        fx.builds.add_scheduler("algo");
        fx.builds.add_scheduler("solution-force");
        let course = fx.db.create_course("algo");
        let project = fx
            .db
            .create_project(course.id, "solution", "https://vcs/s.git")
            .expect("project");
        let submission = fx
            .db
            .create_submission(project.id, Some("r1".into()))
            .expect("submission");

        let data = fx
            .service
            .process(EntityKind::Submission, submission.id)
            .await
            .expect("process");
        assert_eq!(data, VerificationData::processed());
        assert_eq!(fx.db.builds_for_submission(submission.id).len(), 1);
    }

    #[tokio::test]
    async fn test_broken_course_poisons_the_chain() {
        let fx = fixture();
        // No course endpoint registered: processing the project settles it
        // Invalid with the course's error, and the submission inherits the
        // cached result.
        fx.builds.add_scheduler("solution-force");
        let course = fx.db.create_course("algo");
        let project = fx
            .db
            .create_project(course.id, "solution", "https://vcs/s.git")
            .expect("project");
        let submission = fx
            .db
            .create_submission(project.id, Some("r1".into()))
            .expect("submission");

        let data = fx
            .service
            .process(EntityKind::Project, project.id)
            .await
            .expect("process project");
        assert_eq!(data.status, VerificationStatus::Invalid);
        let record = fx.db.error(data.errors[0]).expect("record");
        assert_eq!(record.failure, "course build endpoint does not exist");

        let data = fx
            .service
            .process(EntityKind::Submission, submission.id)
            .await
            .expect("process submission");
        assert_eq!(data.status, VerificationStatus::Invalid);
        assert_eq!(data.errors, vec![record.id]);
    }

    #[tokio::test]
    async fn test_status_is_read_only() {
        let fx = fixture();
        fx.builds.add_scheduler("algo");
        fx.builds.add_scheduler("solution-force");
        let course = fx.db.create_course("algo");
        let project = fx
            .db
            .create_project(course.id, "solution", "https://vcs/s.git")
            .expect("project");
        let submission = fx
            .db
            .create_submission(project.id, Some("r1".into()))
            .expect("submission");

        // No build yet, so status reports Unknown without triggering one.
        let data = fx
            .service
            .status(EntityKind::Submission, submission.id)
            .await
            .expect("status");
        assert_eq!(data, VerificationData::unknown());
        assert!(fx.db.builds_for_submission(submission.id).is_empty());
    }
}
