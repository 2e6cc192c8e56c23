//! Concrete verifiers, one per entity kind.
//!
//! Course and project verification is thin: both just reconcile the entity
//! against the external build system. All the interesting machinery lives
//! in [`submission`] and [`migrate`].

pub mod migrate;
pub mod submission;

pub use migrate::CommentMigrator;
pub use submission::SubmissionVerifier;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::build::{course_endpoint, project_scheduler, BuildService, RegisterProject};
use crate::db::{Course, Database, Project};
use crate::verify::{
    EntityId, EntityKind, EntityRef, VerificationData, Verifier, VerifyError, VerifyResult,
};

/// A course is ready once the build system exposes an endpoint for it.
pub struct CourseVerifier {
    db: Arc<Database>,
    builds: Arc<dyn BuildService>,
}

impl CourseVerifier {
    #[must_use]
    pub fn new(db: Arc<Database>, builds: Arc<dyn BuildService>) -> Self {
        Self { db, builds }
    }

    async fn check(&self, course: &Course) -> VerificationData {
        let endpoint = course_endpoint(&course.name);
        if self.builds.has_scheduler(&endpoint).await {
            VerificationData::processed()
        } else {
            warn!(course = course.id, endpoint, "course endpoint missing");
            let error = self.db.create_error(
                EntityRef::new(EntityKind::Course, course.id),
                "course build endpoint does not exist",
                json!({ "endpoint": endpoint }),
            );
            VerificationData::invalid(error)
        }
    }
}

#[async_trait]
impl Verifier for CourseVerifier {
    type Entity = Course;

    fn kind(&self) -> EntityKind {
        EntityKind::Course
    }

    async fn fetch(&self, id: EntityId) -> VerifyResult<Course> {
        self.db.course(id).ok_or(VerifyError::CourseNotFound(id))
    }

    async fn verify(&self, course: &Course) -> VerificationData {
        self.check(course).await
    }

    // Nothing to set up beyond what the build system already has.
    async fn do_process(&self, course: &Course) -> VerificationData {
        self.check(course).await
    }

    fn prerequisites(&self, _course: &Course) -> Vec<EntityRef> {
        Vec::new()
    }
}

/// A project is ready once its build scheduler exists; processing registers
/// the project with the build system to create it.
pub struct ProjectVerifier {
    db: Arc<Database>,
    builds: Arc<dyn BuildService>,
}

impl ProjectVerifier {
    #[must_use]
    pub fn new(db: Arc<Database>, builds: Arc<dyn BuildService>) -> Self {
        Self { db, builds }
    }

    fn invalid(&self, id: EntityId, failure: &str, details: serde_json::Value) -> VerificationData {
        let error = self.db.create_error(
            EntityRef::new(EntityKind::Project, id),
            failure,
            details,
        );
        VerificationData::invalid(error)
    }
}

#[async_trait]
impl Verifier for ProjectVerifier {
    type Entity = Project;

    fn kind(&self) -> EntityKind {
        EntityKind::Project
    }

    async fn fetch(&self, id: EntityId) -> VerifyResult<Project> {
        self.db.project(id).ok_or(VerifyError::ProjectNotFound(id))
    }

    async fn verify(&self, project: &Project) -> VerificationData {
        let scheduler = project_scheduler(&project.name);
        if self.builds.has_scheduler(&scheduler).await {
            VerificationData::processed()
        } else {
            self.invalid(
                project.id,
                "project build scheduler does not exist",
                json!({ "scheduler": scheduler }),
            )
        }
    }

    async fn do_process(&self, project: &Project) -> VerificationData {
        let Some(course) = self.db.course(project.course_id) else {
            return self.invalid(
                project.id,
                "owning course does not exist",
                json!({ "course_id": project.course_id }),
            );
        };
        let request = RegisterProject {
            project_id: project.id,
            course_name: course.name,
            project_name: project.name.clone(),
            repo_url: project.repo_url.clone(),
        };
        match self.builds.register_project(&request).await {
            Ok(()) => VerificationData::processed(),
            Err(err) => self.invalid(
                project.id,
                "registering project with build system failed",
                json!({ "error": err.to_string() }),
            ),
        }
    }

    fn prerequisites(&self, project: &Project) -> Vec<EntityRef> {
        vec![EntityRef::new(EntityKind::Course, project.course_id)]
    }
}
