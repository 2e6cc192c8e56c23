//! Interface to the external build system, plus admission control.
//!
//! The core only ever asks the build system three things: does a
//! scheduler/endpoint exist, register a project, and trigger a build for a
//! revision. Build completion arrives out of band; the pipeline only cares
//! about the persisted `Build` record.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

/// Request to register a project with the build system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterProject {
    pub project_id: i64,
    pub course_name: String,
    pub project_name: String,
    pub repo_url: String,
}

#[async_trait]
pub trait BuildService: Send + Sync {
    /// Whether the named scheduler/endpoint is known to the build system.
    async fn has_scheduler(&self, scheduler_id: &str) -> bool;

    /// Make the build system aware of a project.
    async fn register_project(&self, request: &RegisterProject) -> Result<()>;

    /// Kick off an asynchronous build of `revision`; returns the build
    /// request id acknowledged by the scheduler.
    async fn trigger(&self, scheduler_id: &str, revision: &str) -> Result<i64>;
}

#[async_trait]
impl<B: BuildService + ?Sized> BuildService for Arc<B> {
    async fn has_scheduler(&self, scheduler_id: &str) -> bool {
        (**self).has_scheduler(scheduler_id).await
    }

    async fn register_project(&self, request: &RegisterProject) -> Result<()> {
        (**self).register_project(request).await
    }

    async fn trigger(&self, scheduler_id: &str, revision: &str) -> Result<i64> {
        (**self).trigger(scheduler_id, revision).await
    }
}

/// Build-system endpoint name for a course.
#[must_use]
pub fn course_endpoint(course_name: &str) -> String {
    sanitize(course_name)
}

/// Force-scheduler name for a project.
#[must_use]
pub fn project_scheduler(project_name: &str) -> String {
    format!("{}-force", sanitize(project_name))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Caps the number of simultaneously in-flight `trigger` calls.
///
/// The external build system owns its own queueing, but unbounded
/// trigger fan-out from a burst of submissions can still drown it;
/// callers beyond the cap queue on the semaphore.
pub struct BoundedBuilds<B> {
    inner: B,
    permits: Arc<Semaphore>,
}

impl<B> BoundedBuilds<B> {
    #[must_use]
    pub fn new(inner: B, max_in_flight: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }
}

#[async_trait]
impl<B: BuildService> BuildService for BoundedBuilds<B> {
    async fn has_scheduler(&self, scheduler_id: &str) -> bool {
        self.inner.has_scheduler(scheduler_id).await
    }

    async fn register_project(&self, request: &RegisterProject) -> Result<()> {
        self.inner.register_project(request).await
    }

    async fn trigger(&self, scheduler_id: &str, revision: &str) -> Result<i64> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("build admission semaphore closed")?;
        debug!(scheduler_id, revision, "triggering build");
        self.inner.trigger(scheduler_id, revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_scheduler_names() {
        assert_eq!(course_endpoint("Algo Course 2026"), "algo-course-2026");
        assert_eq!(project_scheduler("My Project"), "my-project-force");
    }

    struct SlowBuilds {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BuildService for SlowBuilds {
        async fn has_scheduler(&self, _scheduler_id: &str) -> bool {
            true
        }

        async fn register_project(&self, _request: &RegisterProject) -> Result<()> {
            Ok(())
        }

        async fn trigger(&self, _scheduler_id: &str, _revision: &str) -> Result<i64> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_builds_caps_a_shared_service() {
        // The gate also has to work over a shared trait object, which is
        // how the verification service wires it.
        let slow = Arc::new(SlowBuilds {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let bounded = Arc::new(BoundedBuilds::new(
            Arc::clone(&slow) as Arc<dyn BuildService>,
            2,
        ));

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let bounded = Arc::clone(&bounded);
                tokio::spawn(async move {
                    bounded.trigger("sched", &format!("rev{i}")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("trigger");
        }

        assert!(slow.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_builds_caps_in_flight_triggers() {
        let bounded = Arc::new(BoundedBuilds::new(
            SlowBuilds {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            2,
        ));

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let bounded = Arc::clone(&bounded);
                tokio::spawn(async move {
                    bounded.trigger("sched", &format!("rev{i}")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("trigger");
        }

        assert!(bounded.inner.peak.load(Ordering::SeqCst) <= 2);
    }
}
