//! Scriptable stand-ins for the external VCS and build services.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::build::{BuildService, RegisterProject};
use crate::vcs::{CloneStatus, RepositoryInfo, Revision, VcsFailure, VcsResult, VcsService};

/// In-memory VCS: revisions are just string keys, file contents and diffs
/// are whatever the test scripted.
pub(crate) struct FakeVcs {
    status: Mutex<CloneStatus>,
    output: Mutex<String>,
    head: Mutex<String>,
    revisions: DashMap<String, ()>,
    /// `(revision, path)` -> file contents.
    files: DashMap<(String, String), String>,
    /// `(path, from, to)` -> unified diff text.
    diffs: DashMap<(String, String, String), String>,
    pub(crate) cats: AtomicUsize,
}

impl FakeVcs {
    pub(crate) fn new(head: &str) -> Self {
        let vcs = Self {
            status: Mutex::new(CloneStatus::Done),
            output: Mutex::new(String::new()),
            head: Mutex::new(head.to_string()),
            revisions: DashMap::new(),
            files: DashMap::new(),
            diffs: DashMap::new(),
            cats: AtomicUsize::new(0),
        };
        vcs.add_revision(head);
        vcs
    }

    pub(crate) fn set_status(&self, status: CloneStatus, output: &str) {
        *self.status.lock().unwrap() = status;
        *self.output.lock().unwrap() = output.to_string();
    }

    pub(crate) fn add_revision(&self, rev: &str) {
        self.revisions.insert(rev.to_string(), ());
    }

    pub(crate) fn put_file(&self, rev: &str, path: &str, contents: &str) {
        self.add_revision(rev);
        self.files
            .insert((rev.to_string(), path.to_string()), contents.to_string());
    }

    pub(crate) fn put_diff(&self, path: &str, from: &str, to: &str, text: &str) {
        self.diffs.insert(
            (path.to_string(), from.to_string(), to.to_string()),
            text.to_string(),
        );
    }

    fn resolve(&self, rev: &Revision) -> String {
        match rev {
            Revision::Current => self.head.lock().unwrap().clone(),
            Revision::Id(id) => id.clone(),
        }
    }
}

#[async_trait]
impl VcsService for FakeVcs {
    async fn repository(&self, _repo_url: &str) -> RepositoryInfo {
        RepositoryInfo {
            uid: "repo".to_string(),
            status: *self.status.lock().unwrap(),
            output: self.output.lock().unwrap().clone(),
        }
    }

    async fn cat(&self, _uid: &str, path: &str, rev: &Revision) -> VcsResult<String> {
        self.cats.fetch_add(1, Ordering::SeqCst);
        let rev = self.resolve(rev);
        self.files
            .get(&(rev.clone(), path.to_string()))
            .map(|contents| contents.clone())
            .ok_or_else(|| VcsFailure::new(format!("no file {path} at {rev}")))
    }

    async fn ls(&self, _uid: &str, rev: &Revision) -> VcsResult<Vec<String>> {
        let rev = self.resolve(rev);
        if !self.revisions.contains_key(&rev) {
            return Err(VcsFailure::new(format!("unknown revision {rev}")));
        }
        let mut paths: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.key().0 == rev)
            .map(|entry| entry.key().1.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn diff_file(
        &self,
        _uid: &str,
        path: &str,
        from: &Revision,
        to: &Revision,
    ) -> VcsResult<String> {
        let key = (path.to_string(), self.resolve(from), self.resolve(to));
        // Unscripted pairs diff clean, like an untouched file.
        Ok(self.diffs.get(&key).map_or_else(String::new, |d| d.clone()))
    }

    async fn diff_all(&self, _uid: &str, from: &Revision, to: &Revision) -> VcsResult<String> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        let mut chunks: Vec<(String, String)> = self
            .diffs
            .iter()
            .filter(|entry| entry.key().1 == from && entry.key().2 == to)
            .map(|entry| (entry.key().0.clone(), entry.clone()))
            .collect();
        chunks.sort();
        Ok(chunks.into_iter().map(|(_, text)| text).collect())
    }

    async fn info(
        &self,
        _uid: &str,
        rev: &Revision,
        branch: Option<&str>,
    ) -> VcsResult<(String, String)> {
        let resolved = self.resolve(rev);
        if !self.revisions.contains_key(&resolved) {
            return Err(VcsFailure::new(format!("unknown revision {resolved}")));
        }
        Ok((resolved, branch.unwrap_or("default").to_string()))
    }
}

/// Build service fake: schedulers are registered by name, triggers count.
#[derive(Default)]
pub(crate) struct FakeBuilds {
    schedulers: DashMap<String, ()>,
    pub(crate) triggers: AtomicUsize,
    fail_trigger: AtomicBool,
    next_request: AtomicI64,
    pub(crate) registered: Mutex<Vec<RegisterProject>>,
}

impl FakeBuilds {
    pub(crate) fn new() -> Self {
        Self {
            next_request: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub(crate) fn add_scheduler(&self, name: &str) {
        self.schedulers.insert(name.to_string(), ());
    }

    pub(crate) fn fail_triggers(&self) {
        self.fail_trigger.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuildService for FakeBuilds {
    async fn has_scheduler(&self, scheduler_id: &str) -> bool {
        self.schedulers.contains_key(scheduler_id)
    }

    async fn register_project(&self, request: &RegisterProject) -> Result<()> {
        self.registered.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn trigger(&self, _scheduler_id: &str, _revision: &str) -> Result<i64> {
        if self.fail_trigger.load(Ordering::SeqCst) {
            bail!("build system refused the trigger");
        }
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_request.fetch_add(1, Ordering::SeqCst))
    }
}
