//! Generic, cache-driven verification engine.
//!
//! One engine exists per entity type. The engine never holds a lock across
//! its slow work (prerequisite verification, `do_process`); consistency
//! comes from optimistic CAS on the [`VerificationCache`] plus retrying the
//! whole call when a race is lost. Concurrent callers may duplicate
//! in-flight work, but only one install wins and losers discard theirs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use super::{
    EntityId, EntityKind, EntityRef, VerificationCache, VerificationData, VerificationStatus,
    VerifyResult,
};

/// Per-entity-type plug-in driven by the engine.
///
/// `verify` and `do_process` are infallible by contract: a verifier converts
/// its own failures into `Invalid` plus a persisted error record instead of
/// propagating them, so a broken entity can never poison the engine.
#[async_trait]
pub trait Verifier: Send + Sync {
    type Entity: Send + Sync;

    fn kind(&self) -> EntityKind;

    /// Load the entity backing `id`.
    async fn fetch(&self, id: EntityId) -> VerifyResult<Self::Entity>;

    /// Cheap, side-effect-free status check.
    async fn verify(&self, entity: &Self::Entity) -> VerificationData;

    /// The heavy processing step. Only ever invoked by [`VerificationEngine::process`]
    /// once all prerequisites verified as `Processed`.
    async fn do_process(&self, entity: &Self::Entity) -> VerificationData;

    /// References to entities that must be `Processed` before this one.
    fn prerequisites(&self, entity: &Self::Entity) -> Vec<EntityRef>;
}

/// Read-only status query into another entity type's engine.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn verify_status(&self, id: EntityId) -> VerifyResult<VerificationData>;
}

/// Drives `process`/`verify` for one entity type.
pub struct VerificationEngine<V: Verifier> {
    verifier: V,
    cache: VerificationCache,
    deps: HashMap<EntityKind, Arc<dyn StatusSource>>,
}

impl<V: Verifier> VerificationEngine<V> {
    pub fn new(verifier: V) -> Self {
        Self {
            verifier,
            cache: VerificationCache::new(),
            deps: HashMap::new(),
        }
    }

    /// Register the engine answering status queries for a prerequisite kind.
    #[must_use]
    pub fn with_prerequisite(mut self, kind: EntityKind, source: Arc<dyn StatusSource>) -> Self {
        self.deps.insert(kind, source);
        self
    }

    /// Full processing: claim the entry, settle prerequisites, run
    /// `do_process`, install the result.
    ///
    /// Cached `Processed` and `NotReady` are returned as-is (callers poll
    /// `NotReady` again later). `Unknown` and `Invalid` entries are
    /// (re-)attempted. Every lost CAS restarts the whole call.
    pub async fn process(&self, id: EntityId) -> VerifyResult<VerificationData> {
        loop {
            let entity = self.verifier.fetch(id).await?;
            let current = self.cache.ensure(id);
            match current.status {
                VerificationStatus::Processed | VerificationStatus::NotReady => return Ok(current),
                VerificationStatus::Unknown | VerificationStatus::Invalid => {}
            }

            if !self
                .cache
                .compare_and_swap(id, &current, VerificationData::not_ready())
            {
                debug!(kind = %self.verifier.kind(), id, "lost claim race, retrying process");
                continue;
            }

            let result = self.settle(&entity).await?;

            if self
                .cache
                .compare_and_swap(id, &VerificationData::not_ready(), result.clone())
            {
                return Ok(result);
            }
            debug!(kind = %self.verifier.kind(), id, "lost install race, retrying process");
        }
    }

    /// Cheap status query: lazily creates the entry and recomputes only from
    /// `Unknown`, through the verifier's side-effect-free `verify`. Never
    /// triggers `do_process`.
    pub async fn verify(&self, id: EntityId) -> VerifyResult<VerificationData> {
        loop {
            let entity = self.verifier.fetch(id).await?;
            let current = self.cache.ensure(id);
            if current.status != VerificationStatus::Unknown {
                return Ok(current);
            }

            if !self
                .cache
                .compare_and_swap(id, &current, VerificationData::not_ready())
            {
                debug!(kind = %self.verifier.kind(), id, "lost claim race, retrying verify");
                continue;
            }

            let result = self.verifier.verify(&entity).await;

            if self
                .cache
                .compare_and_swap(id, &VerificationData::not_ready(), result.clone())
            {
                return Ok(result);
            }
            debug!(kind = %self.verifier.kind(), id, "lost install race, retrying verify");
        }
    }

    /// Verify all prerequisites and decide what to install: the `do_process`
    /// result when all are `Processed`, the unioned `Invalid` when any are
    /// invalid, `Unknown` otherwise (a later call retries once they settle).
    async fn settle(&self, entity: &V::Entity) -> VerifyResult<VerificationData> {
        let refs = self.verifier.prerequisites(entity);
        let statuses = try_join_all(
            refs.iter()
                .map(|prereq| self.verify_prerequisite(*prereq)),
        )
        .await?;

        if statuses.iter().all(VerificationData::is_processed) {
            return Ok(self.verifier.do_process(entity).await);
        }

        let mut errors = Vec::new();
        for status in &statuses {
            if status.is_invalid() {
                errors.extend(status.errors.iter().copied());
            }
        }
        if errors.is_empty() {
            Ok(VerificationData::unknown())
        } else {
            Ok(VerificationData::invalid_all(errors))
        }
    }

    async fn verify_prerequisite(&self, prereq: EntityRef) -> VerifyResult<VerificationData> {
        match self.deps.get(&prereq.kind) {
            Some(source) => source.verify_status(prereq.id).await,
            None => {
                // No engine registered for this kind; treat as settled.
                debug!(kind = %prereq.kind, id = prereq.id, "no status source registered");
                Ok(VerificationData::processed())
            }
        }
    }
}

#[async_trait]
impl<V: Verifier> StatusSource for VerificationEngine<V> {
    async fn verify_status(&self, id: EntityId) -> VerifyResult<VerificationData> {
        self.verify(id).await
    }
}
