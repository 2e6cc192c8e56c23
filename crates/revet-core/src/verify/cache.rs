//! Per-entity-type verification cache.
//!
//! One shared in-memory map per entity table, holding the lifetime of the
//! process and rebuilt empty on restart. Compare-and-swap is the only
//! mutator: the engine's retry loop relies on losing CAS races cleanly
//! instead of holding locks across slow work.

use dashmap::DashMap;

use super::{EntityId, VerificationData};

/// Lock-free store of [`VerificationData`] keyed by entity id.
#[derive(Debug, Default)]
pub struct VerificationCache {
    entries: DashMap<EntityId, VerificationData>,
}

impl VerificationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `id`, if one was ever created.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<VerificationData> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    /// Lazily create the entry as `Unknown` and return the current value.
    #[must_use]
    pub fn ensure(&self, id: EntityId) -> VerificationData {
        self.entries
            .entry(id)
            .or_insert_with(VerificationData::unknown)
            .clone()
    }

    /// Replace the entry only if it still equals `expected`.
    ///
    /// Returns whether the swap happened. A `false` return means another
    /// caller won the race; the caller is expected to retry from scratch.
    #[must_use]
    pub fn compare_and_swap(
        &self,
        id: EntityId,
        expected: &VerificationData,
        new: VerificationData,
    ) -> bool {
        // The entry guard pins the shard lock for the duration of the
        // compare+store, which makes the pair atomic.
        match self.entries.get_mut(&id) {
            Some(mut entry) if *entry == *expected => {
                *entry = new;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::VerificationStatus;

    #[test]
    fn test_ensure_creates_unknown() {
        let cache = VerificationCache::new();
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.ensure(1), VerificationData::unknown());
        assert_eq!(cache.get(1), Some(VerificationData::unknown()));
    }

    #[test]
    fn test_ensure_keeps_existing_entry() {
        let cache = VerificationCache::new();
        let _ = cache.ensure(1);
        assert!(cache.compare_and_swap(
            1,
            &VerificationData::unknown(),
            VerificationData::processed()
        ));
        assert_eq!(cache.ensure(1), VerificationData::processed());
    }

    #[test]
    fn test_cas_rejects_stale_expectation() {
        let cache = VerificationCache::new();
        let _ = cache.ensure(1);
        assert!(cache.compare_and_swap(
            1,
            &VerificationData::unknown(),
            VerificationData::not_ready()
        ));

        // A second caller still holding the Unknown snapshot must lose.
        assert!(!cache.compare_and_swap(
            1,
            &VerificationData::unknown(),
            VerificationData::not_ready()
        ));
        assert_eq!(
            cache.get(1).map(|data| data.status),
            Some(VerificationStatus::NotReady)
        );
    }

    #[test]
    fn test_cas_on_missing_entry_fails() {
        let cache = VerificationCache::new();
        assert!(!cache.compare_and_swap(
            42,
            &VerificationData::unknown(),
            VerificationData::processed()
        ));
    }
}
