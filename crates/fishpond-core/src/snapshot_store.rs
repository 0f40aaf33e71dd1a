//! Snapshot store collaborator.
//!
//! Bead: fp-snapshot-store
//!
//! Local snapshots are kept per fish and format version, one per tier.
//! Writes are idempotent: storing the same (fish, version, tier) again
//! overwrites. Invalidation deletes every snapshot at or after a cutoff key.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::debug;

use crate::error::SnapshotStoreError;
use crate::event::EventKey;
use crate::snapshot::{FishId, SerializedSnapshot};
use crate::snapshot_scheduler::SnapshotTier;

/// Persistent storage for local snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Newest snapshot (by event key) of the given format version.
    fn retrieve_snapshot(
        &self,
        fish: &FishId,
        version: u32,
    ) -> impl Future<Output = Result<Option<SerializedSnapshot>, SnapshotStoreError>> + Send;

    /// Store `snapshot` in `tier`. Returns false if the tier already holds a
    /// newer snapshot and the write was skipped.
    fn store_snapshot(
        &self,
        fish: &FishId,
        tier: SnapshotTier,
        snapshot: SerializedSnapshot,
    ) -> impl Future<Output = Result<bool, SnapshotStoreError>> + Send;

    /// Delete every snapshot of `fish` whose event key is `>= cutoff`.
    fn invalidate_snapshots(
        &self,
        fish: &FishId,
        cutoff: &EventKey,
    ) -> impl Future<Output = Result<(), SnapshotStoreError>> + Send;
}

type Shelf = BTreeMap<SnapshotTier, SerializedSnapshot>;

/// Snapshot store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    shelves: Mutex<HashMap<(FishId, u32), Shelf>>,
    stores: AtomicU64,
    invalidations: AtomicU64,
    failing_retrievals: AtomicU32,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(FishId, u32), Shelf>>, SnapshotStoreError> {
        self.shelves
            .lock()
            .map_err(|e| SnapshotStoreError::Poisoned(e.to_string()))
    }

    /// Make the next `n` retrievals fail as unavailable.
    pub fn fail_retrievals(&self, n: u32) {
        self.failing_retrievals.store(n, Ordering::SeqCst);
    }

    /// Every stored snapshot of `fish`, ascending by event key.
    #[must_use]
    pub fn snapshots(&self, fish: &FishId) -> Vec<(SnapshotTier, SerializedSnapshot)> {
        let Ok(shelves) = self.lock() else {
            return Vec::new();
        };
        let mut all: Vec<(SnapshotTier, SerializedSnapshot)> = shelves
            .iter()
            .filter(|((id, _), _)| id == fish)
            .flat_map(|(_, shelf)| shelf.iter().map(|(t, s)| (*t, s.clone())))
            .collect();
        all.sort_by(|a, b| a.1.event_key.cmp(&b.1.event_key));
        all
    }

    #[must_use]
    pub fn store_count(&self) -> u64 {
        self.stores.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    async fn retrieve_snapshot(
        &self,
        fish: &FishId,
        version: u32,
    ) -> Result<Option<SerializedSnapshot>, SnapshotStoreError> {
        let failing = self
            .failing_retrievals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SnapshotStoreError::Unavailable(
                "injected retrieval failure".into(),
            ));
        }
        let shelves = self.lock()?;
        Ok(shelves.get(&(fish.clone(), version)).and_then(|shelf| {
            shelf
                .values()
                .max_by(|a, b| a.event_key.cmp(&b.event_key))
                .cloned()
        }))
    }

    async fn store_snapshot(
        &self,
        fish: &FishId,
        tier: SnapshotTier,
        snapshot: SerializedSnapshot,
    ) -> Result<bool, SnapshotStoreError> {
        let mut shelves = self.lock()?;
        let shelf = shelves
            .entry((fish.clone(), snapshot.version))
            .or_default();
        if shelf
            .get(&tier)
            .is_some_and(|existing| existing.event_key > snapshot.event_key)
        {
            debug!(fish = %fish, %tier, "Skipping stale snapshot write");
            return Ok(false);
        }
        shelf.insert(tier, snapshot);
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn invalidate_snapshots(
        &self,
        fish: &FishId,
        cutoff: &EventKey,
    ) -> Result<(), SnapshotStoreError> {
        let mut shelves = self.lock()?;
        let mut removed = 0_usize;
        for ((id, _), shelf) in shelves.iter_mut() {
            if id != fish {
                continue;
            }
            let before = shelf.len();
            shelf.retain(|_, snap| snap.event_key < *cutoff);
            removed += before - shelf.len();
        }
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        debug!(fish = %fish, %cutoff, removed, "Invalidated snapshots");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::OffsetMap;

    fn snap(lamport: u64, version: u32, cycle: u64) -> SerializedSnapshot {
        SerializedSnapshot {
            event_key: EventKey::new(lamport, "s"),
            offsets: OffsetMap::empty(),
            horizon: None,
            cycle,
            version,
            state: serde_json::json!(cycle),
        }
    }

    fn fish() -> FishId {
        FishId::new("counter", "main")
    }

    #[tokio::test]
    async fn retrieve_returns_newest_across_tiers() {
        let store = InMemorySnapshotStore::new();
        store.store_snapshot(&fish(), SnapshotTier(1), snap(20, 1, 20)).await.unwrap();
        store.store_snapshot(&fish(), SnapshotTier(0), snap(30, 1, 30)).await.unwrap();
        let got = store.retrieve_snapshot(&fish(), 1).await.unwrap().unwrap();
        assert_eq!(got.cycle, 30);
        assert!(store.retrieve_snapshot(&fish(), 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tier_keeps_one_snapshot_and_skips_stale_writes() {
        let store = InMemorySnapshotStore::new();
        assert!(store.store_snapshot(&fish(), SnapshotTier(0), snap(10, 1, 10)).await.unwrap());
        assert!(store.store_snapshot(&fish(), SnapshotTier(0), snap(30, 1, 30)).await.unwrap());
        assert!(!store.store_snapshot(&fish(), SnapshotTier(0), snap(20, 1, 20)).await.unwrap());
        assert_eq!(store.snapshots(&fish()).len(), 1);
        assert_eq!(store.store_count(), 2);
    }

    #[tokio::test]
    async fn invalidation_cuts_at_and_after_key() {
        let store = InMemorySnapshotStore::new();
        store.store_snapshot(&fish(), SnapshotTier(2), snap(10, 1, 10)).await.unwrap();
        store.store_snapshot(&fish(), SnapshotTier(1), snap(20, 1, 20)).await.unwrap();
        store.store_snapshot(&fish(), SnapshotTier(0), snap(30, 1, 30)).await.unwrap();
        let other = FishId::new("counter", "other");
        store.store_snapshot(&other, SnapshotTier(0), snap(30, 1, 30)).await.unwrap();

        store
            .invalidate_snapshots(&fish(), &EventKey::new(20, "s"))
            .await
            .unwrap();

        let cycles: Vec<u64> = store.snapshots(&fish()).iter().map(|(_, s)| s.cycle).collect();
        assert_eq!(cycles, vec![10]);
        assert_eq!(store.snapshots(&other).len(), 1);
        assert_eq!(store.invalidation_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = InMemorySnapshotStore::new();
        store.fail_retrievals(1);
        let err = store.retrieve_snapshot(&fish(), 1).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.retrieve_snapshot(&fish(), 1).await.unwrap().is_none());
    }
}
