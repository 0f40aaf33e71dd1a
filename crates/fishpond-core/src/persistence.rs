//! Background snapshot persistence.
//!
//! Bead: fp-persist
//!
//! Computing a state never waits for storage. Snapshot writes and
//! invalidations are handed to a worker task through a bounded FIFO:
//!
//! ```text
//!   engine ──Store/Invalidate/Flush──▶ [ bounded mpsc ] ──▶ worker ──▶ SnapshotStore
//! ```
//!
//! Jobs apply strictly in submission order, so writes land in cycle order and
//! an invalidation is never overtaken by an older write. Failures are logged
//! and skipped. Dropping every [`SnapshotPersister`] handle closes the queue;
//! the worker still drains what was already submitted.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::event::EventKey;
use crate::snapshot::{FishId, SerializedSnapshot};
use crate::snapshot_scheduler::SnapshotTier;
use crate::snapshot_store::SnapshotStore;

enum PersistJob {
    Store {
        fish: FishId,
        tier: SnapshotTier,
        snapshot: SerializedSnapshot,
    },
    Invalidate {
        fish: FishId,
        cutoff: EventKey,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the persistence worker.
#[derive(Debug, Clone)]
pub struct SnapshotPersister {
    tx: mpsc::Sender<PersistJob>,
}

impl SnapshotPersister {
    /// Spawn a worker on the current tokio runtime.
    pub fn spawn<SS: SnapshotStore + 'static>(store: Arc<SS>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(store, rx));
        Self { tx }
    }

    async fn submit(&self, job: PersistJob) -> bool {
        if self.tx.send(job).await.is_err() {
            warn!("Snapshot persister stopped; dropping job");
            return false;
        }
        true
    }

    /// Queue a snapshot write.
    pub async fn store(&self, fish: FishId, tier: SnapshotTier, snapshot: SerializedSnapshot) {
        self.submit(PersistJob::Store {
            fish,
            tier,
            snapshot,
        })
        .await;
    }

    /// Queue deletion of every snapshot at or after `cutoff`.
    pub async fn invalidate(&self, fish: FishId, cutoff: EventKey) {
        self.submit(PersistJob::Invalidate { fish, cutoff }).await;
    }

    /// Wait until every job submitted so far has been applied.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.submit(PersistJob::Flush(done_tx)).await {
            return false;
        }
        done_rx.await.is_ok()
    }
}

async fn run_worker<SS: SnapshotStore>(store: Arc<SS>, mut rx: mpsc::Receiver<PersistJob>) {
    let mut written = 0_u64;
    let mut failed = 0_u64;
    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Store {
                fish,
                tier,
                snapshot,
            } => {
                let cycle = snapshot.cycle;
                match store.store_snapshot(&fish, tier, snapshot).await {
                    Ok(true) => {
                        written += 1;
                        debug!(fish = %fish, %tier, cycle, "Stored local snapshot");
                    }
                    Ok(false) => {
                        debug!(fish = %fish, %tier, cycle, "Snapshot store declined write");
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(fish = %fish, %tier, cycle, error = %e, "Failed to store local snapshot");
                    }
                }
            }
            PersistJob::Invalidate { fish, cutoff } => {
                if let Err(e) = store.invalidate_snapshots(&fish, &cutoff).await {
                    failed += 1;
                    warn!(fish = %fish, %cutoff, error = %e, "Failed to invalidate snapshots");
                }
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(written, failed, "Snapshot persister drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::OffsetMap;
    use crate::snapshot_store::InMemorySnapshotStore;

    fn snap(lamport: u64) -> SerializedSnapshot {
        SerializedSnapshot {
            event_key: EventKey::new(lamport, "s"),
            offsets: OffsetMap::empty(),
            horizon: None,
            cycle: lamport,
            version: 1,
            state: serde_json::json!(lamport),
        }
    }

    #[tokio::test]
    async fn jobs_apply_in_submission_order() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let persister = SnapshotPersister::spawn(Arc::clone(&store), 2);
        let fish = FishId::new("f", "1");

        persister.store(fish.clone(), SnapshotTier(0), snap(10)).await;
        persister.store(fish.clone(), SnapshotTier(1), snap(20)).await;
        persister.invalidate(fish.clone(), EventKey::new(15, "s")).await;
        persister.store(fish.clone(), SnapshotTier(0), snap(12)).await;
        assert!(persister.flush().await);

        let cycles: Vec<u64> = store.snapshots(&fish).iter().map(|(_, s)| s.cycle).collect();
        assert_eq!(cycles, vec![12]);
        assert_eq!(store.invalidation_count(), 1);
    }

    #[tokio::test]
    async fn dropped_handle_still_drains_queue() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let persister = SnapshotPersister::spawn(Arc::clone(&store), 8);
        let fish = FishId::new("f", "1");
        for lamport in 1..=5 {
            persister.store(fish.clone(), SnapshotTier(lamport as u8), snap(lamport)).await;
        }
        drop(persister);

        for _ in 0..100 {
            if store.store_count() == 5 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.store_count(), 5);
    }
}
