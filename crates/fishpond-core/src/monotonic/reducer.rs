//! Head-only reducer for upstreams that signal time travel themselves.
//!
//! Bead: fp-monotonic
//!
//! The reducer folds forward onto a single head snapshot. Scheduled positions
//! are copied into a FIFO of snapshot candidates; a candidate leaves the
//! queue once it is old enough, measured against the newest event seen.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::event::{Event, EventKey, Timestamp};
use crate::fish::Fish;
use crate::ordering::sort_and_dedup;
use crate::snapshot::{LocalSnapshot, StateWithProvenance};
use crate::snapshot_scheduler::{SnapshotScheduler, SnapshotTier};

/// A head copy waiting to become old enough for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot<S> {
    pub snapshot: LocalSnapshot<S>,
    pub tier: SnapshotTier,
    /// Timestamp of the event that completed the snapshot.
    pub timestamp: Timestamp,
}

/// What one [`MonotonicReducer::append_events`] call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended<S> {
    /// Candidates now eligible for storage, oldest first.
    pub snapshots: Vec<PendingSnapshot<S>>,
    /// Copy of the head, when emission was requested.
    pub emit: Option<StateWithProvenance<S>>,
}

pub struct MonotonicReducer<F: Fish> {
    fish: Arc<F>,
    scheduler: SnapshotScheduler,
    head: LocalSnapshot<F::State>,
    queue: VecDeque<PendingSnapshot<F::State>>,
}

impl<F: Fish> MonotonicReducer<F> {
    /// Reducer whose head is the fish's initial state.
    pub fn new(fish: Arc<F>, scheduler: SnapshotScheduler) -> Self {
        let head = LocalSnapshot::initial(fish.initial_state());
        Self::with_head(fish, scheduler, head)
    }

    pub fn with_head(fish: Arc<F>, scheduler: SnapshotScheduler, head: LocalSnapshot<F::State>) -> Self {
        Self {
            fish,
            scheduler,
            head,
            queue: VecDeque::new(),
        }
    }

    pub fn head(&self) -> &LocalSnapshot<F::State> {
        &self.head
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingSnapshot<F::State>> {
        self.queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Newest queued candidate strictly older than `key`.
    pub fn latest_pending_before(&self, key: &EventKey) -> Option<&LocalSnapshot<F::State>> {
        self.queue
            .iter()
            .rev()
            .map(|p| &p.snapshot)
            .find(|s| s.event_key < *key)
    }

    /// Fold `events` onto the head in key order.
    ///
    /// A batch delivered out of order or with duplicates is repaired first.
    pub fn append_events(&mut self, events: &[Event<F::Event>], should_emit: bool) -> Appended<F::State> {
        let mut events = events.to_vec();
        sort_and_dedup(&mut events, "append_events");

        let Some(latest) = events.last().map(|ev| ev.timestamp) else {
            return Appended {
                snapshots: Vec::new(),
                emit: should_emit.then(|| self.head.provenance()),
            };
        };

        let mut state = self.head.state.clone();
        let mut offsets = self.head.offsets.to_builder();
        let mut horizon = self.head.horizon.clone();
        let mut cycle = self.head.cycle;
        for ev in &events {
            state = self.fish.apply(state, ev);
            offsets.include(ev);
            if self.fish.is_semantic_snapshot(ev) {
                horizon = Some(ev.key());
                cycle = 0;
            } else {
                cycle += 1;
            }
            if let Some(tier) = self.scheduler.tier_for_cycle(cycle) {
                self.queue.push_back(PendingSnapshot {
                    snapshot: LocalSnapshot {
                        state: state.clone(),
                        offsets: offsets.snapshot(),
                        event_key: ev.key(),
                        horizon: horizon.clone(),
                        cycle,
                    },
                    tier,
                    timestamp: ev.timestamp,
                });
            }
        }

        self.head = LocalSnapshot {
            state,
            offsets: offsets.build(),
            event_key: events.last().map_or_else(EventKey::zero, Event::key),
            horizon,
            cycle,
        };

        let mut snapshots = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|p| self.scheduler.is_eligible_for_storage(p.timestamp, latest))
        {
            if let Some(due) = self.queue.pop_front() {
                snapshots.push(due);
            }
        }

        Appended {
            snapshots,
            emit: should_emit.then(|| self.head.provenance()),
        }
    }

    /// Replace the head after an upstream reset.
    pub fn set_state(&mut self, snapshot: LocalSnapshot<F::State>) {
        if snapshot.event_key > self.head.event_key {
            // jumped forward, every candidate is behind the new head
            self.queue.clear();
        } else {
            let before = self.queue.len();
            while self
                .queue
                .back()
                .is_some_and(|p| p.snapshot.event_key > snapshot.event_key)
            {
                self.queue.pop_back();
            }
            if self.queue.len() != before {
                debug!(
                    dropped = before - self.queue.len(),
                    reset_to = %snapshot.event_key,
                    "Dropped snapshot candidates after reset"
                );
            }
        }
        self.head = snapshot;
    }
}
