//! In-memory cache of computed states, keyed by event-buffer position.
//!
//! Bead: fp-state-pointers
//!
//! ```text
//!   buffer   e0 e1 e2 e3 e4 e5 e6 e7 e8 e9
//!   pointers        ^2          ^6    ^8 ^9
//!                   snapshot    rewind points
//! ```
//!
//! A pointer at `i` holds the state after folding `buffer[..=i]` onto the
//! engine's base. Recomputing after new events only folds from the latest
//! pointer; after time travel at position `w` every pointer above `w` is
//! dropped and folding resumes from the newest survivor.
//!
//! Two kinds of pointer exist:
//! - **snapshot** pointers sit at scheduler-selected cycles and are candidates
//!   for persistence as local snapshots;
//! - **rewind** pointers sit at exponentially growing distances from the end
//!   of the buffer and only bound the cost of recomputing after time travel.
//!
//! Indices are rewritten in place when the buffer's front is dropped, so a
//! pointer never refers to an event that is no longer buffered.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{EventKey, Timestamp};
use crate::snapshot::StateWithProvenance;
use crate::snapshot_scheduler::{SnapshotScheduler, SnapshotTier};

/// Why a position is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerTag {
    Snapshot(SnapshotTier),
    Rewind,
}

impl fmt::Display for PointerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot(tier) => tier.fmt(f),
            Self::Rewind => f.write_str("rewind"),
        }
    }
}

/// A buffer position that should have its state cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedIndex {
    pub i: usize,
    pub tag: PointerTag,
    pub persist_as_local_snapshot: bool,
}

/// A cached state at buffer position `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePointer<S> {
    pub i: usize,
    pub tag: PointerTag,
    pub persist_as_local_snapshot: bool,
    pub state: StateWithProvenance<S>,
    pub final_included_event: EventKey,
    /// Timestamp of the final included event.
    pub timestamp: Timestamp,
    pub cycle: u64,
}

impl<S> StatePointer<S> {
    #[must_use]
    pub fn new(
        index: TaggedIndex,
        state: StateWithProvenance<S>,
        final_included_event: EventKey,
        timestamp: Timestamp,
        cycle: u64,
    ) -> Self {
        Self {
            i: index.i,
            tag: index.tag,
            persist_as_local_snapshot: index.persist_as_local_snapshot,
            state,
            final_included_event,
            timestamp,
            cycle,
        }
    }
}

/// Ordered set of [`StatePointer`]s over one event buffer.
#[derive(Debug, Clone)]
pub struct StatePointers<S> {
    pointers: Vec<StatePointer<S>>,
    scheduler: SnapshotScheduler,
    persist_snapshots: bool,
}

impl<S> StatePointers<S> {
    /// `persist_snapshots` is false for fish without local snapshots; their
    /// scheduled positions are cached as rewind points instead.
    #[must_use]
    pub fn new(scheduler: SnapshotScheduler, persist_snapshots: bool) -> Self {
        Self {
            pointers: Vec::new(),
            scheduler,
            persist_snapshots,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &SnapshotScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatePointer<S>> {
        self.pointers.iter()
    }

    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.pointers.iter().map(|p| p.i).collect()
    }

    /// Highest-index cached pointer.
    #[must_use]
    pub fn latest_stored(&self) -> Option<&StatePointer<S>> {
        self.pointers.last()
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<&StatePointer<S>> {
        self.pointers
            .binary_search_by_key(&i, |p| p.i)
            .ok()
            .map(|at| &self.pointers[at])
    }

    /// Positions to compute this round, ascending.
    ///
    /// Only positions after the latest cached pointer are considered. The
    /// event at buffer index `i` completes cycle `first_cycle + i`.
    #[must_use]
    pub fn get_states_to_cache(&self, first_cycle: u64, buffer_len: usize) -> Vec<TaggedIndex> {
        let start = self.latest_stored().map_or(0, |p| p.i + 1);
        if start >= buffer_len {
            return Vec::new();
        }

        let mut wanted: BTreeMap<usize, TaggedIndex> = BTreeMap::new();

        let mut distance = 1_usize;
        while distance <= buffer_len && buffer_len - distance >= start {
            let i = buffer_len - distance;
            wanted.insert(
                i,
                TaggedIndex {
                    i,
                    tag: PointerTag::Rewind,
                    persist_as_local_snapshot: false,
                },
            );
            distance = distance.saturating_mul(2);
        }

        for (offset, tier) in self
            .scheduler
            .snapshot_levels(first_cycle + start as u64, buffer_len - start)
        {
            let i = start + offset;
            wanted.insert(
                i,
                TaggedIndex {
                    i,
                    tag: PointerTag::Snapshot(tier),
                    persist_as_local_snapshot: self.persist_snapshots,
                },
            );
        }

        wanted.into_values().collect()
    }

    /// Append freshly computed pointers, then thin rewind points.
    ///
    /// New pointers must be strictly ascending and lie after every cached one.
    pub fn add_populated_pointers(
        &mut self,
        populated: Vec<StatePointer<S>>,
        buffer_len: usize,
    ) -> Result<()> {
        let mut floor = self.latest_stored().map(|p| p.i);
        for pointer in &populated {
            if floor.is_some_and(|f| pointer.i <= f) || pointer.i >= buffer_len {
                return Err(Error::Invariant(format!(
                    "state pointer {} out of order (after {:?}, buffer length {buffer_len})",
                    pointer.i, floor
                )));
            }
            floor = Some(pointer.i);
        }
        self.pointers.extend(populated);
        self.thin(buffer_len);
        Ok(())
    }

    /// Keep at most one rewind pointer per power-of-two distance band from
    /// the end of the buffer. Snapshot pointers are never thinned.
    fn thin(&mut self, buffer_len: usize) {
        let before = self.pointers.len();
        let mut seen_bands: u128 = 0;
        let mut keep = vec![true; before];
        for (slot, pointer) in self.pointers.iter().enumerate().rev() {
            if pointer.persist_as_local_snapshot {
                continue;
            }
            let band = (buffer_len - pointer.i).ilog2();
            let bit = 1_u128 << band;
            if seen_bands & bit != 0 {
                keep[slot] = false;
            }
            seen_bands |= bit;
        }
        let mut slots = keep.into_iter();
        self.pointers.retain(|_| slots.next().unwrap_or(true));
        if self.pointers.len() != before {
            debug!(
                dropped = before - self.pointers.len(),
                kept = self.pointers.len(),
                "Thinned rewind pointers"
            );
        }
    }

    /// Discard every pointer with index above `i`; `None` discards all.
    pub fn invalidate_down_to(&mut self, i: Option<usize>) {
        match i {
            Some(i) => self.pointers.retain(|p| p.i <= i),
            None => self.pointers.clear(),
        }
    }

    /// The front `k` events were dropped from the buffer.
    pub fn shift_back(&mut self, k: usize) {
        self.pointers.retain(|p| p.i >= k);
        for pointer in &mut self.pointers {
            pointer.i -= k;
        }
    }

    pub fn clear(&mut self) {
        self.pointers.clear();
    }

    /// Snapshot pointers whose final event is old enough relative to
    /// `latest` to be written to storage, ascending.
    #[must_use]
    pub fn get_snapshots_to_persist(&self, latest: Timestamp) -> Vec<&StatePointer<S>> {
        self.pointers
            .iter()
            .filter(|p| {
                p.persist_as_local_snapshot
                    && self.scheduler.is_eligible_for_storage(p.timestamp, latest)
            })
            .collect()
    }
}
