//! Bounded memory of known-good states, used as time-travel reset points.
//!
//! Bead: fp-state-cache

use std::collections::VecDeque;

use crate::event::EventKey;
use crate::snapshot::LocalSnapshot;

/// Snapshots ordered by event key; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct StateCache<S> {
    capacity: usize,
    states: VecDeque<LocalSnapshot<S>>,
}

impl<S> StateCache<S> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            states: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Keep `snapshot`, replacing any entry with the same event key.
    pub fn remember(&mut self, snapshot: LocalSnapshot<S>) {
        let at = self
            .states
            .partition_point(|s| s.event_key < snapshot.event_key);
        if self
            .states
            .get(at)
            .is_some_and(|s| s.event_key == snapshot.event_key)
        {
            self.states[at] = snapshot;
        } else {
            self.states.insert(at, snapshot);
        }
        while self.states.len() > self.capacity {
            self.states.pop_front();
        }
    }

    /// Newest entry strictly older than `key`.
    #[must_use]
    pub fn latest_before(&self, key: &EventKey) -> Option<&LocalSnapshot<S>> {
        self.states.iter().rev().find(|s| s.event_key < *key)
    }

    /// Forget every entry at or after `key`.
    pub fn invalidate_from(&mut self, key: &EventKey) {
        let keep = self.states.partition_point(|s| s.event_key < *key);
        self.states.truncate(keep);
    }
}
