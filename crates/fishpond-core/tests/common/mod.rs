//! Shared fixtures for fishpond-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use fishpond_core::{
    Event, Fish, FishCapabilities, FishEventStore, FishId, InMemoryEventStore,
    InMemorySnapshotStore, OffsetMap, PondConfig, SubscriptionSet, Timestamp,
};

// ---------------------------------------------------------------------------
// Trail: a fish whose state is the list of payloads in fold order
// ---------------------------------------------------------------------------

/// Payload tag that turns an event into a semantic snapshot.
pub const ABSOLUTE: &str = "absolute";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail(pub Vec<String>);

#[derive(Debug, Clone, Copy, Default)]
pub struct TrailFish {
    pub local_snapshots: bool,
    pub semantic_snapshots: bool,
}

impl TrailFish {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn snapshotting() -> Self {
        Self {
            local_snapshots: true,
            semantic_snapshots: false,
        }
    }

    pub fn semantic() -> Self {
        Self {
            local_snapshots: true,
            semantic_snapshots: true,
        }
    }
}

impl Fish for TrailFish {
    type State = Trail;
    type Event = String;

    fn fish_id(&self) -> FishId {
        FishId::new("trail", "fixture")
    }

    fn subscriptions(&self) -> SubscriptionSet {
        SubscriptionSet::all()
    }

    fn initial_state(&self) -> Trail {
        Trail(Vec::new())
    }

    fn on_event(&self, mut state: Trail, event: &Event<String>) -> Trail {
        state.0.push(event.payload.clone());
        state
    }

    fn is_reset(&self, event: &Event<String>) -> bool {
        self.is_semantic_snapshot(event)
    }

    fn is_semantic_snapshot(&self, event: &Event<String>) -> bool {
        self.semantic_snapshots && event.tags.iter().any(|t| t == ABSOLUTE)
    }

    fn capabilities(&self) -> FishCapabilities {
        FishCapabilities {
            semantic_snapshots: self.semantic_snapshots,
            local_snapshot_version: self.local_snapshots.then_some(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Event constructors
// ---------------------------------------------------------------------------

/// Event whose payload is its own key, e.g. `"3/a"`.
pub fn ev(lamport: u64, stream: &str, offset: u64) -> Event<String> {
    Event::new(lamport, stream, offset, format!("{lamport}/{stream}"))
}

/// Same as [`ev`], stamped `secs` seconds after the epoch.
pub fn ev_at(lamport: u64, stream: &str, offset: u64, secs: u64) -> Event<String> {
    ev(lamport, stream, offset).with_timestamp(Timestamp::from_secs(secs))
}

/// Semantic snapshot event.
pub fn absolute(lamport: u64, stream: &str, offset: u64) -> Event<String> {
    ev(lamport, stream, offset).with_tags([ABSOLUTE])
}

/// Payloads in fold order, as a fish would see them.
pub fn payloads(events: &[Event<String>]) -> Trail {
    let mut sorted = events.to_vec();
    sorted.sort();
    sorted.dedup();
    Trail(sorted.into_iter().map(|e| e.payload).collect())
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

pub type Engine = FishEventStore<TrailFish, InMemoryEventStore<String>, InMemorySnapshotStore>;

/// Config that snapshots every `interval` events and stores immediately.
pub fn config(interval: u64) -> PondConfig {
    let mut config = PondConfig::default();
    config.snapshots.min_events_for_snapshot = interval;
    config.snapshots.storage_min_age_secs = 0;
    config.hydration.retry_initial_delay_ms = 1;
    config.hydration.retry_max_delay_ms = 2;
    config
}

pub struct Harness {
    pub events: Arc<InMemoryEventStore<String>>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub config: PondConfig,
}

impl Harness {
    pub fn new(interval: u64) -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new("local")),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            config: config(interval),
        }
    }

    /// Write events to the store as if replicated from their origin.
    pub fn replicate(&self, events: &[Event<String>]) {
        for event in events {
            self.events.insert(event.clone()).unwrap();
        }
    }

    /// Hydrate a fresh engine up to everything the store holds.
    pub async fn engine(&self, fish: TrailFish) -> Engine {
        let present = self.present().await;
        FishEventStore::initialize(
            fish,
            Arc::clone(&self.events),
            Arc::clone(&self.snapshots),
            &self.config,
            present,
        )
        .await
        .unwrap()
    }

    pub async fn present(&self) -> OffsetMap {
        use fishpond_core::EventStore;
        self.events.present().await.unwrap()
    }
}
