//! fishpond-core: deterministic state reconstruction for local-first
//! event-sourced entities ("fish").
//!
//! Every node holds a partial, eventually consistent copy of a multi-writer
//! event log. A fish's state is the fold of its events in a global total
//! order; this crate recomputes that fold efficiently while events keep
//! arriving out of order.
//!
//! # Architecture
//!
//! ```text
//!   EventStore ──history──▶ FishEventStore ──state──▶ application
//!        │                  │  ordering (merge, dedup, horizon)
//!        │                  │  StatePointers ◀── SnapshotScheduler
//!        │                  └──▶ SnapshotPersister ──▶ SnapshotStore
//!        │
//!   MonotonicEndpoint ──msgs──▶ observe_monotonic ──states──▶ application
//!                               └─ MonotonicReducer + StateCache
//! ```
//!
//! # Modules
//!
//! - `event`, `offsets`: event keys, streams and offset maps
//! - `ordering`: sorted merge with duplicate elimination
//! - `snapshot_scheduler`: which cycles become snapshot candidates, at which tier
//! - `state_pointers`: cache of computed states over the event buffer
//! - `fish_event_store`: the replay engine with shattering and rehydration
//! - `monotonic`: reducer and pipeline for upstreams that signal time travel
//! - `event_store`, `snapshot_store`: collaborator traits with in-memory implementations
//! - `persistence`: background snapshot writes
//! - `config`, `logging`, `retry`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod event_store;
pub mod fish;
pub mod fish_event_store;
pub mod logging;
pub mod monotonic;
pub mod offsets;
pub mod ordering;
pub mod persistence;
pub mod retry;
pub mod snapshot;
pub mod snapshot_scheduler;
pub mod snapshot_store;
pub mod state_pointers;

pub use config::PondConfig;
pub use error::{Error, Result};
pub use event::{Event, EventKey, Lamport, StreamId, Timestamp};
pub use event_store::{EventStore, InMemoryEventStore, SortOrder};
pub use fish::{Fish, FishCapabilities, SubscriptionSet};
pub use fish_event_store::{FishEventStore, StoreMode};
pub use offsets::{Offset, OffsetMap, OffsetMapBuilder};
pub use snapshot::{FishId, LocalSnapshot, SerializedSnapshot, StateWithProvenance};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore};

/// Version of the fishpond-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
