//! Snapshot value types shared by both engines.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::EventKey;
use crate::offsets::OffsetMap;

/// Identity of a fish instance: its entity type plus instance name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FishId {
    pub entity_type: String,
    pub name: String,
}

impl FishId {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.name)
    }
}

/// A computed state together with the offsets of every event folded into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWithProvenance<S> {
    pub state: S,
    pub offsets: OffsetMap,
}

/// Cached checkpoint: the state after folding everything up to `event_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshot<S> {
    pub state: S,
    pub offsets: OffsetMap,
    /// Key of the last event folded into `state`.
    pub event_key: EventKey,
    /// Key of the semantic snapshot this state builds on, if any.
    pub horizon: Option<EventKey>,
    /// Events folded since the horizon (or genesis).
    pub cycle: u64,
}

impl<S: Clone> LocalSnapshot<S> {
    #[must_use]
    pub fn provenance(&self) -> StateWithProvenance<S> {
        StateWithProvenance {
            state: self.state.clone(),
            offsets: self.offsets.clone(),
        }
    }
}

impl<S> LocalSnapshot<S> {
    /// Genesis: the initial state with nothing folded.
    #[must_use]
    pub fn initial(state: S) -> Self {
        Self {
            state,
            offsets: OffsetMap::empty(),
            event_key: EventKey::zero(),
            horizon: None,
            cycle: 0,
        }
    }

    #[must_use]
    pub fn to_serialized(&self, version: u32, state: serde_json::Value) -> SerializedSnapshot {
        SerializedSnapshot {
            event_key: self.event_key.clone(),
            offsets: self.offsets.clone(),
            horizon: self.horizon.clone(),
            cycle: self.cycle,
            version,
            state,
        }
    }
}

/// A local snapshot in the form the snapshot store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedSnapshot {
    pub event_key: EventKey,
    pub offsets: OffsetMap,
    pub horizon: Option<EventKey>,
    pub cycle: u64,
    /// Format version of `state`; snapshots of another version are ignored.
    pub version: u32,
    pub state: serde_json::Value,
}

impl SerializedSnapshot {
    #[must_use]
    pub fn into_local<S>(self, state: S) -> LocalSnapshot<S> {
        LocalSnapshot {
            state,
            offsets: self.offsets,
            event_key: self.event_key,
            horizon: self.horizon,
            cycle: self.cycle,
        }
    }
}
