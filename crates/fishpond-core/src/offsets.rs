//! Per-stream high-water marks.
//!
//! Bead: fp-offset-map
//!
//! An [`OffsetMap`] answers "which events are known": for every stream it holds
//! the highest offset seen. It is the smallest fingerprint of a state's inputs
//! and is what a resubscription or rehydration resumes from.
//!
//! [`OffsetMap`] is the immutable view handed out with states and snapshots;
//! [`OffsetMapBuilder`] is the mutable accumulator the engines update while
//! folding events. Updates are monotone: an entry never decreases.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{Event, StreamId};

/// Position of an event within its stream, starting at zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel returned by [`OffsetMap::lookup`] for a stream with no events.
pub const OFFSET_NONE: i64 = -1;

/// Immutable per-stream high-water-mark table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetMap {
    streams: BTreeMap<StreamId, Offset>,
}

impl OffsetMap {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn get(&self, stream: &StreamId) -> Option<Offset> {
        self.streams.get(stream).copied()
    }

    /// Highest offset for `stream`, or [`OFFSET_NONE`].
    #[must_use]
    pub fn lookup(&self, stream: &StreamId) -> i64 {
        self.get(stream).map_or(OFFSET_NONE, |o| o.0 as i64)
    }

    /// Whether the event at (`stream`, `offset`) is covered by this map.
    #[must_use]
    pub fn contains(&self, stream: &StreamId, offset: Offset) -> bool {
        self.get(stream).is_some_and(|known| offset <= known)
    }

    #[must_use]
    pub fn contains_event<E>(&self, event: &Event<E>) -> bool {
        self.contains(&event.stream, event.offset)
    }

    /// True if this map is `>=` `other` in every stream `other` knows.
    #[must_use]
    pub fn dominates(&self, other: &OffsetMap) -> bool {
        other
            .streams
            .iter()
            .all(|(stream, offset)| self.contains(stream, *offset))
    }

    /// Per-stream maximum of both maps.
    #[must_use]
    pub fn union(&self, other: &OffsetMap) -> OffsetMap {
        let mut builder = self.to_builder();
        builder.merge(other);
        builder.build()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamId, Offset)> {
        self.streams.iter().map(|(s, o)| (s, *o))
    }

    #[must_use]
    pub fn to_builder(&self) -> OffsetMapBuilder {
        OffsetMapBuilder {
            streams: self.streams.clone(),
        }
    }
}

impl PartialOrd for OffsetMap {
    /// The partial order induced by [`OffsetMap::dominates`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => None,
        }
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for OffsetMap {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut builder = OffsetMapBuilder::new();
        for (stream, offset) in iter {
            builder.update(StreamId::new(stream), Offset(offset));
        }
        builder.build()
    }
}

impl fmt::Display for OffsetMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (stream, offset)) in self.streams.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{stream}:{offset}")?;
        }
        f.write_str("}")
    }
}

/// Mutable accumulator for an [`OffsetMap`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetMapBuilder {
    streams: BTreeMap<StreamId, Offset>,
}

impl OffsetMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the entry for `stream` to at least `offset`.
    pub fn update(&mut self, stream: StreamId, offset: Offset) {
        self.streams
            .entry(stream)
            .and_modify(|known| *known = (*known).max(offset))
            .or_insert(offset);
    }

    /// Record that `event` has been seen.
    pub fn include<E>(&mut self, event: &Event<E>) {
        match self.streams.get_mut(&event.stream) {
            Some(known) => *known = (*known).max(event.offset),
            None => {
                self.streams.insert(event.stream.clone(), event.offset);
            }
        }
    }

    pub fn merge(&mut self, other: &OffsetMap) {
        for (stream, offset) in other.iter() {
            match self.streams.get_mut(stream) {
                Some(known) => *known = (*known).max(offset),
                None => {
                    self.streams.insert(stream.clone(), offset);
                }
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, stream: &StreamId) -> i64 {
        self.streams.get(stream).map_or(OFFSET_NONE, |o| o.0 as i64)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Snapshot the current contents without consuming the builder.
    #[must_use]
    pub fn snapshot(&self) -> OffsetMap {
        OffsetMap {
            streams: self.streams.clone(),
        }
    }

    #[must_use]
    pub fn build(self) -> OffsetMap {
        OffsetMap {
            streams: self.streams,
        }
    }
}
