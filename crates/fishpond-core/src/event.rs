//! Events and their canonical order.
//!
//! Bead: fp-event-key
//!
//! Every event carries a lamport clock and the stream it was written to. The
//! pair forms the [`EventKey`], which totally orders events independent of the
//! order in which replicas happened to gossip them to us:
//!
//! ```text
//!   (lamport 3, "b")  <  (lamport 4, "a")  <  (lamport 4, "b")
//!    ^ clock first      ^ stream id breaks ties
//! ```
//!
//! Identity is purely positional. Two events with the same key are the same
//! event, whatever their payloads say.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::offsets::Offset;

/// Identity of a single-writer event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical clock value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Lamport(pub u64);

impl fmt::Display for Lamport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock time in microseconds since the unix epoch.
///
/// Only used to decide whether a snapshot candidate is old enough to persist.
/// Never part of the event order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    #[must_use]
    pub fn now() -> Self {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self(micros)
    }

    #[must_use]
    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Total-order identifier of an event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventKey {
    pub lamport: Lamport,
    pub stream: StreamId,
}

impl EventKey {
    #[must_use]
    pub fn new(lamport: u64, stream: impl Into<String>) -> Self {
        Self {
            lamport: Lamport(lamport),
            stream: StreamId::new(stream),
        }
    }

    /// Smallest possible key; every event key is `>=` this.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lamport, self.stream)
    }
}

/// A persisted event as delivered by the event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<E> {
    pub lamport: Lamport,
    pub stream: StreamId,
    pub offset: Offset,
    pub timestamp: Timestamp,
    pub tags: Vec<String>,
    pub payload: E,
}

impl<E> Event<E> {
    #[must_use]
    pub fn new(lamport: u64, stream: impl Into<String>, offset: u64, payload: E) -> Self {
        Self {
            lamport: Lamport(lamport),
            stream: StreamId::new(stream),
            offset: Offset(offset),
            timestamp: Timestamp::default(),
            tags: Vec::new(),
            payload,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn key(&self) -> EventKey {
        EventKey {
            lamport: self.lamport,
            stream: self.stream.clone(),
        }
    }

    /// Compare this event's position against a key without allocating.
    #[must_use]
    pub fn cmp_key(&self, key: &EventKey) -> Ordering {
        self.lamport
            .cmp(&key.lamport)
            .then_with(|| self.stream.cmp(&key.stream))
    }
}

impl<E> PartialEq for Event<E> {
    fn eq(&self, other: &Self) -> bool {
        self.lamport == other.lamport && self.stream == other.stream
    }
}

impl<E> Eq for Event<E> {}

impl<E> PartialOrd for Event<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Event<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.stream.cmp(&other.stream))
    }
}
