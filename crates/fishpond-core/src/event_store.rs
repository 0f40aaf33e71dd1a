//! Event store collaborator.
//!
//! Bead: fp-event-store
//!
//! The replay engine only reads history through [`EventStore`]: a bounded
//! query `(from, to]` over offset maps, filtered by subscription and an
//! optional horizon, delivered as a channel of chunks so large histories can
//! be folded incrementally.
//!
//! [`InMemoryEventStore`] implements the contract for tests and embedding. It
//! assigns offsets and lamport clocks on [`EventStore::persist_events`] and
//! accepts events written elsewhere through [`InMemoryEventStore::insert`].

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::EventStoreError;
use crate::event::{Event, EventKey, Lamport, StreamId, Timestamp};
use crate::fish::SubscriptionSet;
use crate::offsets::{Offset, OffsetMap, OffsetMapBuilder};

/// Delivery order of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending event key.
    Ascending,
    /// Descending event key.
    Descending,
}

/// Chunks of a history query, in the requested order.
pub type EventChunks<E> = mpsc::Receiver<Vec<Event<E>>>;

/// An event about to be written.
#[derive(Debug, Clone)]
pub struct UnstoredEvent<E> {
    pub tags: Vec<String>,
    pub payload: E,
}

impl<E> UnstoredEvent<E> {
    pub fn new<I, T>(tags: I, payload: E) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            payload,
        }
    }
}

/// Read and write access to the replicated event log.
pub trait EventStore<E>: Send + Sync {
    /// Events with offsets in `(from_exclusive, to_inclusive]` per stream
    /// that match `subscriptions` and lie strictly above `horizon`.
    /// Streams absent from `to_inclusive` contribute nothing.
    fn persisted_events(
        &self,
        from_exclusive: &OffsetMap,
        to_inclusive: &OffsetMap,
        subscriptions: &SubscriptionSet,
        order: SortOrder,
        horizon: Option<&EventKey>,
    ) -> impl Future<Output = Result<EventChunks<E>, EventStoreError>> + Send;

    /// Write events from the local stream; returns them with assigned
    /// offsets, clocks and timestamps.
    fn persist_events(
        &self,
        events: Vec<UnstoredEvent<E>>,
    ) -> impl Future<Output = Result<Vec<Event<E>>, EventStoreError>> + Send;

    /// Offsets of everything the store currently holds.
    fn present(&self) -> impl Future<Output = Result<OffsetMap, EventStoreError>> + Send;
}

// =============================================================================
// In-memory implementation
// =============================================================================

const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Debug)]
struct Log<E> {
    /// Sorted by event key, no duplicates.
    events: Vec<Event<E>>,
    present: OffsetMapBuilder,
    lamport: Lamport,
}

/// Event store kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryEventStore<E> {
    source: StreamId,
    chunk_size: usize,
    log: Mutex<Log<E>>,
}

impl<E: Clone + Send + Sync> InMemoryEventStore<E> {
    /// Store whose local writes go to stream `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: StreamId::new(source),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log: Mutex::new(Log {
                events: Vec::new(),
                present: OffsetMapBuilder::new(),
                lamport: Lamport(0),
            }),
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Log<E>>, EventStoreError> {
        self.log
            .lock()
            .map_err(|e| EventStoreError::Poisoned(e.to_string()))
    }

    /// Accept an event replicated from another node. Returns false if an
    /// event with the same key is already stored.
    pub fn insert(&self, event: Event<E>) -> Result<bool, EventStoreError> {
        let mut log = self.lock()?;
        match log.events.binary_search(&event) {
            Ok(_) => Ok(false),
            Err(at) => {
                log.lamport = log.lamport.max(event.lamport);
                log.present.include(&event);
                log.events.insert(at, event);
                Ok(true)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |log| log.events.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + Sync> EventStore<E> for InMemoryEventStore<E> {
    async fn persisted_events(
        &self,
        from_exclusive: &OffsetMap,
        to_inclusive: &OffsetMap,
        subscriptions: &SubscriptionSet,
        order: SortOrder,
        horizon: Option<&EventKey>,
    ) -> Result<EventChunks<E>, EventStoreError> {
        let mut selected: Vec<Event<E>> = {
            let log = self.lock()?;
            log.events
                .iter()
                .filter(|ev| {
                    !from_exclusive.contains_event(ev)
                        && to_inclusive.contains_event(ev)
                        && subscriptions.matches(&ev.tags)
                        && horizon.is_none_or(|h| ev.cmp_key(h) == Ordering::Greater)
                })
                .cloned()
                .collect()
        };
        if order == SortOrder::Descending {
            selected.reverse();
        }

        let chunk_count = selected.len().div_ceil(self.chunk_size);
        debug!(
            events = selected.len(),
            chunks = chunk_count,
            ?order,
            "Serving persisted events"
        );
        let (tx, rx) = mpsc::channel(chunk_count.max(1));
        let mut remaining = selected.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<Event<E>> = remaining.by_ref().take(self.chunk_size).collect();
            tx.try_send(chunk)
                .map_err(|_| EventStoreError::StreamClosed)?;
        }
        Ok(rx)
    }

    async fn persist_events(
        &self,
        events: Vec<UnstoredEvent<E>>,
    ) -> Result<Vec<Event<E>>, EventStoreError> {
        let mut log = self.lock()?;
        let timestamp = Timestamp::now();
        let mut stored = Vec::with_capacity(events.len());
        for unstored in events {
            let lamport = Lamport(log.lamport.0 + 1);
            let offset = Offset((log.present.lookup(&self.source) + 1) as u64);
            let event = Event {
                lamport,
                stream: self.source.clone(),
                offset,
                timestamp,
                tags: unstored.tags,
                payload: unstored.payload,
            };
            log.lamport = lamport;
            log.present.include(&event);
            // fresh lamport is the maximum, so this is an append
            log.events.push(event.clone());
            stored.push(event);
        }
        Ok(stored)
    }

    async fn present(&self) -> Result<OffsetMap, EventStoreError> {
        Ok(self.lock()?.present.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: EventChunks<u32>) -> Vec<Vec<String>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.iter().map(|e| e.key().to_string()).collect());
        }
        chunks
    }

    fn seeded() -> InMemoryEventStore<u32> {
        let store = InMemoryEventStore::new("local").with_chunk_size(2);
        for (lamport, stream, offset) in [(1, "a", 0), (2, "b", 0), (3, "a", 1), (4, "b", 1), (5, "a", 2)] {
            store
                .insert(Event::new(lamport, stream, offset, lamport as u32).with_tags(["t"]))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn range_query_is_half_open_per_stream() {
        let store = seeded();
        let from: OffsetMap = [("a", 0_u64)].into_iter().collect();
        let to: OffsetMap = [("a", 1_u64), ("b", 1)].into_iter().collect();
        let rx = store
            .persisted_events(&from, &to, &SubscriptionSet::all(), SortOrder::Ascending, None)
            .await
            .unwrap();
        assert_eq!(drain(rx).await, vec![vec!["2/b", "3/a"], vec!["4/b"]]);
    }

    #[tokio::test]
    async fn descending_order_and_horizon() {
        let store = seeded();
        let to = store.present().await.unwrap();
        let rx = store
            .persisted_events(
                &OffsetMap::empty(),
                &to,
                &SubscriptionSet::all(),
                SortOrder::Descending,
                Some(&EventKey::new(2, "b")),
            )
            .await
            .unwrap();
        assert_eq!(drain(rx).await, vec![vec!["5/a", "4/b"], vec!["3/a"]]);
    }

    #[tokio::test]
    async fn subscription_filters_by_tags() {
        let store = seeded();
        store
            .insert(Event::new(6, "c", 0, 6).with_tags(["other"]))
            .unwrap();
        let to = store.present().await.unwrap();
        let rx = store
            .persisted_events(
                &OffsetMap::empty(),
                &to,
                &SubscriptionSet::tags(["other"]),
                SortOrder::Ascending,
                None,
            )
            .await
            .unwrap();
        assert_eq!(drain(rx).await, vec![vec!["6/c"]]);
    }

    #[tokio::test]
    async fn persist_assigns_clock_and_offsets() {
        let store = seeded();
        let stored = store
            .persist_events(vec![
                UnstoredEvent::new(["t"], 10),
                UnstoredEvent::new(["t"], 11),
            ])
            .await
            .unwrap();
        assert_eq!(stored[0].key(), EventKey::new(6, "local"));
        assert_eq!(stored[1].key(), EventKey::new(7, "local"));
        assert_eq!(stored[1].offset, Offset(1));
        let present = store.present().await.unwrap();
        assert_eq!(present.lookup(&"local".into()), 1);
        assert_eq!(store.len(), 7);
    }

    #[tokio::test]
    async fn insert_ignores_duplicates() {
        let store = seeded();
        assert!(!store.insert(Event::new(3, "a", 1, 99)).unwrap());
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn empty_query_closes_channel() {
        let store: InMemoryEventStore<u32> = InMemoryEventStore::new("local");
        let rx = store
            .persisted_events(
                &OffsetMap::empty(),
                &OffsetMap::empty(),
                &SubscriptionSet::all(),
                SortOrder::Ascending,
                None,
            )
            .await
            .unwrap();
        assert!(drain(rx).await.is_empty());
    }
}
