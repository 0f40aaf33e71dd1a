//! Snapshot-scheduled replay engine for one fish.
//!
//! Bead: fp-replay
//!
//! ```text
//!                    ┌──────────── FishEventStore ─────────────┐
//!   process_events ─▶│ sort/dedup ─▶ horizon filter ─▶ merge    │
//!                    │                   │            │         │
//!                    │          semantic snapshot   time travel │
//!                    │            (new base)     (drop pointers)│
//!                    │                                          │
//!   current_state ──▶│ base ─▶ fold from latest pointer ─▶ state│──▶ S
//!                    │            │                             │
//!                    │     due snapshot pointers ─▶ becomeLocal │
//!                    └────────────│─────────────────────────────┘
//!                                 ▼
//!                         SnapshotPersister ─▶ SnapshotStore
//! ```
//!
//! The base of the fold is, in order of preference, the latest semantic
//! snapshot event, the latest local snapshot, or the fish's initial state.
//! The buffer holds every relevant event after the base, sorted by event key.
//!
//! # Shattering
//!
//! A local snapshot summarises events that are no longer buffered. When an
//! event older than the local snapshot arrives, the snapshot cannot absorb it.
//! The engine then records a [`ShatterRequest`], drops its buffers and only
//! accumulates the offsets it has been shown. The next [`current_state`]
//! invalidates persisted snapshots from the earliest offending event on and
//! rehydrates up to those offsets.
//!
//! [`current_state`]: FishEventStore::current_state

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::PondConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventKey};
use crate::event_store::{EventStore, SortOrder};
use crate::fish::{Fish, FishCapabilities, SubscriptionSet};
use crate::offsets::{OffsetMap, OffsetMapBuilder};
use crate::ordering::{add_and_invalidate, order_errors, retain_above_horizon, sort_and_dedup};
use crate::persistence::SnapshotPersister;
use crate::retry::{self, RetryPolicy};
use crate::snapshot::{FishId, LocalSnapshot, SerializedSnapshot, StateWithProvenance};
use crate::snapshot_store::SnapshotStore;
use crate::state_pointers::{PointerTag, StatePointer, StatePointers, TaggedIndex};

/// Lifecycle of a [`FishEventStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Uninitialized,
    Hydrating,
    Steady,
    /// A shatter is pending; the next state request rehydrates.
    Shattering,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Hydrating => "hydrating",
            Self::Steady => "steady",
            Self::Shattering => "shattering",
        };
        f.write_str(name)
    }
}

/// Pending discard of the local snapshot base.
#[derive(Debug, Clone)]
pub struct ShatterRequest<S> {
    /// Earliest event seen that predates the local snapshot.
    pub earliest_known_shattering_event: EventKey,
    /// Everything the engine has been shown so far; rehydration replays up to here.
    pub rehydrate_up_to: OffsetMapBuilder,
    pub snapshot_to_shatter: LocalSnapshot<S>,
    /// Base epoch at the time the request was made.
    pub base_epoch: u64,
}

/// Replay engine for a single fish instance.
pub struct FishEventStore<F: Fish, ES, SS> {
    fish: F,
    fish_id: FishId,
    subscriptions: SubscriptionSet,
    capabilities: FishCapabilities,

    event_store: Arc<ES>,
    snapshot_store: Arc<SS>,
    persister: Option<SnapshotPersister>,
    persist_queue_capacity: usize,
    retrieve_policy: RetryPolicy,

    mode: StoreMode,
    /// Sorted by event key, strictly above the base.
    events: Vec<Event<F::Event>>,
    pointers: StatePointers<F::State>,
    semantic: Option<Event<F::Event>>,
    local: Option<LocalSnapshot<F::State>>,
    /// Cycle of the base; buffer index `i` completes cycle `base_cycle + i + 1`.
    base_cycle: u64,
    /// Bumped whenever the base changes.
    base_epoch: u64,
    recompute_local_snapshots: bool,
    shatter: Option<ShatterRequest<F::State>>,
    poisoned: Option<String>,
}

impl<F, ES, SS> FishEventStore<F, ES, SS>
where
    F: Fish,
    ES: EventStore<F::Event>,
    SS: SnapshotStore + 'static,
{
    /// Create an engine. Call [`init`](Self::init) before anything else.
    pub fn new(fish: F, event_store: Arc<ES>, snapshot_store: Arc<SS>, config: &PondConfig) -> Self {
        let capabilities = fish.capabilities();
        let scheduler = config.snapshots.scheduler();
        Self {
            fish_id: fish.fish_id(),
            subscriptions: fish.subscriptions(),
            capabilities,
            fish,
            event_store,
            snapshot_store,
            persister: None,
            persist_queue_capacity: config.snapshots.persist_queue_capacity,
            retrieve_policy: config.hydration.retry_policy(),
            mode: StoreMode::Uninitialized,
            events: Vec::new(),
            pointers: StatePointers::new(scheduler, capabilities.local_snapshots()),
            semantic: None,
            local: None,
            base_cycle: 0,
            base_epoch: 0,
            recompute_local_snapshots: false,
            shatter: None,
            poisoned: None,
        }
    }

    /// Create and hydrate an engine up to `present`.
    pub async fn initialize(
        fish: F,
        event_store: Arc<ES>,
        snapshot_store: Arc<SS>,
        config: &PondConfig,
        present: OffsetMap,
    ) -> Result<Self> {
        let mut store = Self::new(fish, event_store, snapshot_store, config);
        store.init(present).await?;
        Ok(store)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn fish(&self) -> &F {
        &self.fish
    }

    pub fn fish_id(&self) -> &FishId {
        &self.fish_id
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Buffered events after the base, in event order.
    pub fn current_events(&self) -> &[Event<F::Event>] {
        &self.events
    }

    pub fn local_snapshot(&self) -> Option<&LocalSnapshot<F::State>> {
        self.local.as_ref()
    }

    pub fn semantic_snapshot(&self) -> Option<&Event<F::Event>> {
        self.semantic.as_ref()
    }

    pub fn pending_shatter(&self) -> Option<&ShatterRequest<F::State>> {
        self.shatter.as_ref()
    }

    pub fn state_pointers(&self) -> &StatePointers<F::State> {
        &self.pointers
    }

    /// Key of the latest semantic snapshot the current state builds on.
    pub fn horizon(&self) -> Option<EventKey> {
        match (&self.semantic, &self.local) {
            (Some(ss), _) => Some(ss.key()),
            (None, Some(local)) => local.horizon.clone(),
            (None, None) => None,
        }
    }

    /// Offsets of every event this engine has been shown.
    pub fn known_offsets(&self) -> OffsetMap {
        if let Some(shatter) = &self.shatter {
            return shatter.rehydrate_up_to.snapshot();
        }
        let mut offsets = match (&self.semantic, &self.local) {
            (Some(ss), _) => {
                let mut b = OffsetMapBuilder::new();
                b.include(ss);
                b
            }
            (None, Some(local)) => local.offsets.to_builder(),
            (None, None) => OffsetMapBuilder::new(),
        };
        for ev in &self.events {
            offsets.include(ev);
        }
        offsets.build()
    }

    /// Order violations in the buffer plus pointers past its end. Empty when
    /// healthy; meant for tests and diagnostics.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = order_errors(&self.events);
        for pointer in self.pointers.iter() {
            if pointer.i >= self.events.len() {
                errors.push(format!(
                    "pointer {} ({}) beyond buffer of {}",
                    pointer.i,
                    pointer.tag,
                    self.events.len()
                ));
            }
        }
        errors
    }

    /// Wait until every queued snapshot write and invalidation has landed.
    pub async fn flush_snapshots(&self) -> bool {
        match &self.persister {
            Some(persister) => persister.flush().await,
            None => true,
        }
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    /// Drop everything and rehydrate from the snapshot store and events up
    /// to `present`.
    pub async fn init(&mut self, present: OffsetMap) -> Result<()> {
        self.ensure_usable()?;
        self.reset();
        self.mode = StoreMode::Hydrating;

        let base = self.latest_local_snapshot().await;
        if let Some(local) = &base {
            self.base_cycle = local.cycle;
        }
        self.local = base;
        self.log_hydration_plan(&present);

        if self.capabilities.semantic_snapshots {
            let events = self.events_after_latest_semantic_snapshot(&present).await?;
            self.process_events(events)?;
        } else {
            self.hydrate_forward(&present).await?;
        }

        if self.shatter.is_none() {
            self.mode = StoreMode::Steady;
        }
        debug!(
            fish = %self.fish_id,
            mode = %self.mode,
            buffered = self.events.len(),
            "Hydration finished"
        );
        Ok(())
    }

    fn reset(&mut self) {
        self.events.clear();
        self.pointers.clear();
        self.semantic = None;
        self.local = None;
        self.base_cycle = 0;
        self.base_epoch += 1;
        self.recompute_local_snapshots = false;
        self.shatter = None;
    }

    fn log_hydration_plan(&self, present: &OffsetMap) {
        let base_offsets = self.local.as_ref().map(|l| &l.offsets);
        let mut new_streams = 0_usize;
        let mut missing_events = 0_i64;
        for (stream, to) in present.iter() {
            let from = base_offsets.map_or(-1, |o| o.lookup(stream));
            if from < 0 {
                new_streams += 1;
            }
            missing_events += (to.0 as i64 - from).max(0);
        }
        debug!(
            fish = %self.fish_id,
            base = ?self.local.as_ref().map(|l| l.event_key.to_string()),
            horizon = ?self.horizon().map(|h| h.to_string()),
            new_streams,
            missing_events,
            "Hydrating"
        );
    }

    async fn latest_local_snapshot(&self) -> Option<LocalSnapshot<F::State>> {
        let version = self.capabilities.local_snapshot_version?;
        let store = &self.snapshot_store;
        let fish_id = &self.fish_id;
        let retrieved = retry::with_retry(&self.retrieve_policy, || async move {
            retry::lift(store.retrieve_snapshot(fish_id, version).await)
        })
        .await;

        match retrieved {
            Ok(Some(mut serialized)) => {
                let blob = std::mem::take(&mut serialized.state);
                match self.fish.deserialize_state(blob) {
                    Ok(state) => {
                        debug!(
                            fish = %self.fish_id,
                            event_key = %serialized.event_key,
                            cycle = serialized.cycle,
                            "Found local snapshot"
                        );
                        Some(serialized.into_local(state))
                    }
                    Err(e) => {
                        error!(
                            fish = %self.fish_id,
                            error = %e,
                            "Failed to deserialize local snapshot; hydrating without it"
                        );
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    fish = %self.fish_id,
                    error = %e,
                    "Local snapshot retrieval failed; hydrating without it"
                );
                None
            }
        }
    }

    /// Fetch newest-first until the first semantic snapshot, return ascending.
    async fn events_after_latest_semantic_snapshot(
        &self,
        present: &OffsetMap,
    ) -> Result<Vec<Event<F::Event>>> {
        let from = self
            .local
            .as_ref()
            .map(|l| l.offsets.clone())
            .unwrap_or_default();
        let horizon = self.local.as_ref().and_then(|l| l.horizon.clone());

        let mut chunks = self
            .event_store
            .persisted_events(
                &from,
                present,
                &self.subscriptions,
                SortOrder::Descending,
                horizon.as_ref(),
            )
            .await?;

        let mut collected = Vec::new();
        'fetch: while let Some(chunk) = chunks.recv().await {
            for ev in chunk {
                if horizon
                    .as_ref()
                    .is_some_and(|h| ev.cmp_key(h) != Ordering::Greater)
                {
                    break 'fetch;
                }
                let is_semantic = self.fish.is_semantic_snapshot(&ev);
                collected.push(ev);
                if is_semantic {
                    break 'fetch;
                }
            }
        }
        collected.reverse();
        Ok(collected)
    }

    /// Fold forward chunks, snapshotting whenever the buffer grows large.
    async fn hydrate_forward(&mut self, present: &OffsetMap) -> Result<()> {
        let from = self
            .local
            .as_ref()
            .map(|l| l.offsets.clone())
            .unwrap_or_default();
        let mut chunks = self
            .event_store
            .persisted_events(
                &from,
                present,
                &self.subscriptions,
                SortOrder::Ascending,
                None,
            )
            .await?;

        let threshold = self.pointers.scheduler().interval() as usize;
        let mut state_pending = false;
        while let Some(chunk) = chunks.recv().await {
            state_pending |= self.process_events(chunk)?;
            if state_pending
                && self.capabilities.local_snapshots()
                && self.shatter.is_none()
                && self.events.len() > threshold
            {
                self.compute_state().await?;
                state_pending = false;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Integrate a batch of events, expected ascending by event key.
    ///
    /// Returns true if [`current_state`](Self::current_state) has work to do.
    pub fn process_events(&mut self, mut new_events: Vec<Event<F::Event>>) -> Result<bool> {
        self.ensure_usable()?;
        if self.mode == StoreMode::Uninitialized {
            return Err(Error::Invariant(format!(
                "process_events on uninitialized fish {}",
                self.fish_id
            )));
        }
        sort_and_dedup(&mut new_events, "process_events");
        // the local snapshot's final event is folded already
        if let Some(local) = &self.local {
            new_events.retain(|ev| ev.cmp_key(&local.event_key) != Ordering::Equal);
        }

        if self.capabilities.semantic_snapshots {
            Ok(self.semantic_snapshot_oriented_insert(new_events))
        } else {
            Ok(self.ordinary_insert(new_events))
        }
    }

    fn ordinary_insert(&mut self, new_events: Vec<Event<F::Event>>) -> bool {
        if new_events.is_empty() {
            return false;
        }
        if self.start_or_continue_shattering(&new_events) {
            return true;
        }
        self.merge_insert(new_events)
    }

    fn merge_insert(&mut self, new_events: Vec<Event<F::Event>>) -> bool {
        let old_len = self.events.len();
        let outcome = add_and_invalidate(&mut self.events, new_events);
        if outcome.time_travel {
            debug!(
                fish = %self.fish_id,
                highest_unmoved = ?outcome.highest_unmoved,
                old_len,
                "Time travel; invalidating cached states"
            );
            self.pointers.invalidate_down_to(outcome.highest_unmoved);
        }
        self.events.len() > old_len
    }

    fn semantic_snapshot_oriented_insert(&mut self, mut new_events: Vec<Event<F::Event>>) -> bool {
        if let Some(horizon) = self.horizon() {
            retain_above_horizon(&mut new_events, &horizon);
        }

        let Some(at) = new_events
            .iter()
            .rposition(|ev| self.fish.is_semantic_snapshot(ev))
        else {
            return self.ordinary_insert(new_events);
        };

        let mut to_append = new_events.split_off(at);
        if at > 0 {
            debug!(
                fish = %self.fish_id,
                dropped = at,
                "Dropped events preceding a semantic snapshot in the same batch"
            );
        }

        // Only now, so irrelevant events never shatter.
        if self.start_or_continue_shattering(&to_append) {
            return true;
        }

        let semantic = to_append.remove(0);
        let horizon = semantic.key();
        info!(fish = %self.fish_id, horizon = %horizon, "New semantic snapshot");

        self.semantic = Some(semantic);
        self.local = None;
        self.base_cycle = 0;
        self.base_epoch += 1;
        self.recompute_local_snapshots = true;
        self.pointers.clear();
        retain_above_horizon(&mut self.events, &horizon);

        if !to_append.is_empty() {
            self.merge_insert(to_append);
        }
        true
    }

    fn start_or_continue_shattering(&mut self, new_events: &[Event<F::Event>]) -> bool {
        if !self.capabilities.local_snapshots() {
            return false;
        }
        let Some(first) = new_events.first() else {
            return false;
        };

        if self.shatter.is_none() {
            let Some(local) = &self.local else {
                return false;
            };
            if first.cmp_key(&local.event_key) != Ordering::Less {
                return false;
            }

            let (from, mut rehydrate_up_to) = match self.pointers.latest_stored() {
                Some(pointer) => (pointer.i, pointer.state.offsets.to_builder()),
                None => (0, local.offsets.to_builder()),
            };
            for ev in &self.events[from..] {
                rehydrate_up_to.include(ev);
            }

            info!(
                fish = %self.fish_id,
                event = %first.key(),
                snapshot = %local.event_key,
                "Event predates local snapshot; shattering"
            );
            self.shatter = Some(ShatterRequest {
                earliest_known_shattering_event: first.key(),
                rehydrate_up_to,
                snapshot_to_shatter: local.clone(),
                base_epoch: self.base_epoch,
            });
            self.events.clear();
            self.pointers.clear();
            self.mode = StoreMode::Shattering;
        }

        match &mut self.shatter {
            Some(shatter) => {
                if first.cmp_key(&shatter.earliest_known_shattering_event) == Ordering::Less {
                    shatter.earliest_known_shattering_event = first.key();
                }
                for ev in new_events {
                    shatter.rehydrate_up_to.include(ev);
                }
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // State computation
    // =========================================================================

    /// Current state of the fish, rehydrating first if a shatter is pending.
    pub async fn current_state(&mut self) -> Result<StateWithProvenance<F::State>> {
        self.ensure_usable()?;
        if self.mode == StoreMode::Uninitialized {
            return Err(Error::Invariant(format!(
                "current_state on uninitialized fish {}",
                self.fish_id
            )));
        }
        while let Some(request) = self.shatter.take() {
            self.shatter_and_rehydrate(request).await?;
        }
        self.compute_state().await
    }

    async fn shatter_and_rehydrate(&mut self, request: ShatterRequest<F::State>) -> Result<()> {
        let base_unchanged = self.base_epoch == request.base_epoch
            && self
                .local
                .as_ref()
                .is_some_and(|l| l.event_key == request.snapshot_to_shatter.event_key);
        if !base_unchanged {
            return Err(self.poison(Error::Invariant(format!(
                "local snapshot {} changed while a shatter was pending",
                request.snapshot_to_shatter.event_key
            ))));
        }

        let cutoff = request.earliest_known_shattering_event;
        let up_to = request.rehydrate_up_to.build();
        info!(
            fish = %self.fish_id,
            cutoff = %cutoff,
            snapshot = %request.snapshot_to_shatter.event_key,
            rehydrate_up_to = %up_to,
            "Shattering local snapshot and rehydrating"
        );

        let persister = self.persister();
        persister.invalidate(self.fish_id.clone(), cutoff).await;
        persister.flush().await;

        self.init(up_to).await
    }

    async fn compute_state(&mut self) -> Result<StateWithProvenance<F::State>> {
        let invalidate_all = std::mem::take(&mut self.recompute_local_snapshots)
            && self.capabilities.local_snapshots();

        let levels = self
            .pointers
            .get_states_to_cache(self.base_cycle + 1, self.events.len());
        let state = self.apply_events(&levels)?;

        let Some(version) = self.capabilities.local_snapshot_version else {
            return Ok(state);
        };

        let horizon = self.horizon();
        let mut due: Vec<(PointerTag, SerializedSnapshot)> = Vec::new();
        let mut promote = None;
        if let Some(latest) = self.events.last().map(|ev| ev.timestamp) {
            for pointer in self.pointers.get_snapshots_to_persist(latest) {
                promote = Some(pointer.i);
                match self.fish.serialize_state(&pointer.state.state) {
                    Ok(blob) => due.push((
                        pointer.tag,
                        SerializedSnapshot {
                            event_key: pointer.final_included_event.clone(),
                            offsets: pointer.state.offsets.clone(),
                            horizon: horizon.clone(),
                            cycle: pointer.cycle,
                            version,
                            state: blob,
                        },
                    )),
                    Err(e) => warn!(
                        fish = %self.fish_id,
                        cycle = pointer.cycle,
                        error = %e,
                        "Failed to serialize local snapshot; skipping write"
                    ),
                }
            }
        }

        // Before any suspension point, so no caller sees a half-truncated buffer.
        if let Some(i) = promote {
            self.become_local(i)?;
        }

        if invalidate_all || !due.is_empty() {
            let persister = self.persister();
            if invalidate_all {
                persister
                    .invalidate(self.fish_id.clone(), EventKey::zero())
                    .await;
            }
            for (tag, snapshot) in due {
                if let PointerTag::Snapshot(tier) = tag {
                    persister.store(self.fish_id.clone(), tier, snapshot).await;
                }
            }
        }

        Ok(state)
    }

    fn base_state(&self) -> StateWithProvenance<F::State> {
        if let Some(semantic) = &self.semantic {
            let mut offsets = OffsetMapBuilder::new();
            offsets.include(semantic);
            return StateWithProvenance {
                state: self.fish.apply(self.fish.initial_state(), semantic),
                offsets: offsets.build(),
            };
        }
        if let Some(local) = &self.local {
            return local.provenance();
        }
        StateWithProvenance {
            state: self.fish.initial_state(),
            offsets: OffsetMap::empty(),
        }
    }

    /// Fold from the latest cached pointer to the end of the buffer, caching
    /// the states at `levels` on the way.
    fn apply_events(&mut self, levels: &[TaggedIndex]) -> Result<StateWithProvenance<F::State>> {
        let (mut state, mut offsets, mut i) = match self.pointers.latest_stored() {
            Some(pointer) => (
                pointer.state.state.clone(),
                pointer.state.offsets.to_builder(),
                pointer.i + 1,
            ),
            None => {
                let base = self.base_state();
                (base.state, base.offsets.to_builder(), 0)
            }
        };

        let mut populated = Vec::with_capacity(levels.len());
        for wanted in levels {
            while i <= wanted.i && i < self.events.len() {
                let ev = &self.events[i];
                state = self.fish.apply(state, ev);
                offsets.include(ev);
                i += 1;
            }
            if i == 0 || i - 1 != wanted.i {
                return Err(self.poison(Error::Invariant(format!(
                    "state to cache at {} is behind the fold position {i}",
                    wanted.i
                ))));
            }
            let ev = &self.events[wanted.i];
            populated.push(StatePointer::new(
                *wanted,
                StateWithProvenance {
                    state: state.clone(),
                    offsets: offsets.snapshot(),
                },
                ev.key(),
                ev.timestamp,
                self.base_cycle + wanted.i as u64 + 1,
            ));
        }

        if let Err(e) = self
            .pointers
            .add_populated_pointers(populated, self.events.len())
        {
            return Err(self.poison(e));
        }

        while i < self.events.len() {
            let ev = &self.events[i];
            state = self.fish.apply(state, ev);
            offsets.include(ev);
            i += 1;
        }

        Ok(StateWithProvenance {
            state,
            offsets: offsets.build(),
        })
    }

    /// Promote the cached state at buffer index `i` to the local snapshot
    /// base and drop every event it covers.
    fn become_local(&mut self, i: usize) -> Result<()> {
        let Some(pointer) = self.pointers.get(i) else {
            return Err(self.poison(Error::Invariant(format!(
                "no cached state at {i} to promote"
            ))));
        };
        let snapshot = LocalSnapshot {
            state: pointer.state.state.clone(),
            offsets: pointer.state.offsets.clone(),
            event_key: pointer.final_included_event.clone(),
            horizon: self.horizon(),
            cycle: pointer.cycle,
        };
        debug!(
            fish = %self.fish_id,
            event_key = %snapshot.event_key,
            cycle = snapshot.cycle,
            dropped = i + 1,
            "Now based on local snapshot"
        );

        self.base_cycle = snapshot.cycle;
        self.base_epoch += 1;
        self.local = Some(snapshot);
        let keep = i + 1;
        self.events.drain(..keep);
        self.pointers.shift_back(keep);
        // the new local snapshot carries the horizon from here on
        self.semantic = None;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn persister(&mut self) -> SnapshotPersister {
        self.persister
            .get_or_insert_with(|| {
                SnapshotPersister::spawn(Arc::clone(&self.snapshot_store), self.persist_queue_capacity)
            })
            .clone()
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(Error::Invariant(reason.clone())),
            None => Ok(()),
        }
    }

    fn poison(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            error!(fish = %self.fish_id, error = %err, "Fish event store poisoned");
            self.poisoned = Some(err.to_string());
        }
        err
    }
}
