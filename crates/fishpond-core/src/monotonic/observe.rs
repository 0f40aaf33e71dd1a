//! Observation pipeline over a monotonic upstream.
//!
//! Bead: fp-monotonic-observe
//!
//! ```text
//!   endpoint ──State / Events / TimeTravel──▶ pipeline ──▶ StateWithProvenance
//!      ▲                                         │
//!      └──── resubscribe(from offsets) ◀─────────┘  on time travel or upstream end
//! ```
//!
//! The upstream may announce that an event was inserted in the past. The
//! pipeline then resets the reducer to the newest state it knows to be older
//! than the trigger and subscribes again from that state's offsets. The
//! application only ever sees a sequence of states, never the reset itself.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::config::MonotonicConfig;
use crate::error::{Error, EventStoreError, Result};
use crate::event::{Event, EventKey};
use crate::fish::{Fish, SubscriptionSet};
use crate::fish_span;
use crate::monotonic::reducer::{MonotonicReducer, PendingSnapshot};
use crate::monotonic::state_cache::StateCache;
use crate::offsets::OffsetMap;
use crate::persistence::SnapshotPersister;
use crate::retry::RetryPolicy;
use crate::snapshot::{FishId, LocalSnapshot, SerializedSnapshot, StateWithProvenance};
use crate::snapshot_store::SnapshotStore;

/// One message of a monotonic subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum MonotonicMsg<E> {
    /// Replace the state wholesale.
    State(SerializedSnapshot),
    /// Events to fold in order; `caught_up` marks the end of a burst.
    Events {
        events: Vec<Event<E>>,
        caught_up: bool,
    },
    /// An event at `trigger` was inserted before already delivered ones.
    /// The subscription ends after this message.
    TimeTravel { trigger: EventKey },
}

/// Upstream that detects time travel on the reader's behalf.
pub trait MonotonicEndpoint<E>: Send + Sync {
    fn subscribe(
        &self,
        fish: &FishId,
        subscriptions: &SubscriptionSet,
        from: Option<&OffsetMap>,
    ) -> impl Future<Output = std::result::Result<mpsc::Receiver<MonotonicMsg<E>>, EventStoreError>>
    + Send;
}

/// Counters reported when an observation ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationStats {
    pub emitted: u64,
    pub time_travels: u64,
    pub resubscriptions: u64,
    pub snapshots_persisted: u64,
}

/// States of an observed fish plus the handle controlling the pipeline.
pub struct Observation<S> {
    pub states: mpsc::Receiver<StateWithProvenance<S>>,
    pub handle: ObservationHandle,
}

/// Controls a running observation. Dropping it cancels the observation.
pub struct ObservationHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<ObservationStats>,
}

impl ObservationHandle {
    /// Stop the upstream subscription and any pending resubscription.
    /// Queued snapshot writes still complete.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<ObservationStats> {
        self.task
            .await
            .map_err(|e| Error::Cancelled(format!("observation task failed: {e}")))
    }
}

/// Start observing `fish` through `endpoint`. Must be called within a tokio
/// runtime.
pub fn observe_monotonic<F, EP, SS>(
    fish: Arc<F>,
    endpoint: Arc<EP>,
    snapshot_store: Arc<SS>,
    config: &MonotonicConfig,
) -> Observation<F::State>
where
    F: Fish,
    EP: MonotonicEndpoint<F::Event> + 'static,
    SS: SnapshotStore + 'static,
{
    let (out, states) = mpsc::channel(config.output_buffer.max(1));
    let (cancel, cancel_rx) = watch::channel(false);
    let fish_id = fish.fish_id();
    let span = fish_span!("observe_monotonic", fish = %fish_id);

    let pipeline = Pipeline {
        subscriptions: fish.subscriptions(),
        version: fish.capabilities().local_snapshot_version,
        reducer: MonotonicReducer::new(Arc::clone(&fish), config.scheduler()),
        cache: StateCache::new(config.state_cache_capacity),
        persister: SnapshotPersister::spawn(snapshot_store, config.persist_queue_capacity),
        policy: config.resubscribe_policy(),
        stats: ObservationStats::default(),
        fish,
        fish_id,
        endpoint,
        out,
    };
    let task = tokio::spawn(pipeline.run(cancel_rx).instrument(span));

    Observation {
        states,
        handle: ObservationHandle { cancel, task },
    }
}

// =============================================================================
// Pipeline
// =============================================================================

enum Upstream {
    /// Subscribe again from the reducer head.
    Restart,
    /// Closed or failed; back off, then subscribe again from the head.
    Ended,
    Stop,
}

struct Pipeline<F: Fish, EP> {
    fish: Arc<F>,
    fish_id: FishId,
    subscriptions: SubscriptionSet,
    version: Option<u32>,
    endpoint: Arc<EP>,
    reducer: MonotonicReducer<F>,
    cache: StateCache<F::State>,
    persister: SnapshotPersister,
    policy: RetryPolicy,
    out: mpsc::Sender<StateWithProvenance<F::State>>,
    stats: ObservationStats,
}

impl<F, EP> Pipeline<F, EP>
where
    F: Fish,
    EP: MonotonicEndpoint<F::Event>,
{
    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> ObservationStats {
        let mut failures = 0_u32;
        loop {
            // earlier writes land before the new subscription starts
            if !self.persister.flush().await {
                warn!("Snapshot persister unavailable");
            }

            let from = self.resume_offsets();
            let subscribed = tokio::select! {
                _ = cancel.changed() => break,
                () = self.out.closed() => break,
                subscribed = self.endpoint.subscribe(&self.fish_id, &self.subscriptions, from.as_ref()) => subscribed,
            };

            let outcome = match subscribed {
                Ok(upstream) => self.consume(upstream, &mut cancel, &mut failures).await,
                Err(e) => {
                    warn!(error = %e, "Monotonic subscription failed");
                    Upstream::Ended
                }
            };

            match outcome {
                Upstream::Stop => break,
                Upstream::Restart => {
                    self.stats.resubscriptions += 1;
                }
                Upstream::Ended => {
                    let delay = self.policy.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    self.stats.resubscriptions += 1;
                    debug!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream ended; resubscribing"
                    );
                    tokio::select! {
                        _ = cancel.changed() => break,
                        () = self.out.closed() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(
            emitted = self.stats.emitted,
            time_travels = self.stats.time_travels,
            resubscriptions = self.stats.resubscriptions,
            "Observation stopped"
        );
        self.stats
    }

    fn resume_offsets(&self) -> Option<OffsetMap> {
        let offsets = &self.reducer.head().offsets;
        (!offsets.is_empty()).then(|| offsets.clone())
    }

    async fn consume(
        &mut self,
        mut upstream: mpsc::Receiver<MonotonicMsg<F::Event>>,
        cancel: &mut watch::Receiver<bool>,
        failures: &mut u32,
    ) -> Upstream {
        loop {
            let msg = tokio::select! {
                _ = cancel.changed() => return Upstream::Stop,
                () = self.out.closed() => return Upstream::Stop,
                msg = upstream.recv() => msg,
            };
            let Some(msg) = msg else {
                return Upstream::Ended;
            };
            *failures = 0;

            match msg {
                MonotonicMsg::State(snapshot) => {
                    if !self.set_state(snapshot) {
                        return Upstream::Restart;
                    }
                }
                MonotonicMsg::Events { events, caught_up } => {
                    debug!(events = events.len(), caught_up, "Applying event chunk");
                    let appended = self.reducer.append_events(&events, caught_up);
                    if let Some(state) = appended.emit {
                        tokio::select! {
                            _ = cancel.changed() => return Upstream::Stop,
                            sent = self.out.send(state) => {
                                if sent.is_err() {
                                    debug!("State receiver dropped");
                                    return Upstream::Stop;
                                }
                            }
                        }
                        self.stats.emitted += 1;
                    }
                    self.persist(appended.snapshots).await;
                }
                MonotonicMsg::TimeTravel { trigger } => {
                    self.time_travel(&trigger);
                    return Upstream::Restart;
                }
            }
        }
    }

    /// Returns false if the state could not be decoded; the head is then
    /// back at the initial state.
    fn set_state(&mut self, mut snapshot: SerializedSnapshot) -> bool {
        let blob = std::mem::take(&mut snapshot.state);
        match self.fish.deserialize_state(blob) {
            Ok(state) => {
                info!(
                    streams = snapshot.offsets.len(),
                    cycle = snapshot.cycle,
                    "Directly setting state"
                );
                self.reducer.set_state(snapshot.into_local(state));
                true
            }
            Err(e) => {
                warn!(error = %e, "Undecodable upstream state; restarting from initial state");
                self.reducer
                    .set_state(LocalSnapshot::initial(self.fish.initial_state()));
                false
            }
        }
    }

    fn time_travel(&mut self, trigger: &EventKey) {
        let queued = self.reducer.latest_pending_before(trigger);
        let cached = self.cache.latest_before(trigger);
        let reset = match (queued, cached) {
            (Some(q), Some(c)) if c.event_key > q.event_key => c.clone(),
            (Some(q), _) => q.clone(),
            (None, Some(c)) => c.clone(),
            (None, None) => LocalSnapshot::initial(self.fish.initial_state()),
        };
        info!(
            trigger = %trigger,
            reset_to = %reset.event_key,
            cycle = reset.cycle,
            "Time travel; resetting"
        );
        self.stats.time_travels += 1;
        self.cache.invalidate_from(trigger);
        self.reducer.set_state(reset);
    }

    async fn persist(&mut self, due: Vec<PendingSnapshot<F::State>>) {
        for pending in due {
            if let Some(version) = self.version {
                match self.fish.serialize_state(&pending.snapshot.state) {
                    Ok(blob) => {
                        let serialized = pending.snapshot.to_serialized(version, blob);
                        self.persister
                            .store(self.fish_id.clone(), pending.tier, serialized)
                            .await;
                        self.stats.snapshots_persisted += 1;
                    }
                    Err(e) => warn!(
                        cycle = pending.snapshot.cycle,
                        error = %e,
                        "Failed to serialize snapshot candidate"
                    ),
                }
            }
            self.cache.remember(pending.snapshot);
        }
    }
}
