#![no_main]

use std::sync::Arc;

use fishpond_core::{
    Event, Fish, FishCapabilities, FishEventStore, FishId, InMemoryEventStore,
    InMemorySnapshotStore, OffsetMap, PondConfig, SubscriptionSet,
};
use libfuzzer_sys::fuzz_target;

const STREAMS: [&str; 4] = ["a", "b", "c", "d"];

/// Folds payloads in order; a wrong order or a double fold changes the list.
struct Recorder;

impl Fish for Recorder {
    type State = Vec<u64>;
    type Event = u64;

    fn fish_id(&self) -> FishId {
        FishId::new("recorder", "fuzz")
    }

    fn subscriptions(&self) -> SubscriptionSet {
        SubscriptionSet::all()
    }

    fn initial_state(&self) -> Vec<u64> {
        Vec::new()
    }

    fn on_event(&self, mut state: Vec<u64>, event: &Event<u64>) -> Vec<u64> {
        state.push(event.payload);
        state
    }

    fn capabilities(&self) -> FishCapabilities {
        FishCapabilities {
            semantic_snapshots: false,
            local_snapshot_version: Some(1),
        }
    }
}

/// Event with a globally unique lamport so payload order equals key order.
fn event(lamport: u64) -> Event<u64> {
    let stream = STREAMS[(lamport % 4) as usize];
    Event::new(lamport, stream, lamport / 4, lamport)
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let interval = u64::from(data[0] % 8) + 1;

    // every byte is a lamport; a zero byte closes the current batch
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    for &byte in &data[1..] {
        if byte == 0 {
            batches.push(std::mem::take(&mut batch));
        } else {
            batch.push(event(u64::from(byte)));
        }
    }
    batches.push(batch);

    let store = Arc::new(InMemoryEventStore::new("fuzz"));
    let mut all: Vec<u64> = batches.iter().flatten().map(|e| e.payload).collect();
    all.sort_unstable();
    all.dedup();
    for &lamport in &all {
        let _ = store.insert(event(lamport));
    }

    let mut config = PondConfig::default();
    config.snapshots.min_events_for_snapshot = interval;
    config.snapshots.storage_min_age_secs = 0;
    config.hydration.retry_initial_delay_ms = 1;
    config.hydration.retry_max_delay_ms = 1;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut engine = FishEventStore::initialize(
            Recorder,
            store,
            Arc::new(InMemorySnapshotStore::new()),
            &config,
            OffsetMap::empty(),
        )
        .await
        .unwrap();

        for mut batch in batches {
            batch.sort();
            batch.dedup();
            engine.process_events(batch).unwrap();
            engine.current_state().await.unwrap();
            let errors = engine.validate();
            assert!(errors.is_empty(), "{errors:?}");
        }
        let state = engine.current_state().await.unwrap();
        assert_eq!(state.state, all);
    });
});
