//! Property-based tests for the snapshot scheduler and state pointer cache.
//!
//! Verifies:
//! - snapshot_levels agrees with tier_for_cycle for every window
//! - tiers never exceed max_tier
//! - get_states_to_cache is ascending, within the uncached suffix, and ends at the tail
//! - invalidate_down_to(i) leaves no pointer above i
//! - shift_back(k) rewrites every survivor to old index - k

use std::time::Duration;

use proptest::prelude::*;

use fishpond_core::snapshot_scheduler::SnapshotScheduler;
use fishpond_core::state_pointers::{StatePointer, StatePointers};
use fishpond_core::{EventKey, OffsetMap, StateWithProvenance, Timestamp};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_scheduler() -> impl Strategy<Value = SnapshotScheduler> {
    (1u64..=16, 0u8..=8)
        .prop_map(|(interval, max_tier)| SnapshotScheduler::new(interval, max_tier, Duration::ZERO))
}

/// Buffer lengths of consecutive rounds; each round only grows the buffer.
fn arb_growth() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..20, 1..12).prop_map(|steps| {
        steps
            .into_iter()
            .scan(0, |len, step| {
                *len += step;
                Some(*len)
            })
            .collect()
    })
}

/// Run `rounds` of compute-and-cache, stamping each pointer with its index.
fn populated(scheduler: SnapshotScheduler, rounds: &[usize]) -> StatePointers<usize> {
    let mut cache = StatePointers::new(scheduler, true);
    for &len in rounds {
        let wanted = cache.get_states_to_cache(1, len);
        let pointers = wanted
            .into_iter()
            .map(|t| {
                StatePointer::new(
                    t,
                    StateWithProvenance {
                        state: t.i,
                        offsets: OffsetMap::empty(),
                    },
                    EventKey::new(t.i as u64, "s"),
                    Timestamp::default(),
                    t.i as u64 + 1,
                )
            })
            .collect();
        cache.add_populated_pointers(pointers, len).unwrap();
    }
    cache
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Window positions map to exactly the cycles the scheduler selects.
    #[test]
    fn levels_agree_with_tier_for_cycle(
        scheduler in arb_scheduler(),
        first_cycle in 0u64..200,
        count in 0usize..100,
    ) {
        let levels = scheduler.snapshot_levels(first_cycle, count);
        let expected: Vec<_> = (0..count)
            .filter_map(|i| scheduler.tier_for_cycle(first_cycle + i as u64).map(|t| (i, t)))
            .collect();
        prop_assert_eq!(levels, expected);
    }

    /// Tiers are capped.
    #[test]
    fn tiers_are_capped(scheduler in arb_scheduler(), cycle in 1u64..100_000, max_tier in 0u8..=8) {
        let capped = SnapshotScheduler::new(scheduler.interval(), max_tier, Duration::ZERO);
        if let Some(tier) = capped.tier_for_cycle(cycle) {
            prop_assert!(tier.0 <= max_tier);
            prop_assert_eq!(cycle % scheduler.interval(), 0);
        }
    }

    /// Requested positions are ascending, uncached, and include the tail.
    #[test]
    fn states_to_cache_cover_the_tail(scheduler in arb_scheduler(), rounds in arb_growth()) {
        let (last, earlier) = rounds.split_last().unwrap();
        let cache = populated(scheduler, earlier);
        let start = cache.latest_stored().map_or(0, |p| p.i + 1);
        let wanted = cache.get_states_to_cache(1, *last);
        prop_assert!(wanted.windows(2).all(|w| w[0].i < w[1].i));
        prop_assert!(wanted.iter().all(|t| t.i >= start && t.i < *last));
        if start < *last {
            prop_assert_eq!(wanted.last().map(|t| t.i), Some(*last - 1));
        }
    }

    /// Cached pointers stay ascending and hold the state computed for their index.
    #[test]
    fn pointers_stay_consistent(scheduler in arb_scheduler(), rounds in arb_growth()) {
        let cache = populated(scheduler, &rounds);
        let indices = cache.indices();
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(cache.iter().all(|p| p.state.state == p.i));
        prop_assert_eq!(cache.latest_stored().map(|p| p.i), rounds.last().map(|l| l - 1));
    }

    /// invalidate_down_to(i) keeps only pointers at or below i.
    #[test]
    fn invalidation_drops_everything_above(
        scheduler in arb_scheduler(),
        rounds in arb_growth(),
        cut in 0usize..250,
    ) {
        let mut cache = populated(scheduler, &rounds);
        let before: Vec<usize> = cache.indices();
        cache.invalidate_down_to(Some(cut));
        let after = cache.indices();
        prop_assert!(after.iter().all(|&i| i <= cut));
        let expected: Vec<usize> = before.into_iter().filter(|&i| i <= cut).collect();
        prop_assert_eq!(after, expected);
    }

    /// shift_back(k) moves every survivor down by exactly k.
    #[test]
    fn shift_back_rewrites_indices(
        scheduler in arb_scheduler(),
        rounds in arb_growth(),
        k in 0usize..250,
    ) {
        let mut cache = populated(scheduler, &rounds);
        let before = cache.indices();
        cache.shift_back(k);
        let expected: Vec<usize> = before.into_iter().filter(|&i| i >= k).map(|i| i - k).collect();
        prop_assert_eq!(cache.indices(), expected);
        prop_assert!(cache.iter().all(|p| p.state.state == p.i + k));
    }
}
