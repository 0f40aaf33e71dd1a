//! Snapshot scheduling by cycle number.
//!
//! Bead: fp-scheduler
//!
//! Cycle `c` counts events folded since the horizon. A position is a snapshot
//! candidate when its cycle is a multiple of the interval; its tier is how many
//! times the multiple can be halved, so each tier is half as dense as the one
//! below:
//!
//! ```text
//!   interval 10:   cycle  10  20  30  40  50  60  70  80
//!                  tier    0   1   0   2   0   1   0   3
//! ```
//!
//! The store keeps one snapshot per tier, which leaves older checkpoints
//! progressively sparser. Eligibility is a pure function of the cycle, so
//! identical event sequences always select identical positions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::Timestamp;

/// Storage tier label of a snapshot candidate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SnapshotTier(pub u8);

impl fmt::Display for SnapshotTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier-{}", self.0)
    }
}

/// Decides which cycles become snapshot candidates and when they may be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotScheduler {
    interval: u64,
    max_tier: u8,
    min_storage_age: Duration,
}

impl SnapshotScheduler {
    #[must_use]
    pub fn new(interval: u64, max_tier: u8, min_storage_age: Duration) -> Self {
        Self {
            interval: interval.max(1),
            max_tier,
            min_storage_age,
        }
    }

    /// Scheduler with the default tier cap and a one hour storage age.
    #[must_use]
    pub fn create(interval: u64) -> Self {
        Self::new(interval, 20, Duration::from_secs(3600))
    }

    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    #[must_use]
    pub fn min_storage_age(&self) -> Duration {
        self.min_storage_age
    }

    /// Tier for `cycle`, or `None` if the cycle is not a candidate.
    #[must_use]
    pub fn tier_for_cycle(&self, cycle: u64) -> Option<SnapshotTier> {
        if cycle == 0 || cycle % self.interval != 0 {
            return None;
        }
        let multiple = cycle / self.interval;
        let tier = multiple.trailing_zeros().min(u32::from(self.max_tier));
        Some(SnapshotTier(tier as u8))
    }

    /// Candidate positions among `count` new events, where the event at
    /// position `i` completes cycle `first_cycle + i`.
    #[must_use]
    pub fn snapshot_levels(&self, first_cycle: u64, count: usize) -> Vec<(usize, SnapshotTier)> {
        if count == 0 {
            return Vec::new();
        }
        let last_cycle = first_cycle + count as u64 - 1;
        let mut cycle = first_cycle.div_ceil(self.interval) * self.interval;
        let mut levels = Vec::new();
        while cycle <= last_cycle {
            if let Some(tier) = self.tier_for_cycle(cycle) {
                levels.push(((cycle - first_cycle) as usize, tier));
            }
            cycle += self.interval;
        }
        levels
    }

    /// Whether a candidate created at `candidate` is old enough, as seen from
    /// the newest known event at `latest`, to be written to storage.
    #[must_use]
    pub fn is_eligible_for_storage(&self, candidate: Timestamp, latest: Timestamp) -> bool {
        latest.saturating_since(candidate) >= self.min_storage_age
    }
}
