//! Server-assisted consistency: a forward-only reducer plus the pipeline
//! that turns upstream time-travel signals into resets and resubscriptions.

pub mod observe;
pub mod reducer;
pub mod state_cache;

pub use observe::{
    MonotonicEndpoint, MonotonicMsg, Observation, ObservationHandle, ObservationStats,
    observe_monotonic,
};
pub use reducer::{Appended, MonotonicReducer, PendingSnapshot};
pub use state_cache::StateCache;
