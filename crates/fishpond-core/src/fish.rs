//! The per-entity-type behaviour the engines fold events with.
//!
//! Bead: fp-fish
//!
//! A fish is a fold over a tag-selected subset of the event log. Its type
//! supplies the fold and a few optional capabilities:
//!
//! - **reset events** put the state back to `initial_state` before applying;
//! - **semantic snapshots** are events that fully determine the state on their
//!   own, making everything before them irrelevant;
//! - **local snapshots** let the engine persist computed states so hydration
//!   does not have to replay from genesis.
//!
//! Capabilities are read once when an engine is constructed.

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::Event;
use crate::snapshot::FishId;

/// Optional features a fish type opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FishCapabilities {
    pub semantic_snapshots: bool,
    /// Format version of persisted local snapshots; `None` disables them.
    pub local_snapshot_version: Option<u32>,
}

impl FishCapabilities {
    #[must_use]
    pub fn local_snapshots(&self) -> bool {
        self.local_snapshot_version.is_some()
    }
}

/// Behaviour of one entity type.
pub trait Fish: Send + Sync + 'static {
    type State: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Event: Clone + Send + Sync + 'static;

    fn fish_id(&self) -> FishId;

    fn subscriptions(&self) -> SubscriptionSet;

    fn initial_state(&self) -> Self::State;

    fn on_event(&self, state: Self::State, event: &Event<Self::Event>) -> Self::State;

    fn is_reset(&self, _event: &Event<Self::Event>) -> bool {
        false
    }

    fn is_semantic_snapshot(&self, _event: &Event<Self::Event>) -> bool {
        false
    }

    fn capabilities(&self) -> FishCapabilities {
        FishCapabilities::default()
    }

    fn serialize_state(&self, state: &Self::State) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(state)
    }

    fn deserialize_state(&self, blob: serde_json::Value) -> serde_json::Result<Self::State> {
        serde_json::from_value(blob)
    }

    /// Fold one event, honouring reset events.
    fn apply(&self, state: Self::State, event: &Event<Self::Event>) -> Self::State {
        if self.is_reset(event) {
            self.on_event(self.initial_state(), event)
        } else {
            self.on_event(state, event)
        }
    }
}

/// Tags an event must all carry to match one subscription.
pub type TagSet = BTreeSet<String>;

/// Union of tag subscriptions: an event matches if any member set is a
/// subset of its tags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionSet {
    sets: Vec<TagSet>,
}

impl SubscriptionSet {
    /// Matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self {
            sets: vec![TagSet::new()],
        }
    }

    /// Matches nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tags<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::none().or(tags)
    }

    #[must_use]
    pub fn or<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.sets.push(tags.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        self.sets
            .iter()
            .any(|set| set.iter().all(|wanted| tags.contains(wanted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Total(i64);

    struct Ledger;

    impl Fish for Ledger {
        type State = Total;
        type Event = i64;

        fn fish_id(&self) -> FishId {
            FishId::new("ledger", "main")
        }

        fn subscriptions(&self) -> SubscriptionSet {
            SubscriptionSet::tags(["ledger"])
        }

        fn initial_state(&self) -> Total {
            Total(0)
        }

        fn on_event(&self, state: Total, event: &Event<i64>) -> Total {
            Total(state.0 + event.payload)
        }

        fn is_reset(&self, event: &Event<i64>) -> bool {
            event.tags.iter().any(|t| t == "reset")
        }
    }

    #[test]
    fn apply_honours_reset_events() {
        let fish = Ledger;
        let state = fish.apply(Total(0), &Event::new(1, "a", 0, 5));
        let state = fish.apply(state, &Event::new(2, "a", 1, 7));
        assert_eq!(state, Total(12));
        let state = fish.apply(state, &Event::new(3, "a", 2, 1).with_tags(["reset"]));
        assert_eq!(state, Total(1));
    }

    #[test]
    fn default_capabilities_are_plain() {
        let caps = Ledger.capabilities();
        assert!(!caps.semantic_snapshots);
        assert!(!caps.local_snapshots());
    }

    #[test]
    fn default_state_codec_is_json() {
        let blob = Ledger.serialize_state(&Total(9)).unwrap();
        assert_eq!(blob, serde_json::json!(9));
        assert_eq!(Ledger.deserialize_state(blob).unwrap(), Total(9));
        assert!(Ledger.deserialize_state(serde_json::json!("x")).is_err());
    }

    #[test]
    fn subscription_matching() {
        let owned = |tags: &[&str]| tags.iter().map(|t| (*t).to_string()).collect::<Vec<_>>();
        let subs = SubscriptionSet::tags(["order", "open"]).or(["audit"]);
        assert!(subs.matches(&owned(&["order", "open", "extra"])));
        assert!(subs.matches(&owned(&["audit"])));
        assert!(!subs.matches(&owned(&["order"])));
        assert!(SubscriptionSet::all().matches(&[]));
        assert!(!SubscriptionSet::none().matches(&owned(&["order"])));
    }
}
