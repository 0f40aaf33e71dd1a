//! Merge-insert into the canonical event buffer.
//!
//! Bead: fp-merge
//!
//! The replay engine keeps its buffer sorted by [`EventKey`] with no duplicate
//! keys. New batches are merged in, and the merge reports how much of the old
//! buffer kept its position:
//!
//! ```text
//!   buffer   [1, 3, 5]          batch [2, 3, 6]
//!   merged   [1, 2, 3, 5, 6]
//!             ^ highest unmoved index = 0
//! ```
//!
//! Everything cached for positions above the highest unmoved index was
//! computed from a prefix that no longer exists: that is time travel.

use std::cmp::Ordering;

use tracing::{debug, error};

use crate::error::EventStoreError;
use crate::event::{Event, EventKey};

/// Two-pointer merge of two ascending sequences into `out`.
///
/// `out` is cleared first. Elements of `right` that compare equal to an
/// element of `left`, or to an earlier element of `right`, are dropped, so the
/// copy already in `left` wins. Returns the highest index of `out` that still
/// holds the same `left` element it held before the merge, or `None` if the
/// very first position changed (or `left` was empty).
pub fn merge_sorted_into<T, F>(left: Vec<T>, right: Vec<T>, out: &mut Vec<T>, ord: F) -> Option<usize>
where
    F: Fn(&T, &T) -> Ordering,
{
    out.clear();
    out.reserve(left.len() + right.len());

    let mut highest_unmoved = None;
    let mut moved = false;
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => match ord(l, r) {
                Ordering::Less => true,
                Ordering::Equal => {
                    right.next();
                    continue;
                }
                Ordering::Greater => false,
            },
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_left {
            if let Some(item) = left.next() {
                if !moved {
                    highest_unmoved = Some(out.len());
                }
                out.push(item);
            }
        } else if let Some(item) = right.next() {
            if out
                .last()
                .is_some_and(|last| ord(last, &item) == Ordering::Equal)
            {
                continue;
            }
            moved = true;
            out.push(item);
        }
    }

    highest_unmoved
}

/// Result of inserting a batch into the event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Highest buffer index whose content did not change.
    pub highest_unmoved: Option<usize>,
    /// Whether any previously buffered position was displaced.
    pub time_travel: bool,
}

/// Insert an ascending batch into an ascending buffer.
///
/// Appends directly when the whole batch is newer than the buffer; otherwise
/// rebuilds the buffer through [`merge_sorted_into`].
pub fn add_and_invalidate<E>(buffer: &mut Vec<Event<E>>, batch: Vec<Event<E>>) -> InsertOutcome {
    let old_len = buffer.len();
    let appends_cleanly = match (buffer.last(), batch.first()) {
        (Some(last), Some(first)) => last < first,
        _ => true,
    };

    if appends_cleanly {
        buffer.extend(batch);
        return InsertOutcome {
            highest_unmoved: old_len.checked_sub(1),
            time_travel: false,
        };
    }

    let old = std::mem::take(buffer);
    let highest_unmoved = merge_sorted_into(old, batch, buffer, Event::cmp);
    let unmoved_len = highest_unmoved.map_or(0, |w| w + 1);
    let time_travel = unmoved_len < old_len;
    if time_travel {
        debug!(
            old_len,
            new_len = buffer.len(),
            unmoved_len,
            "Merge displaced buffered events"
        );
    }
    InsertOutcome {
        highest_unmoved,
        time_travel,
    }
}

/// Describe every adjacent pair that is not strictly ascending.
pub fn order_errors<E>(events: &[Event<E>]) -> Vec<String> {
    events
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] >= pair[1])
        .map(|(i, pair)| {
            let kind = if pair[0] == pair[1] {
                "duplicate"
            } else {
                "inversion"
            };
            format!(
                "{kind} at {i}: {} then {}",
                pair[0].key(),
                pair[1].key()
            )
        })
        .collect()
}

/// `Err(OutOfOrder)` naming the first violation if `events` is not strictly
/// ascending.
pub fn check_order<E>(events: &[Event<E>]) -> Result<(), EventStoreError> {
    let errors = order_errors(events);
    match errors.first() {
        None => Ok(()),
        Some(first) => Err(EventStoreError::OutOfOrder(format!(
            "{} violations, first {first}",
            errors.len()
        ))),
    }
}

/// Make `events` strictly ascending, keeping the first copy of each key.
///
/// Returns true if a repair was needed. Delivery out of the declared order is
/// a collaborator bug; it is logged and fixed here, never propagated.
pub fn sort_and_dedup<E>(events: &mut Vec<Event<E>>, source: &str) -> bool {
    let Err(err) = check_order(events) else {
        return false;
    };
    error!(source, error = %err, "Repairing batch");
    events.sort();
    events.dedup();
    true
}

/// Drop every event at or below `horizon` from an ascending sequence.
pub fn retain_above_horizon<E>(events: &mut Vec<Event<E>>, horizon: &EventKey) {
    let cut = events.partition_point(|ev| ev.cmp_key(horizon) != Ordering::Greater);
    events.drain(..cut);
}
