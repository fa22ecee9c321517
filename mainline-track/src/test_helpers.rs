// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing logging output.
//!
//! The aim of this module is to provide commonly-used functions that enable
//! the testing of the output that should appear from the track macros.

use std::rc::Rc;

use regex::Regex;

use crate::Tracker;
use crate::tracker::InMemoryTracker;

/// Create an [`InMemoryTracker`] for a test, returning both the concrete
/// tracker (so that events can be inspected) and the shared [`Tracker`]
/// handle that entities are created with.
#[must_use]
pub fn test_tracker(level: log::Level) -> (Rc<InMemoryTracker>, Tracker) {
    let in_memory = Rc::new(InMemoryTracker::new(level));
    let tracker: Tracker = in_memory.clone();
    (in_memory, tracker)
}

/// Check and clear the _trace_ and _log_ output.
///
/// This function asserts that the event lines seen since the start, or since
/// the last time this function was called, match the expected regular
/// expressions. It then clears the events recorded so far.
pub fn check_and_clear(tracker: &InMemoryTracker, expected: &[&str]) {
    let events = tracker.take_events();

    assert_eq!(
        expected.len(),
        events.len(),
        "expected {} events, recorded {}: {events:?}",
        expected.len(),
        events.len()
    );

    for (i, (pattern, actual)) in expected.iter().zip(events.iter()).enumerate() {
        let re = Regex::new(pattern).unwrap();
        assert!(re.is_match(actual), "event {i}: {pattern:?} !~ {actual:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::toplevel;
    use crate::info;

    #[test]
    fn records_and_clears() {
        let (in_memory, tracker) = test_tracker(log::Level::Trace);
        let top = toplevel(&tracker, "top");
        info!(top ; "hello {}", 42);
        check_and_clear(&in_memory, &[r"created \d+, top", r"INFO: hello 42"]);
        assert!(in_memory.events().is_empty());
    }
}
