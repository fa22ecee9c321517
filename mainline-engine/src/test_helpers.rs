// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Helpers shared by the engine tests and by tests of crates built on the
//! engine.

use std::rc::Rc;

use mainline_track::Tracker;
use mainline_track::test_helpers::test_tracker;
use mainline_track::tracker::InMemoryTracker;

use crate::engine::Engine;

/// Create an engine for a test together with the in-memory tracker it logs
/// to.
///
/// The `name` argument is accepted so call sites read as
/// `start_test(file!())`, which makes it easy to find the test a captured
/// log line came from.
#[must_use]
pub fn start_test<E>(name: &str) -> (Engine<E>, Rc<InMemoryTracker>) {
    let (in_memory, tracker) = test_tracker(log::Level::Trace);
    let engine = Engine::new(&tracker);
    log::trace!("starting test {name}");
    (engine, in_memory)
}

/// A quiet engine for tests that do not inspect log output.
#[must_use]
pub fn quiet_engine<E>() -> Engine<E> {
    let tracker: Tracker = mainline_track::tracker::dev_null_tracker();
    Engine::new(&tracker)
}
