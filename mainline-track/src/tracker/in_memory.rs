// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A tracker that keeps all track events in memory.
//!
//! Mostly useful for tests, which can assert on the recorded lines without
//! touching the filesystem.

use std::cell::RefCell;

use crate::tracker::{EntityManager, Track};
use crate::Id;

/// Tracker that records all track events as formatted lines.
pub struct InMemoryTracker {
    entity_manager: EntityManager,
    events: RefCell<Vec<String>>,
}

impl InMemoryTracker {
    /// Create a new [`InMemoryTracker`] recording events at `level`.
    #[must_use]
    pub fn new(level: log::Level) -> Self {
        Self {
            entity_manager: EntityManager::new(level),
            events: RefCell::new(Vec::new()),
        }
    }

    fn add_event(&self, event: String) {
        self.events.borrow_mut().push(event);
    }

    /// The events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    /// Take all recorded events, leaving the tracker empty.
    #[must_use]
    pub fn take_events(&self) -> Vec<String> {
        self.events.borrow_mut().drain(..).collect()
    }
}

impl Track for InMemoryTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_enabled(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn enter(&self, enter_into: Id, enter_obj: Id) {
        self.add_event(format!("{enter_into}: enter {enter_obj}"));
    }

    fn exit(&self, exit_from: Id, exit_obj: Id) {
        self.add_event(format!("{exit_from}: exit {exit_obj}"));
    }

    fn create(&self, created_by: Id, created_obj: Id, name: &str) {
        self.add_event(format!("{created_by}: created {created_obj}, {name}"));
    }

    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id) {
        self.add_event(format!("{destroyed_by}: destroyed {destroyed_obj}"));
    }

    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{msg_by}:{level}: {msg}"));
    }

    fn time(&self, set_by: Id, time_ns: f64) {
        self.add_event(format!("{set_by}: set time to {time_ns:.1}ns"));
    }

    fn shutdown(&self) {}
}
