// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the in-memory tracker.
pub mod in_memory;
/// Include the text-based tracker.
pub mod text;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

pub use dev_null::DevNullTracker;
pub use in_memory::InMemoryTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT};

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global id.
    fn unique_id(&self) -> Id;

    /// Determine whether tracking is enabled, and at what level, for an
    /// entity looked up by its id.
    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool;

    /// Record an entity being created.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an object with the given id enters an entity.
    fn enter(&self, enter_into: Id, enter_obj: Id);

    /// Track when an object with the given id exits an entity.
    fn exit(&self, exit_from: Id, exit_obj: Id);

    /// Track when an entity with the given id is created.
    fn create(&self, created_by: Id, created_obj: Id, name: &str);

    /// Track when an entity with the given id is destroyed.
    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the time specified in `ns`.
    fn time(&self, set_by: Id, time_ns: f64);

    /// Perform any pre-exit shutdown/cleanup.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Rc<dyn Track>;

/// Create a [`Tracker`] that prints all track events to `stdout`.
#[must_use]
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let entity_manager = EntityManager::new(level);
    let stdout_writer = Box::new(io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Rc::new(TextTracker::new(entity_manager, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
#[must_use]
pub fn dev_null_tracker() -> Tracker {
    let tracker: Tracker = Rc::new(DevNullTracker {});
    tracker
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// This is shared by the writer-backed trackers. The manager is also used to
/// allocate unique [`Id`] values.
pub struct EntityManager {
    /// Level of tracking events to output.
    default_entity_level: log::Level,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_entity_level: Vec<(Regex, log::Level)>,

    /// Used to assign unique ids.
    unique_id: RefCell<u64>,

    /// Keep track of entities that have levels different to the default.
    entity_levels: RefCell<HashMap<Id, log::Level>>,
}

impl EntityManager {
    /// Create a manager with the given default level for all entities.
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            unique_id: RefCell::new(ROOT.0),
            entity_levels: RefCell::new(HashMap::new()),
        }
    }

    /// Set the level for entities whose full name matches `filter_regex`.
    ///
    /// Entities that do not match any filter keep the default level.
    #[must_use]
    pub fn with_filter(mut self, filter_regex: &Regex, level: log::Level) -> Self {
        self.regex_to_entity_level
            .push((filter_regex.clone(), level));
        self
    }

    /// Allocate a new unique id.
    pub fn unique_id(&self) -> Id {
        let mut unique_id = self.unique_id.borrow_mut();
        let id = Id(*unique_id);
        *unique_id += 1;
        id
    }

    /// Record the name of a new entity and work out its level.
    pub fn add_entity(&self, id: Id, entity_name: &str) {
        for (regex, level) in &self.regex_to_entity_level {
            if regex.is_match(entity_name) {
                self.entity_levels.borrow_mut().insert(id, *level);
                return;
            }
        }
    }

    /// Whether events at `level` should be emitted for the entity `id`.
    pub fn is_enabled(&self, id: Id, level: log::Level) -> bool {
        match self.entity_levels.borrow().get(&id) {
            Some(entity_level) => level <= *entity_level,
            None => level <= self.default_entity_level,
        }
    }
}
