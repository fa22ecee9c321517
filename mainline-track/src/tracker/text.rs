// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A simple text tracker to output messages to a [`Writer`].

use std::cell::RefCell;

use crate::tracker::{EntityManager, Track};
use crate::{Id, Writer};

/// A simple text logger to output messages to a Writer.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _track_ events will be written.
    writer: RefCell<Writer>,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: RefCell::new(writer),
        }
    }

    fn write_line(&self, line: String) {
        self.writer
            .borrow_mut()
            .write_all(line.as_bytes())
            .expect("track writer failed");
    }
}

/// Implementation for each [`Track`] event.
impl Track for TextTracker {
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
        self.write_line(format!("{enter_into}: enter {enter_obj}\n"));
    }

    fn exit(&self, exit_from: Id, exit_obj: Id) {
        self.write_line(format!("{exit_from}: exit {exit_obj}\n"));
    }

    fn create(&self, created_by: Id, created_obj: Id, name: &str) {
        self.write_line(format!("{created_by}: created {created_obj}, {name}\n"));
    }

    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id) {
        self.write_line(format!("{destroyed_by}: destroyed {destroyed_obj}\n"));
    }

    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(format!("{msg_by}:{level}: {msg}\n"));
    }

    fn time(&self, set_by: Id, time_ns: f64) {
        self.write_line(format!("{set_by}: set time to {time_ns:.1}ns\n"));
    }

    fn shutdown(&self) {
        self.writer
            .borrow_mut()
            .flush()
            .expect("track writer failed");
    }
}
