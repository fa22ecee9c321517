// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A tracker that throws everything away.
//!
//! Ids must still be allocated so that entity identity works even when no
//! output is wanted.

use std::cell::Cell;

use crate::tracker::Track;
use crate::{Id, ROOT};

/// Tracker that suppresses all track events.
pub struct DevNullTracker {}

impl Track for DevNullTracker {
    fn unique_id(&self) -> Id {
        thread_local! {
            static NEXT: Cell<u64> = const { Cell::new(ROOT.0) };
        }
        NEXT.with(|next| {
            let id = Id(next.get());
            next.set(id.0 + 1);
            id
        })
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        false
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {}

    fn enter(&self, _enter_into: Id, _enter_obj: Id) {}

    fn exit(&self, _exit_from: Id, _exit_obj: Id) {}

    fn create(&self, _created_by: Id, _created_obj: Id, _name: &str) {}

    fn destroy(&self, _destroyed_by: Id, _destroyed_obj: Id) {}

    fn log(&self, _msg_by: Id, _level: log::Level, _msg: std::fmt::Arguments) {}

    fn time(&self, _set_by: Id, _time_ns: f64) {}

    fn shutdown(&self) {}
}
