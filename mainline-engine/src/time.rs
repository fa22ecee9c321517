// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! This module represents the time during a simulation.
//!
//! The kernel counts in cycles; `SimTime` owns the conversion between cycles
//! and wall-clock nanoseconds. The network backend is the time authority for
//! anything it reports, and converts through the same fixed clock period.

use std::cell::Cell;
use std::rc::Rc;

use mainline_track::entity::Entity;
use mainline_track::set_time;

use crate::types::{Cycles, Tick};

/// The default clock period: 1 GHz, so one cycle is one nanosecond.
pub const DEFAULT_CLOCK_PERIOD_NS: f64 = 1.0;

/// The overall owner of time within a simulation.
pub struct SimTime {
    entity: Rc<Entity>,

    clock_period_ns: f64,

    current_tick: Cell<Tick>,
}

impl SimTime {
    /// Create time for a simulation with the default 1 GHz clock.
    #[must_use]
    pub fn new(parent: &Rc<Entity>) -> Self {
        Self::with_period(parent, DEFAULT_CLOCK_PERIOD_NS)
    }

    /// Create time with an explicit clock period in ns per cycle.
    #[must_use]
    pub fn with_period(parent: &Rc<Entity>, clock_period_ns: f64) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "time")),
            clock_period_ns,
            current_tick: Cell::new(0),
        }
    }

    /// The clock period in ns per cycle.
    #[must_use]
    pub fn clock_period_ns(&self) -> f64 {
        self.clock_period_ns
    }

    /// Advance to the given tick.
    pub fn advance_to(&self, tick: Tick) {
        if tick != self.current_tick.get() {
            assert!(tick >= self.current_tick.get(), "Time moving backwards");
            self.current_tick.set(tick);
            set_time!(self.entity ; self.to_ns(tick));
        }
    }

    /// The current tick.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.current_tick.get()
    }

    /// The current time in `ns`.
    #[must_use]
    pub fn now_ns(&self) -> f64 {
        self.to_ns(self.current_tick.get())
    }

    /// Convert a tick count to a time in `ns`.
    #[must_use]
    pub fn to_ns(&self, tick: Tick) -> f64 {
        tick as f64 * self.clock_period_ns
    }

    /// Convert a duration in `ns` to cycles, rounding up.
    #[must_use]
    pub fn ns_to_cycles(&self, ns: f64) -> Cycles {
        (ns / self.clock_period_ns).ceil() as Cycles
    }
}

#[cfg(test)]
mod tests {
    use mainline_track::entity::toplevel;
    use mainline_track::tracker::dev_null_tracker;

    use super::*;

    #[test]
    fn convert_to_ns() {
        let tracker = dev_null_tracker();
        let top = toplevel(&tracker, "top");

        let time = SimTime::new(&top);
        assert_eq!(time.to_ns(1), 1.0);

        let slow = SimTime::with_period(&top, 2.0);
        assert_eq!(slow.to_ns(1000), 2000.0);
        assert_eq!(slow.ns_to_cycles(3.0), 2);
    }

    #[test]
    #[should_panic(expected = "Time moving backwards")]
    fn no_time_travel() {
        let tracker = dev_null_tracker();
        let top = toplevel(&tracker, "top");
        let time = SimTime::new(&top);
        time.advance_to(10);
        time.advance_to(9);
    }
}
