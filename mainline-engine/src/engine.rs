// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use mainline_track::Tracker;
use mainline_track::entity::{Entity, toplevel};
use mainline_track::tracker::stdout_tracker;

use crate::events::EventQueue;
use crate::time::SimTime;
use crate::traits::Dispatch;
use crate::types::SimResult;

/// The engine owns the event queue and the simulation time and drives a
/// [`Dispatch`] implementation until the queue drains or an error occurs.
pub struct Engine<E> {
    /// The pending-event queue.
    pub queue: EventQueue<E>,

    /// Simulation time in cycles with ns conversion.
    pub time: SimTime,

    toplevel: Rc<Entity>,
    tracker: Tracker,
}

impl<E> Engine<E> {
    /// Create a standalone engine.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let time = SimTime::new(&toplevel);
        Self {
            queue: EventQueue::new(),
            time,
            toplevel,
            tracker: tracker.clone(),
        }
    }

    /// Create an engine with an explicit clock period in ns per cycle.
    pub fn with_period(tracker: &Tracker, clock_period_ns: f64) -> Self {
        let toplevel = toplevel(tracker, "top");
        let time = SimTime::with_period(&toplevel, clock_period_ns);
        Self {
            queue: EventQueue::new(),
            time,
            toplevel,
            tracker: tracker.clone(),
        }
    }

    /// Drain the event queue, dispatching every event to `sink`.
    ///
    /// Returns when the queue is empty or the first time `sink` reports an
    /// error.
    pub fn run<D: Dispatch<E>>(&mut self, sink: &mut D) -> SimResult {
        while self.step(sink)? {}
        self.tracker.shutdown();
        Ok(())
    }

    /// Dispatch a single event. Returns `false` once the queue is empty.
    pub fn step<D: Dispatch<E>>(&mut self, sink: &mut D) -> Result<bool, crate::types::SimError> {
        match self.queue.pop() {
            Some(event) => {
                self.time.advance_to(event.tick);
                sink.dispatch(event, &mut self.queue, &self.time)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The top-level entity of this simulation.
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    /// The tracker this engine sends track events to.
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends track events to stdout.
///
/// This is provided to keep documentation examples simple with fewer
/// concepts to have to consider at once.
impl<E> Default for Engine<E> {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Info);
        Self::new(&tracker)
    }
}
