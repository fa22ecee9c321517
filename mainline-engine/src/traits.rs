// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A set of common traits used across the MAINLINE engine.

use crate::events::{Event, EventQueue};
use crate::time::SimTime;
use crate::types::SimResult;

/// The model side of the kernel: receives each popped event.
///
/// A dispatcher routes the event to the addressed component and may register
/// follow-up events on the queue. Returning an error stops the simulation.
pub trait Dispatch<E> {
    /// Handle one event.
    fn dispatch(&mut self, event: Event<E>, queue: &mut EventQueue<E>, time: &SimTime)
    -> SimResult;
}
