// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! `MAINLINE` - the distributed-training simulation kernel.
//!
//! This library provides the core of the MAINLINE engine which executes
//! event-driven simulation of accelerator clusters. Work advances by draining
//! one tick of the [event queue](crate::events::EventQueue) at a time:
//! components never block, they register a follow-up event and return to the
//! kernel, which re-enters them at the scheduled tick.
//!
//! # Simple application
//!
//! A very simple application looks like:
//!
//! ```rust
//! use mainline_engine::engine::Engine;
//! use mainline_engine::events::{Event, EventQueue};
//! use mainline_engine::time::SimTime;
//! use mainline_engine::traits::Dispatch;
//! use mainline_engine::types::{NodeId, SimResult};
//! use mainline_track::tracker::dev_null_tracker;
//!
//! struct Counter(u64);
//!
//! impl Dispatch<u64> for Counter {
//!     fn dispatch(
//!         &mut self,
//!         event: Event<u64>,
//!         queue: &mut EventQueue<u64>,
//!         _time: &SimTime,
//!     ) -> SimResult {
//!         self.0 += event.kind;
//!         if event.kind < 4 {
//!             queue.register_event(event.target, event.kind + 1, 10);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let tracker = dev_null_tracker();
//! let mut engine = Engine::new(&tracker);
//! engine.queue.register_event(NodeId(0), 1u64, 0);
//! let mut counter = Counter(0);
//! engine.run(&mut counter).unwrap();
//! assert_eq!(counter.0, 1 + 2 + 3 + 4);
//! assert_eq!(engine.time.now_ns(), 30.0);
//! ```

pub mod engine;
pub mod events;
pub mod sync;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;
