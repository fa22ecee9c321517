// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use mainline_engine::engine::Engine;
use mainline_engine::events::{Event, EventQueue};
use mainline_engine::sim_error;
use mainline_engine::test_helpers::quiet_engine;
use mainline_engine::time::SimTime;
use mainline_engine::traits::Dispatch;
use mainline_engine::types::{NodeId, SimResult};

#[derive(Debug, PartialEq)]
enum Kind {
    Ping,
    Pong,
    Fail,
}

#[derive(Default)]
struct Recorder {
    seen: Vec<(u64, usize, &'static str)>,
}

impl Dispatch<Kind> for Recorder {
    fn dispatch(
        &mut self,
        event: Event<Kind>,
        queue: &mut EventQueue<Kind>,
        _time: &SimTime,
    ) -> SimResult {
        match event.kind {
            Kind::Ping => {
                self.seen.push((event.tick, event.target.0, "ping"));
                queue.register_event(event.target, Kind::Pong, 5);
                Ok(())
            }
            Kind::Pong => {
                self.seen.push((event.tick, event.target.0, "pong"));
                Ok(())
            }
            Kind::Fail => sim_error!("dispatch failed at {}", event.tick),
        }
    }
}

#[test]
fn runs_until_drained() {
    let mut engine: Engine<Kind> = quiet_engine();
    engine.queue.register_event(NodeId(0), Kind::Ping, 10);
    engine.queue.register_event(NodeId(1), Kind::Ping, 10);

    let mut recorder = Recorder::default();
    engine.run(&mut recorder).unwrap();

    assert_eq!(
        recorder.seen,
        vec![
            (10, 0, "ping"),
            (10, 1, "ping"),
            (15, 0, "pong"),
            (15, 1, "pong"),
        ]
    );
    assert_eq!(engine.time.now(), 15);
    assert!(engine.queue.is_empty());
}

#[test]
fn error_stops_the_run() {
    let mut engine: Engine<Kind> = quiet_engine();
    engine.queue.register_event(NodeId(0), Kind::Fail, 3);
    engine.queue.register_event(NodeId(0), Kind::Ping, 100);

    let mut recorder = Recorder::default();
    let err = engine.run(&mut recorder).unwrap_err();
    assert_eq!(format!("{err}"), "Error: dispatch failed at 3");

    // The later event is still queued: nothing past the failure dispatched.
    assert_eq!(engine.queue.len(), 1);
    assert!(recorder.seen.is_empty());
}

#[test]
fn time_tracks_the_queue() {
    let mut engine: Engine<Kind> = quiet_engine();
    engine.queue.register_event(NodeId(0), Kind::Ping, 7);
    let mut recorder = Recorder::default();
    engine.run(&mut recorder).unwrap();
    assert_eq!(engine.time.now_ns(), 12.0);
}
