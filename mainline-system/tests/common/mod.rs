// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Shared scaffolding for the system-level tests.

use std::rc::Rc;

use mainline_collectives::op::{CollectiveOp, TrainingPhase};
use mainline_collectives::topology::TopologyMap;
use mainline_engine::engine::Engine;
use mainline_engine::events::EventQueue;
use mainline_engine::test_helpers::quiet_engine;
use mainline_engine::time::SimTime;
use mainline_engine::types::SimResult;
use mainline_system::cluster::{Cluster, SysEvent, WorkloadDriver};
use mainline_system::config::SystemConfig;
use mainline_system::net::{AnalyticalNetwork, LogGpParams};
use mainline_system::node::{CollectiveRequest, Node};
use mainline_system::stream::{BatchId, PriorityPolicy};

/// A driver that issues one collective at start-up and waits for it.
pub struct OneShot {
    pub op: CollectiveOp,
    pub bytes: u64,
    pub issued: bool,
    pub done: bool,
}

impl OneShot {
    pub fn new(op: CollectiveOp, bytes: u64) -> Self {
        Self {
            op,
            bytes,
            issued: false,
            done: false,
        }
    }
}

impl WorkloadDriver for OneShot {
    fn tick(
        &mut self,
        node: &mut Node,
        queue: &mut EventQueue<SysEvent>,
        _time: &SimTime,
    ) -> SimResult {
        if !self.issued {
            self.issued = true;
            node.generate_collective(
                CollectiveRequest {
                    op: self.op,
                    bytes: self.bytes,
                    involved: vec![true; node.topo.num_dims()],
                    policy: PriorityPolicy::None,
                    phase: TrainingPhase::WeightGrad,
                    notify: None,
                },
                queue,
            )?;
        }
        Ok(())
    }

    fn batch_done(
        &mut self,
        node: &mut Node,
        batch: BatchId,
        _queue: &mut EventQueue<SysEvent>,
        _time: &SimTime,
    ) -> SimResult {
        let batch = node.take_batch(batch)?;
        assert!(batch.complete());
        self.done = true;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.done
    }
}

/// Build an engine plus a cluster of one-shot drivers over `dims`.
pub fn one_shot_cluster(
    dims: &[usize],
    cfg: SystemConfig,
    op: CollectiveOp,
    bytes: u64,
) -> (Engine<SysEvent>, Cluster<OneShot>) {
    let engine: Engine<SysEvent> = quiet_engine();
    let topo = TopologyMap::with_kinds(dims.to_vec(), cfg.impls.topology_kinds()).unwrap();
    let cfg = Rc::new(cfg);
    let net = AnalyticalNetwork::new(dims.to_vec(), Vec::new(), LogGpParams::default());
    let drivers = (0..topo.total_nodes())
        .map(|_| OneShot::new(op, bytes))
        .collect();
    let cluster = Cluster::new(engine.top(), &topo, &cfg, Box::new(net), drivers).unwrap();
    (engine, cluster)
}
