// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The cluster: node arena, event routing and the workload seam.
//!
//! All cross-component references are ids: events carry a [`NodeId`] and
//! the cluster routes them to the addressed node or its workload driver.
//! Nodes and drivers live in parallel arenas, which keeps the node free of
//! any back-reference to the workload that drives it.

use std::rc::Rc;

use mainline_collectives::topology::TopologyMap;
use mainline_engine::events::{Event, EventQueue};
use mainline_engine::sim_error;
use mainline_engine::sync::CriticalSection;
use mainline_engine::time::SimTime;
use mainline_engine::traits::Dispatch;
use mainline_engine::types::{Bytes, NodeId, SimError, SimResult};
use mainline_track::entity::Entity;
use mainline_track::info;

use crate::config::SystemConfig;
use crate::net::NetworkBackend;
use crate::node::Node;
use crate::stream::{BatchId, StreamId};

/// Events routed through the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysEvent {
    /// A compute delay expired; re-enter the node's workload.
    WorkloadWait,
    /// Run the first callback of a freshly admitted stream.
    StreamInit {
        /// The admitted stream.
        stream: StreamId,
    },
    /// A send on `(dst, tag)` has left the node this event targets.
    PacketSent {
        /// Destination of the completed send.
        dst: NodeId,
        /// Wire tag of the completed send.
        tag: u64,
    },
    /// A message has arrived at the node this event targets.
    PacketReceived {
        /// The sender.
        src: NodeId,
        /// Wire tag.
        tag: u64,
        /// Payload size.
        bytes: Bytes,
    },
    /// Every chunk of a batch has finished.
    BatchDone {
        /// The completed batch.
        batch: BatchId,
    },
}

/// What drives a node through a training run.
///
/// Implemented by the workload finite-state machine; the seam keeps this
/// crate free of any dependency on the workload format.
pub trait WorkloadDriver {
    /// Re-enter the driver (first entry, or a compute delay expired).
    fn tick(
        &mut self,
        node: &mut Node,
        queue: &mut EventQueue<SysEvent>,
        time: &SimTime,
    ) -> SimResult;

    /// A collective batch issued by this driver completed.
    fn batch_done(
        &mut self,
        node: &mut Node,
        batch: BatchId,
        queue: &mut EventQueue<SysEvent>,
        time: &SimTime,
    ) -> SimResult;

    /// Whether the driver has run its workload to completion.
    fn finished(&self) -> bool;
}

/// The cluster of nodes and their drivers.
pub struct Cluster<D> {
    /// Track entity for logging.
    pub entity: Rc<Entity>,

    nodes: Vec<Node>,
    drivers: Vec<D>,
    net: Box<dyn NetworkBackend>,
    critical: CriticalSection,
}

impl<D: WorkloadDriver> Cluster<D> {
    /// Build a cluster with one node and one driver per accelerator.
    pub fn new(
        parent: &Rc<Entity>,
        topo: &TopologyMap,
        cfg: &Rc<SystemConfig>,
        net: Box<dyn NetworkBackend>,
        drivers: Vec<D>,
    ) -> Result<Self, SimError> {
        let total = topo.total_nodes();
        if drivers.len() != total {
            return sim_error!("{} drivers for {total} nodes", drivers.len());
        }
        let entity = Rc::new(Entity::new(parent, "cluster"));
        let nodes = (0..total)
            .map(|n| Node::new(&entity, NodeId(n), topo.clone(), cfg.clone()))
            .collect();
        Ok(Self {
            entity,
            nodes,
            drivers,
            net,
            critical: CriticalSection::new(),
        })
    }

    /// Split a dimension on every node so that the leading dimensions cover
    /// groups of `target`, and tell the backend. One-shot, during
    /// initialisation.
    pub fn break_dimension(&mut self, target: usize) -> SimResult {
        let before = self.nodes[0].topo.dims().to_vec();
        for node in &mut self.nodes {
            node.break_dimension(target)?;
        }
        let after = self.nodes[0].topo.dims();
        if after.len() != before.len() {
            let split_at = before
                .iter()
                .zip(after.iter())
                .position(|(a, b)| a != b)
                .unwrap_or(before.len() - 1);
            self.net.dims_changed(after, split_at);
            info!(self.entity ; "dimensions now {after:?} (split at {split_at})");
        }
        Ok(())
    }

    /// Kick every node's workload at tick zero.
    pub fn start(&mut self, queue: &mut EventQueue<SysEvent>) {
        for node in &self.nodes {
            queue.register_event(node.id, SysEvent::WorkloadWait, 0);
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// A node, by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// A node, by id.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// A driver, by node id.
    #[must_use]
    pub fn driver(&self, id: NodeId) -> &D {
        &self.drivers[id.0]
    }

    /// Every driver, in node order.
    #[must_use]
    pub fn drivers(&self) -> &[D] {
        &self.drivers
    }

    /// Verify the run converged: every driver finished and every stream
    /// that was injected also finished.
    ///
    /// Called after the event queue drains; a mismatch here is the
    /// simulator's hang report.
    pub fn check_finished(&self) -> SimResult {
        for (node, driver) in self.nodes.iter().zip(self.drivers.iter()) {
            if !driver.finished() {
                return sim_error!("{}: workload did not run to completion", node.id);
            }
            if node.streams_injected != node.streams_finished {
                return sim_error!(
                    "{}: {} streams injected but {} finished",
                    node.id,
                    node.streams_injected,
                    node.streams_finished
                );
            }
        }
        Ok(())
    }

    /// Close per-dimension busy intervals at the end of the run.
    pub fn finalize_stats(&mut self, now: mainline_engine::types::Tick) {
        for node in &mut self.nodes {
            node.scheduler.finalize_stats(now);
        }
    }
}

impl<D: WorkloadDriver> Dispatch<SysEvent> for Cluster<D> {
    fn dispatch(
        &mut self,
        event: Event<SysEvent>,
        queue: &mut EventQueue<SysEvent>,
        time: &SimTime,
    ) -> SimResult {
        // Single-threaded backends never contend here; threaded ones must
        // hold the critical section over shared kernel structures.
        let _guard = self.critical.enter();

        let n = event.target.0;
        if n >= self.nodes.len() {
            return sim_error!("event for unknown node {}", event.target);
        }
        match event.kind {
            SysEvent::WorkloadWait => self.drivers[n].tick(&mut self.nodes[n], queue, time),
            SysEvent::StreamInit { stream } => {
                self.nodes[n].on_stream_init(stream, self.net.as_mut(), queue)
            }
            SysEvent::PacketSent { dst, tag } => {
                self.nodes[n].on_packet_sent(dst, tag, self.net.as_mut(), queue)
            }
            SysEvent::PacketReceived { src, tag, bytes } => {
                self.nodes[n].on_packet_received(src, tag, bytes, self.net.as_mut(), queue)
            }
            SysEvent::BatchDone { batch } => {
                self.drivers[n].batch_done(&mut self.nodes[n], batch, queue, time)
            }
        }
    }
}
