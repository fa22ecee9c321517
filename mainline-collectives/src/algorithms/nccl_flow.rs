// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Executes a pre-planned DAG of flows from the
//! [`NcclFlowPlanner`](crate::planner::NcclFlowPlanner).
//!
//! Each node runs the same global plan and acts on the flows it sends or
//! receives. A flow fires once all of its parents have completed; a parent
//! is observed locally either as one of this node's own completed sends or
//! as a received message.
//!
//! All flows of a phase share the phase tag. Chained flows between one pair
//! of nodes are matched in plan order, which is exact because per-`(dst,
//! tag)` send order is preserved end to end.

use std::collections::{HashMap, VecDeque};

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::CollectiveAlgorithm;
use crate::comms::{Comms, Progress};
use crate::planner::{FlowId, FlowModel};

/// Flow-model state machine for one phase on one node.
pub struct NcclFlowModel {
    node: NodeId,
    plan: FlowModel,

    /// Children of each flow, restricted to flows this node sends.
    my_children: HashMap<FlowId, Vec<FlowId>>,
    /// Outstanding parent count for each of this node's sends.
    waiting: HashMap<FlowId, usize>,
    /// Incoming flows per source, in plan order.
    expected_from: HashMap<NodeId, VecDeque<FlowId>>,
    /// Fired sends per destination, in firing order.
    fired_to: HashMap<NodeId, VecDeque<FlowId>>,

    sends_total: usize,
    sends_done: usize,
    recvs_total: usize,
    recvs_done: usize,
}

impl NcclFlowModel {
    /// Build the local view of `plan` for `node`.
    #[must_use]
    pub fn new(node: NodeId, plan: FlowModel) -> Self {
        debug_assert!(plan.is_well_formed());
        let mut my_children: HashMap<FlowId, Vec<FlowId>> = HashMap::new();
        let mut waiting = HashMap::new();
        let mut expected_from: HashMap<NodeId, VecDeque<FlowId>> = HashMap::new();
        let mut sends_total = 0;
        let mut recvs_total = 0;

        for flow in &plan.flows {
            if flow.dst == node {
                recvs_total += 1;
                expected_from.entry(flow.src).or_default().push_back(flow.id);
            }
            if flow.src == node {
                sends_total += 1;
                waiting.insert(flow.id, flow.parents.len());
                for parent in &flow.parents {
                    my_children.entry(*parent).or_default().push(flow.id);
                }
            }
        }

        Self {
            node,
            plan,
            my_children,
            waiting,
            expected_from,
            fired_to: HashMap::new(),
            sends_total,
            sends_done: 0,
            recvs_total,
            recvs_done: 0,
        }
    }

    fn fire(&mut self, flow_id: FlowId, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let flow = &self.plan.flows[flow_id];
        debug_assert_eq!(flow.src, self.node);
        let tag = ctx.base_tag();
        if flow.reduce {
            ctx.mem_read(2 * flow.bytes);
            ctx.mem_write(flow.bytes);
            ctx.reduction();
        } else {
            ctx.mem_read(flow.bytes);
        }
        let dst = flow.dst;
        let bytes = flow.bytes;
        self.fired_to.entry(dst).or_default().push_back(flow_id);
        ctx.send(dst, bytes, tag)
    }

    /// A parent flow completed; fire any of this node's sends it unblocks.
    fn complete(&mut self, flow_id: FlowId, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let Some(children) = self.my_children.remove(&flow_id) else {
            return Ok(());
        };
        for child in children {
            let remaining = self
                .waiting
                .get_mut(&child)
                .expect("child is one of this node's sends");
            *remaining -= 1;
            if *remaining == 0 {
                self.fire(child, ctx)?;
            }
        }
        Ok(())
    }

    fn progress(&self) -> Progress {
        if self.sends_done == self.sends_total && self.recvs_done == self.recvs_total {
            Progress::Done
        } else {
            Progress::InFlight
        }
    }
}

impl CollectiveAlgorithm for NcclFlowModel {
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        let base = ctx.base_tag();
        for flow in &self.plan.flows {
            if flow.dst == self.node {
                ctx.recv(flow.src, flow.bytes, base)?;
            }
        }
        // Flow ids ascend in dependency order; keep the firing order stable.
        let mut ready: Vec<FlowId> = self
            .waiting
            .iter()
            .filter(|(_, remaining)| **remaining == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();
        for id in ready {
            self.fire(id, ctx)?;
        }
        Ok(self.progress())
    }

    fn on_send_done(
        &mut self,
        dst: NodeId,
        _tag: u64,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        let flow_id = match self.fired_to.get_mut(&dst).and_then(VecDeque::pop_front) {
            Some(id) => id,
            None => return sim_error!("flow model: no fired flow towards {dst}"),
        };
        self.sends_done += 1;
        self.complete(flow_id, ctx)?;
        Ok(self.progress())
    }

    fn on_recv(
        &mut self,
        src: NodeId,
        _tag: u64,
        _bytes: Bytes,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        let flow_id = match self.expected_from.get_mut(&src).and_then(VecDeque::pop_front) {
            Some(id) => id,
            None => return sim_error!("flow model: unexpected flow from {src}"),
        };
        let flow = &self.plan.flows[flow_id];
        if flow.reduce {
            ctx.mem_read(2 * flow.bytes);
            ctx.mem_write(flow.bytes);
            ctx.reduction();
        } else {
            ctx.mem_write(flow.bytes);
        }
        self.recvs_done += 1;
        self.complete(flow_id, ctx)?;
        Ok(self.progress())
    }

    fn name(&self) -> &'static str {
        "ncclFlowModel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::test_support::MockComms;
    use crate::op::{CollectiveOp, TrainingPhase};
    use crate::planner::NcclFlowPlanner;

    fn ranks(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId).collect()
    }

    #[test]
    fn ring_node_fires_chained_flows_in_order() {
        let planner = NcclFlowPlanner::new(1, false);
        let plan = planner.plan(
            CollectiveOp::AllGather,
            &ranks(3),
            3 << 20,
            TrainingPhase::Forward,
        );
        let mut alg = NcclFlowModel::new(NodeId(0), plan.clone());
        let mut ctx = MockComms::new(NodeId(0), 1000);

        assert_eq!(alg.run(&mut ctx).unwrap(), Progress::InFlight);
        // Two incoming flows posted, one unparented send fired.
        assert_eq!(ctx.recvs.len(), 2);
        assert_eq!(ctx.sends.len(), 1);

        // Completing the first send does not finish the phase.
        let first = ctx.sends[0];
        assert_eq!(
            alg.on_send_done(first.peer, first.tag, &mut ctx).unwrap(),
            Progress::InFlight
        );

        // Receiving the flow chained to my second send fires it.
        let from = ctx.recvs[0].peer;
        let sends_before = ctx.sends.len();
        let _ = alg.on_recv(from, 1000, ctx.recvs[0].bytes, &mut ctx).unwrap();
        assert!(ctx.sends.len() > sends_before);
    }

    #[test]
    fn nvls_switch_fans_out_after_fan_in() {
        let planner = NcclFlowPlanner::new(1, true);
        let plan = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(3),
            64 << 20,
            TrainingPhase::Forward,
        );
        let mut switch = NcclFlowModel::new(NodeId(0), plan);
        let mut ctx = MockComms::new(NodeId(0), 0);

        let _ = switch.run(&mut ctx).unwrap();
        // Fan-out waits for both fan-in flows.
        assert!(ctx.sends.is_empty());
        let _ = switch.on_recv(NodeId(1), 0, 1, &mut ctx).unwrap();
        assert!(ctx.sends.is_empty());
        let _ = switch.on_recv(NodeId(2), 0, 1, &mut ctx).unwrap();
        assert_eq!(ctx.sends.len(), 2);
    }

    #[test]
    fn unexpected_source_is_a_logic_error() {
        let planner = NcclFlowPlanner::new(1, false);
        let plan = planner.plan(
            CollectiveOp::AllGather,
            &ranks(3),
            3 << 20,
            TrainingPhase::Forward,
        );
        let mut alg = NcclFlowModel::new(NodeId(0), plan);
        let mut ctx = MockComms::new(NodeId(0), 0);
        let _ = alg.run(&mut ctx).unwrap();
        assert!(alg.on_recv(NodeId(0), 0, 1, &mut ctx).is_err());
    }
}
