// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Exact send/recv plans for the NCCL-accurate mode.
//!
//! The planner turns a logical operation over a set of ranks into a
//! directed acyclic graph of [`SingleFlow`]s. A flow becomes eligible only
//! when all of its parents have completed; every flow terminates, and given
//! the same inputs the plan is byte-identical.

use mainline_engine::types::{Bytes, NodeId};

use crate::op::{CollectiveOp, TrainingPhase};

/// Index of a flow within its [`FlowModel`].
pub type FlowId = usize;

/// One point-to-point transfer within a flow plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleFlow {
    /// Position in the owning plan.
    pub id: FlowId,
    /// Sender.
    pub src: NodeId,
    /// Receiver.
    pub dst: NodeId,
    /// Payload size.
    pub bytes: Bytes,
    /// Flows that must complete before this one may start.
    pub parents: Vec<FlowId>,
    /// NCCL channel the flow belongs to.
    pub channel: usize,
    /// Whether the receiver folds the payload into its local buffer.
    pub reduce: bool,
}

/// Which NCCL algorithm a plan models.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NcclVariant {
    /// Per-channel rings of chained chunks.
    Ring,
    /// Reduce up / broadcast down a balanced binary tree.
    Tree,
    /// Single-hop fan-in/fan-out through a switch rank.
    Nvls,
}

/// A complete flow plan for one phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowModel {
    /// The variant the plan models.
    pub variant: NcclVariant,
    /// All flows, indexed by [`FlowId`].
    pub flows: Vec<SingleFlow>,
}

impl FlowModel {
    /// Check the plan is acyclic and every parent reference is in range.
    ///
    /// Plans are generated in dependency order (parents always have smaller
    /// ids), which makes this a cheap linear scan.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.flows
            .iter()
            .enumerate()
            .all(|(id, flow)| flow.id == id && flow.parents.iter().all(|p| *p < id))
    }
}

/// Message-size thresholds for picking the variant, in bytes.
const TREE_MAX_BYTES: Bytes = 1 << 20;
const NVLS_MIN_BYTES: Bytes = 16 << 20;

/// Produces exact flow plans for the NCCL-accurate mode.
#[derive(Clone, Debug)]
pub struct NcclFlowPlanner {
    /// Number of channels rings and trees are striped over.
    pub channels: usize,
    /// Whether the NVLS variant may be chosen.
    pub nvls_enabled: bool,
}

impl NcclFlowPlanner {
    /// A planner with `channels` channels.
    #[must_use]
    pub fn new(channels: usize, nvls_enabled: bool) -> Self {
        Self {
            channels: channels.max(1),
            nvls_enabled,
        }
    }

    /// Pick the variant for a message.
    ///
    /// Small messages take the latency-optimal tree, large all-reduces take
    /// NVLS when available, everything else rides the rings. Weight-gradient
    /// traffic is bandwidth-bound, so the tree window shrinks for it.
    #[must_use]
    pub fn variant_for(&self, op: CollectiveOp, bytes: Bytes, phase: TrainingPhase) -> NcclVariant {
        let tree_max = match phase {
            TrainingPhase::WeightGrad => TREE_MAX_BYTES / 4,
            _ => TREE_MAX_BYTES,
        };
        if op == CollectiveOp::AllReduce {
            if self.nvls_enabled && bytes >= NVLS_MIN_BYTES {
                return NcclVariant::Nvls;
            }
            if bytes < tree_max {
                return NcclVariant::Tree;
            }
        }
        NcclVariant::Ring
    }

    /// Emit the plan for one phase.
    #[must_use]
    pub fn plan(
        &self,
        op: CollectiveOp,
        ranks: &[NodeId],
        bytes: Bytes,
        phase: TrainingPhase,
    ) -> FlowModel {
        let variant = self.variant_for(op, bytes, phase);
        let flows = match variant {
            NcclVariant::Ring => self.plan_ring(op, ranks, bytes),
            NcclVariant::Tree => self.plan_tree(ranks, bytes),
            NcclVariant::Nvls => self.plan_nvls(ranks, bytes),
        };
        let model = FlowModel { variant, flows };
        debug_assert!(model.is_well_formed());
        model
    }

    /// Per-channel ring.
    ///
    /// For all-reduce each channel carries `2(N-1)` chained steps per rank:
    /// `N-1` reducing, then `N-1` gathering. A step's parents are the
    /// previous step arriving at its sender on the same channel, plus the
    /// previous channel's terminal chunk (channels drain in order).
    fn plan_ring(&self, op: CollectiveOp, ranks: &[NodeId], bytes: Bytes) -> Vec<SingleFlow> {
        let n = ranks.len();
        let mut flows = Vec::new();
        if n < 2 {
            return flows;
        }
        let steps = match op {
            CollectiveOp::AllReduce => 2 * (n - 1),
            _ => n - 1,
        };
        let reduce_steps = match op {
            CollectiveOp::AllReduce | CollectiveOp::ReduceScatter => n - 1,
            _ => 0,
        };
        let chunk = bytes.div_ceil((self.channels * n) as Bytes).max(1);

        let mut prev_channel_last: Vec<FlowId> = Vec::new();
        for channel in 0..self.channels {
            // A distinct rotation per channel spreads the load.
            let ring: Vec<NodeId> = (0..n).map(|i| ranks[(i + channel) % n]).collect();
            // step_flows[r] is the id of the flow rank index r sent last step.
            let mut step_flows: Vec<Option<FlowId>> = vec![None; n];
            let mut this_channel_last = Vec::new();
            for step in 0..steps {
                let mut next_flows = vec![None; n];
                for r in 0..n {
                    let id = flows.len();
                    let mut parents = Vec::new();
                    // The chunk I forward this step arrived from my ring
                    // predecessor last step.
                    if step > 0 {
                        if let Some(parent) = step_flows[(r + n - 1) % n] {
                            parents.push(parent);
                        }
                    } else {
                        parents.extend(prev_channel_last.iter().copied());
                    }
                    flows.push(SingleFlow {
                        id,
                        src: ring[r],
                        dst: ring[(r + 1) % n],
                        bytes: chunk,
                        parents,
                        channel,
                        reduce: step < reduce_steps,
                    });
                    next_flows[r] = Some(id);
                    if step == steps - 1 {
                        this_channel_last.push(id);
                    }
                }
                step_flows = next_flows;
            }
            prev_channel_last = this_channel_last;
        }
        flows
    }

    /// Balanced binary tree: reduce up, then broadcast down.
    fn plan_tree(&self, ranks: &[NodeId], bytes: Bytes) -> Vec<SingleFlow> {
        let n = ranks.len();
        let mut flows = Vec::new();
        if n < 2 {
            return flows;
        }
        let chunk = bytes.div_ceil(self.channels as Bytes).max(1);

        for channel in 0..self.channels {
            // up_flow[i] is the id of rank i's send towards the root.
            let mut up_flow: Vec<Option<FlowId>> = vec![None; n];
            // Children have larger indices than their parents, so walking
            // the ranks in reverse builds the up phase bottom-up.
            for i in (1..n).rev() {
                let id = flows.len();
                let mut parents = Vec::new();
                for child in [2 * i + 1, 2 * i + 2] {
                    if child < n {
                        parents.push(up_flow[child].expect("children planned first"));
                    }
                }
                flows.push(SingleFlow {
                    id,
                    src: ranks[i],
                    dst: ranks[(i - 1) / 2],
                    bytes: chunk,
                    parents,
                    channel,
                    reduce: true,
                });
                up_flow[i] = Some(id);
            }
            let root_parents: Vec<FlowId> = [1, 2]
                .iter()
                .filter(|c| **c < n)
                .map(|c| up_flow[*c].unwrap())
                .collect();

            // Down phase: parents send to children, gated on their own
            // incoming down flow (or the completed reduction at the root).
            let mut down_flow: Vec<Option<FlowId>> = vec![None; n];
            for i in 0..n {
                for child in [2 * i + 1, 2 * i + 2] {
                    if child >= n {
                        continue;
                    }
                    let id = flows.len();
                    let parents = match down_flow[i] {
                        Some(parent) => vec![parent],
                        None => root_parents.clone(),
                    };
                    flows.push(SingleFlow {
                        id,
                        src: ranks[i],
                        dst: ranks[child],
                        bytes: chunk,
                        parents,
                        channel,
                        reduce: false,
                    });
                    down_flow[child] = Some(id);
                }
            }
        }
        flows
    }

    /// Single-hop fan-in to a switch rank and fan-out back.
    fn plan_nvls(&self, ranks: &[NodeId], bytes: Bytes) -> Vec<SingleFlow> {
        let n = ranks.len();
        let mut flows = Vec::new();
        if n < 2 {
            return flows;
        }
        let switch = ranks[0];
        let chunk = bytes.div_ceil(self.channels as Bytes).max(1);

        for channel in 0..self.channels {
            let fan_in: Vec<FlowId> = ranks[1..]
                .iter()
                .map(|rank| {
                    let id = flows.len();
                    flows.push(SingleFlow {
                        id,
                        src: *rank,
                        dst: switch,
                        bytes: chunk,
                        parents: Vec::new(),
                        channel,
                        reduce: true,
                    });
                    id
                })
                .collect();
            for rank in &ranks[1..] {
                let id = flows.len();
                flows.push(SingleFlow {
                    id,
                    src: switch,
                    dst: *rank,
                    bytes: chunk,
                    parents: fan_in.clone(),
                    channel,
                    reduce: false,
                });
            }
        }
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId).collect()
    }

    #[test]
    fn plans_are_deterministic() {
        let planner = NcclFlowPlanner::new(2, false);
        let a = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(4),
            8 << 20,
            TrainingPhase::WeightGrad,
        );
        let b = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(4),
            8 << 20,
            TrainingPhase::WeightGrad,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn variant_picked_by_size() {
        let planner = NcclFlowPlanner::new(1, true);
        assert_eq!(
            planner.variant_for(CollectiveOp::AllReduce, 4096, TrainingPhase::Forward),
            NcclVariant::Tree
        );
        assert_eq!(
            planner.variant_for(CollectiveOp::AllReduce, 8 << 20, TrainingPhase::Forward),
            NcclVariant::Ring
        );
        assert_eq!(
            planner.variant_for(CollectiveOp::AllReduce, 64 << 20, TrainingPhase::Forward),
            NcclVariant::Nvls
        );
        // Non-all-reduce always rides the rings.
        assert_eq!(
            planner.variant_for(CollectiveOp::AllGather, 4096, TrainingPhase::Forward),
            NcclVariant::Ring
        );
    }

    #[test]
    fn ring_chains_steps_per_rank() {
        let planner = NcclFlowPlanner::new(1, false);
        let plan = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(4),
            4 << 20,
            TrainingPhase::WeightGrad,
        );
        assert!(plan.is_well_formed());
        // 2(N-1) steps of N flows each.
        assert_eq!(plan.flows.len(), 6 * 4);
        // Step-0 flows have no parents; every later flow has exactly one.
        assert_eq!(plan.flows.iter().filter(|f| f.parents.is_empty()).count(), 4);
        // Reduce on the first half of the steps.
        assert_eq!(plan.flows.iter().filter(|f| f.reduce).count(), 3 * 4);
    }

    #[test]
    fn cross_channel_serialization() {
        let planner = NcclFlowPlanner::new(2, false);
        let plan = planner.plan(
            CollectiveOp::AllGather,
            &ranks(3),
            4 << 20,
            TrainingPhase::Forward,
        );
        assert!(plan.is_well_formed());
        // Channel 1's first step depends on channel 0's terminal chunks.
        let first_of_second: Vec<&SingleFlow> = plan
            .flows
            .iter()
            .filter(|f| f.channel == 1 && !f.parents.is_empty())
            .collect();
        assert!(!first_of_second.is_empty());
        for flow in first_of_second {
            for parent in &flow.parents {
                assert_eq!(plan.flows[*parent].channel, 0);
            }
        }
    }

    #[test]
    fn tree_reduces_up_then_broadcasts_down() {
        let planner = NcclFlowPlanner::new(1, false);
        let plan = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(4),
            4096,
            TrainingPhase::Forward,
        );
        assert_eq!(plan.variant, NcclVariant::Tree);
        assert!(plan.is_well_formed());
        // N-1 up flows and N-1 down flows.
        assert_eq!(plan.flows.len(), 6);
        assert_eq!(plan.flows.iter().filter(|f| f.reduce).count(), 3);
    }

    #[test]
    fn nvls_is_single_hop() {
        let planner = NcclFlowPlanner::new(1, true);
        let plan = planner.plan(
            CollectiveOp::AllReduce,
            &ranks(4),
            64 << 20,
            TrainingPhase::Forward,
        );
        assert_eq!(plan.variant, NcclVariant::Nvls);
        // 3 fan-in + 3 fan-out.
        assert_eq!(plan.flows.len(), 6);
        let switch = NodeId(0);
        assert!(plan.flows.iter().all(|f| f.src == switch || f.dst == switch));
    }
}
