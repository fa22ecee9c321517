// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The `CollectiveAlgorithm` family.
//!
//! Each variant is a micro state machine driving one phase of a collective
//! on one node: given the phase's node set, message size and node id it
//! produces a sequence of send/receive calls until completion. The family
//! is open - backends or experiments can provide further implementations -
//! which is why this is the one place trait polymorphism is used rather
//! than a sealed enum.

pub mod direct;
pub mod halving_doubling;
pub mod nccl_flow;
pub mod ring;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tree;

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::comms::{Comms, Progress};
use crate::op::CollectiveOp;
use crate::topology::TopologyKind;

pub use direct::DirectAllToAll;
pub use halving_doubling::HalvingDoubling;
pub use nccl_flow::NcclFlowModel;
pub use ring::Ring;
pub use tree::DoubleBinaryTree;

/// One phase's state machine.
///
/// All callbacks receive the node's [`Comms`] context. When a callback
/// returns [`Progress::Done`] the owning stream advances past the phase and
/// the algorithm is dropped.
pub trait CollectiveAlgorithm {
    /// Start the phase: post initial receives and issue initial sends.
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError>;

    /// One of this algorithm's sends has left the node.
    fn on_send_done(
        &mut self,
        dst: NodeId,
        tag: u64,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError>;

    /// A message addressed to one of this algorithm's receives has arrived.
    fn on_recv(
        &mut self,
        src: NodeId,
        tag: u64,
        bytes: Bytes,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Which algorithm to instantiate for a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmKind {
    /// N-1 step ring.
    Ring,
    /// Recursive halving / doubling (power-of-two groups).
    HalvingDoubling,
    /// Two overlaid binary trees.
    DoubleBinaryTree,
    /// Direct pairwise exchange.
    Direct,
}

impl AlgorithmKind {
    /// Parse one component of a per-dimension implementation string such as
    /// `ring_doubleBinaryTree_direct`.
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "ring" => Ok(Self::Ring),
            "halvingDoubling" => Ok(Self::HalvingDoubling),
            "doubleBinaryTree" => Ok(Self::DoubleBinaryTree),
            "direct" => Ok(Self::Direct),
            _ => sim_error!("unknown collective implementation '{raw}'"),
        }
    }

    /// The logical topology this algorithm runs over.
    #[must_use]
    pub fn topology(self) -> TopologyKind {
        match self {
            Self::Ring => TopologyKind::Ring,
            Self::HalvingDoubling => TopologyKind::Ring,
            Self::DoubleBinaryTree => TopologyKind::DoubleBinaryTree,
            Self::Direct => TopologyKind::Direct,
        }
    }
}

/// Instantiate the state machine for one phase.
///
/// Falls back to [`Ring`] where a kind cannot serve the request: halving /
/// doubling needs a power-of-two group, and the double binary tree only
/// implements all-reduce semantics.
pub fn build_algorithm(
    kind: AlgorithmKind,
    op: CollectiveOp,
    node: NodeId,
    peers: &[NodeId],
    bytes: Bytes,
    window: usize,
) -> Box<dyn CollectiveAlgorithm> {
    match kind {
        AlgorithmKind::Ring => Box::new(Ring::new(op, node, peers, bytes)),
        AlgorithmKind::HalvingDoubling => {
            if peers.len().is_power_of_two() {
                Box::new(HalvingDoubling::new(op, node, peers, bytes))
            } else {
                Box::new(Ring::new(op, node, peers, bytes))
            }
        }
        AlgorithmKind::DoubleBinaryTree => {
            if op == CollectiveOp::AllReduce {
                Box::new(DoubleBinaryTree::new(node, peers, bytes))
            } else {
                Box::new(Ring::new(op, node, peers, bytes))
            }
        }
        AlgorithmKind::Direct => Box::new(DirectAllToAll::new(op, node, peers, bytes, window)),
    }
}

/// Split `bytes` evenly over `parts`, rounding up (never zero for non-zero
/// input).
#[must_use]
pub(crate) fn shard_bytes(bytes: Bytes, parts: usize) -> Bytes {
    debug_assert!(parts > 0);
    bytes.div_ceil(parts as Bytes).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_implementation_names() {
        assert_eq!(AlgorithmKind::parse("ring").unwrap(), AlgorithmKind::Ring);
        assert_eq!(
            AlgorithmKind::parse("doubleBinaryTree").unwrap(),
            AlgorithmKind::DoubleBinaryTree
        );
        assert!(AlgorithmKind::parse("butterfly").is_err());
    }

    #[test]
    fn halving_doubling_falls_back_to_ring() {
        let peers: Vec<NodeId> = (0..6).map(NodeId).collect();
        let alg = build_algorithm(
            AlgorithmKind::HalvingDoubling,
            CollectiveOp::AllReduce,
            NodeId(0),
            &peers,
            4096,
            0,
        );
        assert_eq!(alg.name(), "ring");
    }

    #[test]
    fn tree_serves_only_all_reduce() {
        let peers: Vec<NodeId> = (0..4).map(NodeId).collect();
        let alg = build_algorithm(
            AlgorithmKind::DoubleBinaryTree,
            CollectiveOp::AllGather,
            NodeId(0),
            &peers,
            4096,
            0,
        );
        assert_eq!(alg.name(), "ring");
    }
}
