// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Recursive halving / doubling.
//!
//! log2(N) exchange steps; at step `k` node `i` exchanges with
//! `i XOR mask_k`. The data halves each step during reduce-scatter and
//! doubles during all-gather. Requires a power-of-two group; the builder
//! falls back to the ring otherwise.

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::CollectiveAlgorithm;
use crate::comms::{Comms, Progress};
use crate::op::CollectiveOp;

struct Exchange {
    partner: NodeId,
    msg_bytes: Bytes,
    reduce: bool,
}

/// Halving/doubling state machine for one phase on one node.
pub struct HalvingDoubling {
    op: CollectiveOp,
    steps: Vec<Exchange>,
    step: usize,
    send_done: bool,
    recv_done: bool,
}

impl HalvingDoubling {
    /// Build the exchange schedule for `node` within `peers`.
    ///
    /// # Panics
    ///
    /// `peers.len()` must be a power of two.
    #[must_use]
    pub fn new(op: CollectiveOp, node: NodeId, peers: &[NodeId], bytes: Bytes) -> Self {
        let n = peers.len();
        assert!(n.is_power_of_two(), "halving/doubling needs 2^k nodes");
        let me = peers.iter().position(|p| *p == node).expect("node in group");
        let levels = n.trailing_zeros() as usize;

        let mut steps = Vec::new();
        // Reduce-scatter with recursive halving: start at distance N/2 and
        // halve both the distance and the payload.
        if matches!(op, CollectiveOp::AllReduce | CollectiveOp::ReduceScatter) {
            let mut msg = bytes;
            for level in (0..levels).rev() {
                msg = (msg / 2).max(1);
                steps.push(Exchange {
                    partner: peers[me ^ (1 << level)],
                    msg_bytes: msg,
                    reduce: true,
                });
            }
        }
        // All-gather with recursive doubling: start at distance 1 and double
        // both the distance and the payload.
        if matches!(op, CollectiveOp::AllReduce | CollectiveOp::AllGather) {
            let mut msg = bytes / n as Bytes;
            for level in 0..levels {
                msg = msg.max(1);
                steps.push(Exchange {
                    partner: peers[me ^ (1 << level)],
                    msg_bytes: msg,
                    reduce: false,
                });
                msg *= 2;
            }
        }
        // All-to-all has no halving/doubling structure; pairwise exchange of
        // equal shards at every distance covers it.
        if op == CollectiveOp::AllToAll {
            let shard = (bytes / n as Bytes).max(1);
            for level in 0..levels {
                steps.push(Exchange {
                    partner: peers[me ^ (1 << level)],
                    msg_bytes: shard * (1 << level),
                    reduce: false,
                });
            }
        }

        Self {
            op,
            steps,
            step: 0,
            send_done: false,
            recv_done: false,
        }
    }

    fn post_step(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        self.send_done = false;
        self.recv_done = false;
        let exchange = &self.steps[self.step];
        let tag = ctx.base_tag();
        ctx.recv(exchange.partner, exchange.msg_bytes, tag)?;
        ctx.send(exchange.partner, exchange.msg_bytes, tag)?;
        Ok(Progress::InFlight)
    }

    fn try_advance(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        if !(self.send_done && self.recv_done) {
            return Ok(Progress::InFlight);
        }
        self.step += 1;
        if self.step == self.steps.len() {
            return Ok(Progress::Done);
        }
        self.post_step(ctx)
    }
}

impl CollectiveAlgorithm for HalvingDoubling {
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        if self.steps.is_empty() {
            return Ok(Progress::Done);
        }
        self.post_step(ctx)
    }

    fn on_send_done(
        &mut self,
        dst: NodeId,
        _tag: u64,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        if dst != self.steps[self.step].partner {
            return sim_error!(
                "halving/doubling {}: send completion from unknown peer {dst}",
                self.op
            );
        }
        self.send_done = true;
        self.try_advance(ctx)
    }

    fn on_recv(
        &mut self,
        src: NodeId,
        _tag: u64,
        bytes: Bytes,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        let exchange = &self.steps[self.step];
        if src != exchange.partner {
            return sim_error!("halving/doubling {}: receive from unknown peer {src}", self.op);
        }
        if exchange.reduce {
            ctx.mem_read(2 * bytes);
            ctx.mem_write(bytes);
            ctx.reduction();
        } else {
            ctx.mem_read(bytes);
            ctx.mem_write(bytes);
        }
        self.recv_done = true;
        self.try_advance(ctx)
    }

    fn name(&self) -> &'static str {
        "halvingDoubling"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::test_support::MockComms;

    fn peers(n: usize) -> Vec<NodeId> {
        (0..n).map(NodeId).collect()
    }

    #[test]
    fn all_reduce_has_two_log_n_steps() {
        let group = peers(8);
        let mut alg = HalvingDoubling::new(CollectiveOp::AllReduce, NodeId(0), &group, 8192);
        let mut ctx = MockComms::new(NodeId(0), 3);

        assert_eq!(alg.run(&mut ctx).unwrap(), Progress::InFlight);
        let mut done = false;
        while !done {
            let partner = alg.steps[alg.step].partner;
            let msg = alg.steps[alg.step].msg_bytes;
            let _ = alg.on_send_done(partner, 3, &mut ctx).unwrap();
            done = alg.on_recv(partner, 3, msg, &mut ctx).unwrap() == Progress::Done;
        }
        assert_eq!(ctx.sends.len(), 6);
        // Halving: 4096, 2048, 1024; doubling: 1024, 2048, 4096.
        let sizes: Vec<u64> = ctx.sends.iter().map(|s| s.bytes).collect();
        assert_eq!(sizes, vec![4096, 2048, 1024, 1024, 2048, 4096]);
        assert_eq!(ctx.reductions, 3);
    }

    #[test]
    fn partners_are_xor_neighbours() {
        let group = peers(4);
        let alg = HalvingDoubling::new(CollectiveOp::ReduceScatter, NodeId(1), &group, 4096);
        let partners: Vec<NodeId> = alg.steps.iter().map(|s| s.partner).collect();
        // Distance N/2 first, then 1.
        assert_eq!(partners, vec![NodeId(3), NodeId(0)]);
    }
}
