// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The ring algorithm.
//!
//! For all-reduce the ring runs N-1 reduce-scatter steps followed by N-1
//! all-gather steps; all-gather and reduce-scatter run only their half. In
//! step `k` node `i` sends shard `(i - k) mod N` to `(i + 1) mod N` and
//! receives from `(i - 1) mod N`; every step moves `bytes / N`.

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::{CollectiveAlgorithm, shard_bytes};
use crate::comms::{Comms, Progress};
use crate::op::CollectiveOp;

/// Ring state machine for one phase on one node.
pub struct Ring {
    op: CollectiveOp,
    prev: NodeId,
    next: NodeId,
    msg_bytes: Bytes,
    reduce_steps: usize,
    total_steps: usize,
    step: usize,
    send_done: bool,
    recv_done: bool,
}

impl Ring {
    /// Build the ring for `node` within the ordered `peers` group.
    #[must_use]
    pub fn new(op: CollectiveOp, node: NodeId, peers: &[NodeId], bytes: Bytes) -> Self {
        let n = peers.len();
        let me = peers.iter().position(|p| *p == node).expect("node in group");
        let prev = peers[(me + n - 1) % n];
        let next = peers[(me + 1) % n];

        let (reduce_steps, total_steps) = match op {
            CollectiveOp::AllReduce => (n - 1, 2 * (n - 1)),
            CollectiveOp::ReduceScatter => (n - 1, n - 1),
            CollectiveOp::AllGather | CollectiveOp::AllToAll => (0, n - 1),
        };

        Self {
            op,
            prev,
            next,
            msg_bytes: shard_bytes(bytes, n),
            reduce_steps,
            total_steps,
            step: 0,
            send_done: false,
            recv_done: false,
        }
    }

    fn post_step(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        self.send_done = false;
        self.recv_done = false;
        let tag = ctx.base_tag();
        ctx.recv(self.prev, self.msg_bytes, tag)?;
        ctx.send(self.next, self.msg_bytes, tag)?;
        Ok(Progress::InFlight)
    }

    fn try_advance(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        if !(self.send_done && self.recv_done) {
            return Ok(Progress::InFlight);
        }
        self.step += 1;
        if self.step == self.total_steps {
            return Ok(Progress::Done);
        }
        self.post_step(ctx)
    }
}

impl CollectiveAlgorithm for Ring {
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        if self.total_steps == 0 {
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
        if dst != self.next {
            return sim_error!("ring {}: send completion from unknown peer {dst}", self.op);
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
        if src != self.prev {
            return sim_error!("ring {}: receive from unknown peer {src}", self.op);
        }
        if self.step < self.reduce_steps {
            // Combine the incoming shard with the local one.
            ctx.mem_read(2 * bytes);
            ctx.mem_write(bytes);
            ctx.reduction();
        } else {
            // Gather step: store the incoming shard.
            ctx.mem_read(bytes);
            ctx.mem_write(bytes);
        }
        self.recv_done = true;
        self.try_advance(ctx)
    }

    fn name(&self) -> &'static str {
        "ring"
    }
}
