// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Direct pairwise exchange.
//!
//! Every node exchanges its shard with each of the other N-1 members. An
//! optional window bounds how many partners a node sends to concurrently;
//! partners are taken in ring order starting just after the node itself so
//! that the instantaneous load spreads over the group.

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::{CollectiveAlgorithm, shard_bytes};
use crate::comms::{Comms, Progress};
use crate::op::CollectiveOp;

/// Direct exchange state machine for one phase on one node.
pub struct DirectAllToAll {
    op: CollectiveOp,
    partners: Vec<NodeId>,
    msg_bytes: Bytes,
    window: usize,

    next_send: usize,
    sends_inflight: usize,
    sends_done: usize,
    recvs_done: usize,
}

impl DirectAllToAll {
    /// Build the exchange for `node` within the ordered `peers` group.
    ///
    /// `window` bounds concurrent partners; 0 means unbounded.
    #[must_use]
    pub fn new(op: CollectiveOp, node: NodeId, peers: &[NodeId], bytes: Bytes, window: usize) -> Self {
        let n = peers.len();
        let me = peers.iter().position(|p| *p == node).expect("node in group");
        // Ring order starting after this node.
        let partners: Vec<NodeId> = (1..n).map(|step| peers[(me + step) % n]).collect();
        let window = if window == 0 { partners.len() } else { window };

        Self {
            op,
            partners,
            msg_bytes: shard_bytes(bytes, n),
            window,
            next_send: 0,
            sends_inflight: 0,
            sends_done: 0,
            recvs_done: 0,
        }
    }

    fn launch_sends(&mut self, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let tag = ctx.base_tag();
        while self.next_send < self.partners.len() && self.sends_inflight < self.window {
            let dst = self.partners[self.next_send];
            ctx.mem_read(self.msg_bytes);
            ctx.send(dst, self.msg_bytes, tag)?;
            self.next_send += 1;
            self.sends_inflight += 1;
        }
        Ok(())
    }

    fn progress(&self) -> Progress {
        if self.sends_done == self.partners.len() && self.recvs_done == self.partners.len() {
            Progress::Done
        } else {
            Progress::InFlight
        }
    }
}

impl CollectiveAlgorithm for DirectAllToAll {
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        if self.partners.is_empty() {
            return Ok(Progress::Done);
        }
        // Receives are never windowed; the backend matches them by tag.
        let tag = ctx.base_tag();
        for src in self.partners.clone() {
            ctx.recv(src, self.msg_bytes, tag)?;
        }
        self.launch_sends(ctx)?;
        Ok(Progress::InFlight)
    }

    fn on_send_done(
        &mut self,
        _dst: NodeId,
        _tag: u64,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        if self.sends_inflight == 0 {
            return sim_error!("direct {}: send completion with none in flight", self.op);
        }
        self.sends_inflight -= 1;
        self.sends_done += 1;
        self.launch_sends(ctx)?;
        Ok(self.progress())
    }

    fn on_recv(
        &mut self,
        src: NodeId,
        _tag: u64,
        bytes: Bytes,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        if !self.partners.contains(&src) {
            return sim_error!("direct {}: receive from unknown peer {src}", self.op);
        }
        ctx.mem_write(bytes);
        self.recvs_done += 1;
        Ok(self.progress())
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
