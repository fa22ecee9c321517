// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The double binary tree.
//!
//! Two overlaid balanced binary trees each carry half of the data: a
//! reduce up to the root followed by a broadcast back down. The second tree
//! is the first one shifted by one position so that interior nodes of one
//! tree are leaves of the other, which is what restores bandwidth parity
//! with the ring.

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::{CollectiveAlgorithm, shard_bytes};
use crate::comms::{Comms, Progress};

/// Reduce-then-broadcast over one tree for one node.
struct TreeHalf {
    tag_offset: u64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    msg_bytes: Bytes,

    child_recvs: usize,
    parent_recv: bool,
    parent_send_done: bool,
    down_sends_done: usize,
}

impl TreeHalf {
    /// Build the half for the tree over `peers` with every index shifted by
    /// `shift` (0 for the first tree, 1 for its mirror).
    fn new(node: NodeId, peers: &[NodeId], msg_bytes: Bytes, shift: usize, tag_offset: u64) -> Self {
        let n = peers.len();
        let me = peers.iter().position(|p| *p == node).expect("node in group");
        // Position of this node in the shifted index space, and the inverse
        // map from shifted index back to the actual node.
        let s = (me + shift) % n;
        let actual = |idx: usize| peers[(idx + n - shift) % n];

        let parent = (s > 0).then(|| actual((s - 1) / 2));
        let mut children = Vec::new();
        if 2 * s + 1 < n {
            children.push(actual(2 * s + 1));
        }
        if 2 * s + 2 < n {
            children.push(actual(2 * s + 2));
        }

        Self {
            tag_offset,
            parent,
            children,
            msg_bytes,
            child_recvs: 0,
            parent_recv: false,
            parent_send_done: false,
            down_sends_done: 0,
        }
    }

    fn run(&mut self, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let tag = ctx.base_tag() + self.tag_offset;
        for child in &self.children {
            ctx.recv(*child, self.msg_bytes, tag)?;
        }
        if let Some(parent) = self.parent {
            ctx.recv(parent, self.msg_bytes, tag)?;
            if self.children.is_empty() {
                // Leaf: nothing to reduce, send up immediately.
                ctx.send(parent, self.msg_bytes, tag)?;
            }
        }
        Ok(())
    }

    fn start_down(&mut self, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let tag = ctx.base_tag() + self.tag_offset;
        for child in &self.children {
            ctx.send(*child, self.msg_bytes, tag)?;
        }
        Ok(())
    }

    fn on_recv(&mut self, src: NodeId, bytes: Bytes, ctx: &mut dyn Comms) -> Result<(), SimError> {
        let tag = ctx.base_tag() + self.tag_offset;
        if self.children.contains(&src) && self.child_recvs < self.children.len() {
            // Up phase: fold the child's contribution into the local buffer.
            ctx.mem_read(2 * bytes);
            ctx.mem_write(bytes);
            ctx.reduction();
            self.child_recvs += 1;
            if self.child_recvs == self.children.len() {
                match self.parent {
                    Some(parent) => ctx.send(parent, self.msg_bytes, tag)?,
                    // Root: the reduction is complete, broadcast back down.
                    None => self.start_down(ctx)?,
                }
            }
            Ok(())
        } else if self.parent == Some(src) {
            ctx.mem_read(bytes);
            ctx.mem_write(bytes);
            self.parent_recv = true;
            self.start_down(ctx)
        } else {
            sim_error!("tree: receive from unexpected peer {src}")
        }
    }

    fn on_send_done(&mut self, dst: NodeId) -> Result<(), SimError> {
        if self.parent == Some(dst) && !self.parent_send_done {
            self.parent_send_done = true;
            Ok(())
        } else if self.children.contains(&dst) {
            self.down_sends_done += 1;
            Ok(())
        } else {
            sim_error!("tree: send completion for unexpected peer {dst}")
        }
    }

    fn done(&self) -> bool {
        let up_done = self.child_recvs == self.children.len()
            && (self.parent.is_none() || self.parent_send_done);
        let down_done = (self.parent.is_none() || self.parent_recv)
            && self.down_sends_done == self.children.len();
        up_done && down_done
    }
}

/// All-reduce over two overlaid binary trees.
pub struct DoubleBinaryTree {
    halves: [TreeHalf; 2],
}

impl DoubleBinaryTree {
    /// Build both trees for `node` within the ordered `peers` group.
    #[must_use]
    pub fn new(node: NodeId, peers: &[NodeId], bytes: Bytes) -> Self {
        let half_bytes = shard_bytes(bytes, 2);
        Self {
            halves: [
                TreeHalf::new(node, peers, half_bytes, 0, 0),
                TreeHalf::new(node, peers, half_bytes, 1, 1),
            ],
        }
    }

    fn half_for_tag(&mut self, tag: u64, base: u64) -> Result<&mut TreeHalf, SimError> {
        match tag.checked_sub(base) {
            Some(0) => Ok(&mut self.halves[0]),
            Some(1) => Ok(&mut self.halves[1]),
            _ => sim_error!("tree: tag {tag} outside phase tag space"),
        }
    }

    fn progress(&self) -> Progress {
        if self.halves.iter().all(TreeHalf::done) {
            Progress::Done
        } else {
            Progress::InFlight
        }
    }
}

impl CollectiveAlgorithm for DoubleBinaryTree {
    fn run(&mut self, ctx: &mut dyn Comms) -> Result<Progress, SimError> {
        for half in &mut self.halves {
            half.run(ctx)?;
        }
        Ok(self.progress())
    }

    fn on_send_done(
        &mut self,
        dst: NodeId,
        tag: u64,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        let base = ctx.base_tag();
        self.half_for_tag(tag, base)?.on_send_done(dst)?;
        Ok(self.progress())
    }

    fn on_recv(
        &mut self,
        src: NodeId,
        tag: u64,
        bytes: Bytes,
        ctx: &mut dyn Comms,
    ) -> Result<Progress, SimError> {
        let base = ctx.base_tag();
        self.half_for_tag(tag, base)?.on_recv(src, bytes, ctx)?;
        Ok(self.progress())
    }

    fn name(&self) -> &'static str {
        "doubleBinaryTree"
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
    fn the_two_trees_have_different_roots() {
        let group = peers(4);
        let a = TreeHalf::new(NodeId(0), &group, 1024, 0, 0);
        assert!(a.parent.is_none());
        let b = TreeHalf::new(NodeId(0), &group, 1024, 1, 1);
        assert!(b.parent.is_some());
        // Node 3 is the shifted root of tree B.
        let b_root = TreeHalf::new(NodeId(3), &group, 1024, 1, 1);
        assert!(b_root.parent.is_none());
    }

    #[test]
    fn leaf_sends_up_then_waits_for_broadcast() {
        let group = peers(3);
        // In tree A node 2 is a leaf with parent 0.
        let mut half = TreeHalf::new(NodeId(2), &group, 512, 0, 0);
        assert_eq!(half.parent, Some(NodeId(0)));
        assert!(half.children.is_empty());

        let mut ctx = MockComms::new(NodeId(2), 10);
        half.run(&mut ctx).unwrap();
        assert_eq!(ctx.sends.len(), 1);
        assert!(!half.done());

        half.on_send_done(NodeId(0)).unwrap();
        assert!(!half.done());
        half.on_recv(NodeId(0), 512, &mut ctx).unwrap();
        assert!(half.done());
    }

    #[test]
    fn root_reduces_then_broadcasts() {
        let group = peers(3);
        // Node 0 is the root of tree A with children 1 and 2.
        let mut half = TreeHalf::new(NodeId(0), &group, 512, 0, 0);
        assert_eq!(half.children, vec![NodeId(1), NodeId(2)]);

        let mut ctx = MockComms::new(NodeId(0), 10);
        half.run(&mut ctx).unwrap();
        assert!(ctx.sends.is_empty());

        half.on_recv(NodeId(1), 512, &mut ctx).unwrap();
        assert!(ctx.sends.is_empty());
        half.on_recv(NodeId(2), 512, &mut ctx).unwrap();
        // Broadcast down starts once the reduction is complete.
        assert_eq!(ctx.sends.len(), 2);
        assert_eq!(ctx.reductions, 2);

        half.on_send_done(NodeId(1)).unwrap();
        half.on_send_done(NodeId(2)).unwrap();
        assert!(half.done());
    }

    #[test]
    fn full_machine_reports_done_only_when_both_halves_finish() {
        let group = peers(2);
        let mut alg = DoubleBinaryTree::new(NodeId(0), &group, 1024);
        let mut ctx = MockComms::new(NodeId(0), 100);
        assert_eq!(alg.run(&mut ctx).unwrap(), Progress::InFlight);
    }
}
