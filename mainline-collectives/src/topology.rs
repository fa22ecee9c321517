// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The static, immutable description of each node's position in every
//! logical collective topology over each physical dimension.
//!
//! A cluster is a dense grid `dims = [d0, d1, ...]` with node `n` at
//! coordinates given by mixed-radix decomposition of `n` (dimension 0
//! innermost). For each operation type the map holds an ordered list of
//! per-dimension [`LogicalTopology`] entries; these are regenerated together
//! whenever [`TopologyMap::break_dimension`] splits a dimension.

use mainline_engine::sim_error;
use mainline_engine::types::{NodeId, SimError};

use crate::op::CollectiveOp;

/// The shape of the logical topology used on one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyKind {
    /// Unidirectional ring.
    Ring,
    /// Single balanced binary tree.
    BinaryTree,
    /// Two overlaid binary trees for bandwidth parity.
    DoubleBinaryTree,
    /// Fully-connected pairwise exchange.
    Direct,
}

/// One dimension's logical topology for one operation type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicalTopology {
    /// Physical dimension index.
    pub dim: usize,
    /// Shape on that dimension.
    pub kind: TopologyKind,
}

/// Per-dimension topology map for a cluster of `prod(dims)` nodes.
#[derive(Clone, Debug)]
pub struct TopologyMap {
    dims: Vec<usize>,

    /// Per operation type, the topology kind requested for each dimension.
    /// When a dimension is split both halves inherit its kind.
    kinds: [Vec<TopologyKind>; 4],

    /// Regenerated per-operation logical topology lists.
    logical: [Vec<LogicalTopology>; 4],
}

fn op_index(op: CollectiveOp) -> usize {
    match op {
        CollectiveOp::AllReduce => 0,
        CollectiveOp::AllGather => 1,
        CollectiveOp::ReduceScatter => 2,
        CollectiveOp::AllToAll => 3,
    }
}

impl TopologyMap {
    /// Create a map with the same topology kinds on every dimension for
    /// every operation.
    pub fn new(dims: Vec<usize>, kind: TopologyKind) -> Result<Self, SimError> {
        let kinds = vec![kind; dims.len()];
        Self::with_kinds(dims, [kinds.clone(), kinds.clone(), kinds.clone(), kinds])
    }

    /// Create a map with explicit per-operation, per-dimension kinds.
    ///
    /// A kinds list shorter than `dims` repeats its last entry; longer lists
    /// are rejected.
    pub fn with_kinds(dims: Vec<usize>, kinds: [Vec<TopologyKind>; 4]) -> Result<Self, SimError> {
        if dims.is_empty() {
            return sim_error!("topology must have at least one dimension");
        }
        for (i, d) in dims.iter().enumerate() {
            if *d == 0 {
                return sim_error!("dimension {i} has size 0");
            }
        }
        for list in &kinds {
            if list.is_empty() {
                return sim_error!("per-dimension implementation list is empty");
            }
            if list.len() > dims.len() {
                return sim_error!(
                    "{} per-dimension implementations for {} dimensions",
                    list.len(),
                    dims.len()
                );
            }
        }

        let mut map = Self {
            dims,
            kinds,
            logical: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        };
        map.regenerate();
        Ok(map)
    }

    fn regenerate(&mut self) {
        for (kinds, logical) in self.kinds.iter().zip(self.logical.iter_mut()) {
            logical.clear();
            for dim in 0..self.dims.len() {
                let kind = kinds[dim.min(kinds.len() - 1)];
                logical.push(LogicalTopology { dim, kind });
            }
        }
    }

    /// The physical dimension sizes.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of physical dimensions.
    #[must_use]
    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    /// Size of dimension `dim`.
    #[must_use]
    pub fn dim_size(&self, dim: usize) -> usize {
        self.dims[dim]
    }

    /// Total number of nodes.
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.dims.iter().product()
    }

    /// The ordered logical-topology list for `op`.
    #[must_use]
    pub fn logical(&self, op: CollectiveOp) -> &[LogicalTopology] {
        &self.logical[op_index(op)]
    }

    /// Mixed-radix coordinates of `node`, dimension 0 innermost.
    #[must_use]
    pub fn coords(&self, node: NodeId) -> Vec<usize> {
        let mut rest = node.0;
        self.dims
            .iter()
            .map(|d| {
                let c = rest % d;
                rest /= d;
                c
            })
            .collect()
    }

    /// The node at the given coordinates.
    #[must_use]
    pub fn node_at(&self, coords: &[usize]) -> NodeId {
        debug_assert_eq!(coords.len(), self.dims.len());
        let mut id = 0;
        let mut stride = 1;
        for (c, d) in coords.iter().zip(self.dims.iter()) {
            debug_assert!(c < d);
            id += c * stride;
            stride *= d;
        }
        NodeId(id)
    }

    /// `node`'s position within its dimension-`dim` group.
    #[must_use]
    pub fn group_index(&self, node: NodeId, dim: usize) -> usize {
        self.coords(node)[dim]
    }

    /// All nodes sharing every coordinate with `node` except dimension
    /// `dim`, ordered by their coordinate along `dim` (includes `node`).
    #[must_use]
    pub fn group(&self, node: NodeId, dim: usize) -> Vec<NodeId> {
        let mut coords = self.coords(node);
        (0..self.dims[dim])
            .map(|c| {
                coords[dim] = c;
                self.node_at(&coords)
            })
            .collect()
    }

    /// The previous and next node on the dimension-`dim` ring.
    #[must_use]
    pub fn ring_neighbours(&self, node: NodeId, dim: usize) -> (NodeId, NodeId) {
        let size = self.dims[dim];
        let mut coords = self.coords(node);
        let me = coords[dim];
        coords[dim] = (me + size - 1) % size;
        let prev = self.node_at(&coords);
        coords[dim] = (me + 1) % size;
        let next = self.node_at(&coords);
        (prev, next)
    }

    /// Split one dimension so that the product of the leading dimensions
    /// equals `target`.
    ///
    /// Finds the first dimension `k` whose running prefix product exceeds
    /// `target` and splits `dims[k]` into `(a, b)` with
    /// `a = target / prefix_product_before_k` and `a * b = dims[k]`. All
    /// per-operation logical topology lists are regenerated atomically. A
    /// one-shot operation during initialisation.
    pub fn break_dimension(&mut self, target: usize) -> Result<(), SimError> {
        let total = self.total_nodes();
        if target == 0 || total % target != 0 {
            return sim_error!("cannot break {total} nodes at group size {target}");
        }

        let mut prefix = 1;
        for k in 0..self.dims.len() {
            let next = prefix * self.dims[k];
            if next > target {
                let a = target / prefix;
                if a * prefix != target || self.dims[k] % a != 0 {
                    return sim_error!(
                        "group size {target} does not align with dimension {k} (size {})",
                        self.dims[k]
                    );
                }
                if a == 1 {
                    // Group boundary already falls between dimensions.
                    return Ok(());
                }
                let b = self.dims[k] / a;
                self.dims[k] = a;
                self.dims.insert(k + 1, b);
                for kinds in &mut self.kinds {
                    if k < kinds.len() {
                        let kind = kinds[k];
                        kinds.insert(k + 1, kind);
                    }
                }
                self.regenerate();
                return Ok(());
            }
            prefix = next;
        }
        // target >= total: the whole machine is one group, nothing to split.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(dims: &[usize]) -> TopologyMap {
        TopologyMap::new(dims.to_vec(), TopologyKind::Ring).unwrap()
    }

    #[test]
    fn coords_round_trip() {
        let topo = map(&[2, 3, 4]);
        assert_eq!(topo.total_nodes(), 24);
        for n in 0..24 {
            let coords = topo.coords(NodeId(n));
            assert_eq!(topo.node_at(&coords), NodeId(n));
        }
        assert_eq!(topo.coords(NodeId(7)), vec![1, 0, 1]);
    }

    #[test]
    fn groups_along_each_dimension() {
        let topo = map(&[2, 2]);
        // Node 2 has coords [0, 1].
        assert_eq!(topo.group(NodeId(2), 0), vec![NodeId(2), NodeId(3)]);
        assert_eq!(topo.group(NodeId(2), 1), vec![NodeId(0), NodeId(2)]);
        assert_eq!(topo.group_index(NodeId(2), 0), 0);
        assert_eq!(topo.group_index(NodeId(2), 1), 1);
    }

    #[test]
    fn ring_neighbours_wrap() {
        let topo = map(&[4]);
        assert_eq!(topo.ring_neighbours(NodeId(0), 0), (NodeId(3), NodeId(1)));
        assert_eq!(topo.ring_neighbours(NodeId(3), 0), (NodeId(2), NodeId(0)));
    }

    #[test]
    fn break_dimension_splits_and_preserves_node_count() {
        let mut topo = map(&[8, 8]);
        topo.break_dimension(16).unwrap();
        assert_eq!(topo.dims(), &[8, 2, 4]);
        assert_eq!(topo.total_nodes(), 64);
        // Every per-operation list gains one entry.
        for op in [
            CollectiveOp::AllReduce,
            CollectiveOp::AllGather,
            CollectiveOp::ReduceScatter,
            CollectiveOp::AllToAll,
        ] {
            assert_eq!(topo.logical(op).len(), 3);
        }
    }

    #[test]
    fn break_dimension_on_existing_boundary_is_noop() {
        let mut topo = map(&[8, 8]);
        topo.break_dimension(8).unwrap();
        assert_eq!(topo.dims(), &[8, 8]);
    }

    #[test]
    fn break_dimension_rejects_misaligned_target() {
        let mut topo = map(&[8, 8]);
        assert!(topo.break_dimension(3).is_err());
    }
}
