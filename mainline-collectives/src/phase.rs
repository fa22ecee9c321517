// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Decomposes a logical collective into chunks and per-chunk phase lists.
//!
//! A collective over `bytes` is first split into chunks (independently
//! schedulable streams), then each chunk gets one phase per involved
//! dimension, ordered by the dimension-traversal rule for the operation.
//! Optimizations may rewrite an all-reduce into reduce-scatter and
//! all-gather phases.

use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimError};

use crate::algorithms::{AlgorithmKind, CollectiveAlgorithm, NcclFlowModel, build_algorithm};
use crate::op::{CollectiveOp, TrainingPhase};
use crate::planner::NcclFlowPlanner;
use crate::topology::{TopologyKind, TopologyMap};

/// Smallest chunk the generator will produce.
pub const MIN_CHUNK_BYTES: Bytes = 4096;

/// One single-dimension step of a collective, bound to its algorithm.
pub struct CollectivePhase {
    /// The dimension (and so the queue) the phase runs on.
    pub dim: usize,
    /// The operation this phase performs.
    pub op: CollectiveOp,
    /// The nodes taking part, ordered by their coordinate along `dim`.
    pub peers: Vec<NodeId>,
    /// Data size the phase operates over.
    pub bytes: Bytes,
    /// The state machine that executes the phase.
    pub algorithm: Box<dyn CollectiveAlgorithm>,
}

/// How an all-reduce is decomposed across dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectiveOptimization {
    /// One all-reduce phase per dimension.
    Baseline,
    /// Reduce-scatter across all dimensions, then all-gather back in
    /// reverse, which keeps the traffic on each link proportional to its
    /// local bandwidth.
    LocalBwAware,
    /// Reduce-scatter up to the pivot dimension, all-reduce on it, then
    /// all-gather back down.
    Hierarchical,
}

impl CollectiveOptimization {
    /// Parse the system-config spelling.
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "baseline" => Ok(Self::Baseline),
            "localBWAware" => Ok(Self::LocalBwAware),
            "hierarchical" => Ok(Self::Hierarchical),
            _ => sim_error!("unknown collective-optimization '{raw}'"),
        }
    }
}

/// The inter-dimension traversal rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterDimOrder {
    /// Operation-defined order (all-gather reversed, others forward).
    Baseline,
    /// Rotate the starting dimension by the stream index.
    RoundRobin,
    /// Precomputed contention-minimizing order.
    OfflineGreedy,
    /// As [`InterDimOrder::OfflineGreedy`] with flexible chunk ownership.
    OfflineGreedyFlex,
}

impl InterDimOrder {
    /// Parse the system-config spelling.
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "baseline" => Ok(Self::Baseline),
            "roundRobin" => Ok(Self::RoundRobin),
            "offlineGreedy" => Ok(Self::OfflineGreedy),
            "offlineGreedyFlex" => Ok(Self::OfflineGreedyFlex),
            _ => sim_error!("unknown inter-dimension-scheduling '{raw}'"),
        }
    }
}

/// Per-operation, per-dimension algorithm selection.
#[derive(Clone, Debug)]
pub struct PerOpImpls {
    /// Implementations for all-reduce phases.
    pub all_reduce: Vec<AlgorithmKind>,
    /// Implementations for all-gather phases.
    pub all_gather: Vec<AlgorithmKind>,
    /// Implementations for reduce-scatter phases.
    pub reduce_scatter: Vec<AlgorithmKind>,
    /// Implementations for all-to-all phases.
    pub all_to_all: Vec<AlgorithmKind>,
}

impl PerOpImpls {
    /// The same implementation list for every operation.
    #[must_use]
    pub fn uniform(kinds: Vec<AlgorithmKind>) -> Self {
        Self {
            all_reduce: kinds.clone(),
            all_gather: kinds.clone(),
            reduce_scatter: kinds.clone(),
            all_to_all: kinds,
        }
    }

    /// Parse an implementation string such as `ring_doubleBinaryTree_direct`
    /// into one per-dimension list.
    pub fn parse_list(raw: &str) -> Result<Vec<AlgorithmKind>, SimError> {
        raw.split('_').map(AlgorithmKind::parse).collect()
    }

    /// The list configured for `op`.
    #[must_use]
    pub fn for_op(&self, op: CollectiveOp) -> &[AlgorithmKind] {
        match op {
            CollectiveOp::AllReduce => &self.all_reduce,
            CollectiveOp::AllGather => &self.all_gather,
            CollectiveOp::ReduceScatter => &self.reduce_scatter,
            CollectiveOp::AllToAll => &self.all_to_all,
        }
    }

    /// The implementation for `op` on `dim` (short lists repeat their last
    /// entry).
    #[must_use]
    pub fn kind_for(&self, op: CollectiveOp, dim: usize) -> AlgorithmKind {
        let list = self.for_op(op);
        list[dim.min(list.len() - 1)]
    }

    /// The topology kinds these implementations run over, for building the
    /// [`TopologyMap`].
    #[must_use]
    pub fn topology_kinds(&self) -> [Vec<TopologyKind>; 4] {
        let to_topo =
            |list: &[AlgorithmKind]| list.iter().map(|k| k.topology()).collect::<Vec<_>>();
        [
            to_topo(&self.all_reduce),
            to_topo(&self.all_gather),
            to_topo(&self.reduce_scatter),
            to_topo(&self.all_to_all),
        ]
    }
}

impl Default for PerOpImpls {
    fn default() -> Self {
        Self::uniform(vec![AlgorithmKind::Ring])
    }
}

/// Everything the generator needs beyond the topology.
#[derive(Clone, Debug)]
pub struct PlanConfig {
    /// Per-operation, per-dimension algorithm selection.
    pub impls: PerOpImpls,
    /// All-reduce decomposition.
    pub optimization: CollectiveOptimization,
    /// Dimension-traversal rule.
    pub inter_dim: InterDimOrder,
    /// Target chunk size; messages split into `ceil(bytes / preferred)`
    /// chunks, never smaller than [`MIN_CHUNK_BYTES`].
    pub preferred_chunk_bytes: Bytes,
    /// Concurrent-partner bound for direct exchange (0 = unbounded).
    pub direct_window: usize,
    /// NCCL-accurate mode: every phase executes a planned flow DAG.
    pub nccl: Option<NcclFlowPlanner>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            impls: PerOpImpls::default(),
            optimization: CollectiveOptimization::Baseline,
            inter_dim: InterDimOrder::Baseline,
            preferred_chunk_bytes: 1 << 20,
            direct_window: 0,
            nccl: None,
        }
    }
}

/// Split `bytes` into chunk sizes summing back to `bytes`.
#[must_use]
pub fn chunk_sizes(bytes: Bytes, preferred: Bytes) -> Vec<Bytes> {
    if bytes == 0 {
        return Vec::new();
    }
    let wanted = bytes.div_ceil(preferred.max(1));
    let count = wanted.min((bytes / MIN_CHUNK_BYTES).max(1));
    let base = bytes / count;
    let remainder = bytes % count;
    (0..count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Factory for per-chunk phase lists.
pub struct PhaseGenerator<'a> {
    topo: &'a TopologyMap,
    cfg: &'a PlanConfig,
}

impl<'a> PhaseGenerator<'a> {
    /// Create a generator over `topo` configured by `cfg`.
    #[must_use]
    pub fn new(topo: &'a TopologyMap, cfg: &'a PlanConfig) -> Self {
        Self { topo, cfg }
    }

    /// The dimensions a collective for `node` traverses, in order.
    ///
    /// Dimensions of size one and dimensions not in `involved` are skipped.
    #[must_use]
    pub fn dim_order(&self, op: CollectiveOp, involved: &[bool], stream_index: u64) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .topo
            .logical(op)
            .iter()
            .map(|logical| logical.dim)
            .filter(|dim| {
                involved.get(*dim).copied().unwrap_or(false) && self.topo.dim_size(*dim) > 1
            })
            .collect();

        if op == CollectiveOp::AllGather {
            order.reverse();
        }
        match self.cfg.inter_dim {
            InterDimOrder::Baseline => {}
            InterDimOrder::RoundRobin => {
                if !order.is_empty() {
                    let len = order.len();
                    order.rotate_left((stream_index as usize) % len);
                }
            }
            InterDimOrder::OfflineGreedy | InterDimOrder::OfflineGreedyFlex => {
                // Largest groups first: they move the most data, so giving
                // them first pick of the queues minimizes contention.
                order.sort_by_key(|dim| std::cmp::Reverse(self.topo.dim_size(*dim)));
            }
        }
        order
    }

    /// Generate the per-chunk phase lists for one collective issued by
    /// `node`.
    ///
    /// Returns one `Vec<CollectivePhase>` per chunk; an empty outer vector
    /// means no dimension participates and the collective completes
    /// immediately.
    pub fn generate(
        &self,
        node: NodeId,
        op: CollectiveOp,
        bytes: Bytes,
        involved: &[bool],
        stream_index: u64,
        phase: TrainingPhase,
    ) -> Result<Vec<Vec<CollectivePhase>>, SimError> {
        let order = self.dim_order(op, involved, stream_index);
        if order.is_empty() || bytes == 0 {
            return Ok(Vec::new());
        }

        let steps = self.phase_steps(op, &order);
        let mut chunks = Vec::new();
        for chunk_bytes in chunk_sizes(bytes, self.cfg.preferred_chunk_bytes) {
            let mut phases = Vec::with_capacity(steps.len());
            let mut cur = chunk_bytes;
            for (dim, phase_op) in &steps {
                let size = self.topo.dim_size(*dim) as Bytes;
                let phase_bytes = match phase_op {
                    CollectiveOp::AllGather => cur * size,
                    _ => cur,
                };
                phases.push(self.build_phase(node, *dim, *phase_op, phase_bytes, phase)?);
                cur = match phase_op {
                    CollectiveOp::ReduceScatter => cur.div_ceil(size),
                    CollectiveOp::AllGather => cur * size,
                    _ => cur,
                };
            }
            chunks.push(phases);
        }
        Ok(chunks)
    }

    /// The `(dim, op)` sequence one chunk walks through.
    fn phase_steps(&self, op: CollectiveOp, order: &[usize]) -> Vec<(usize, CollectiveOp)> {
        if op != CollectiveOp::AllReduce {
            return order.iter().map(|dim| (*dim, op)).collect();
        }
        match self.cfg.optimization {
            CollectiveOptimization::Baseline => order
                .iter()
                .map(|dim| (*dim, CollectiveOp::AllReduce))
                .collect(),
            CollectiveOptimization::LocalBwAware => {
                let mut steps: Vec<(usize, CollectiveOp)> = order
                    .iter()
                    .map(|dim| (*dim, CollectiveOp::ReduceScatter))
                    .collect();
                steps.extend(
                    order
                        .iter()
                        .rev()
                        .map(|dim| (*dim, CollectiveOp::AllGather)),
                );
                steps
            }
            CollectiveOptimization::Hierarchical => {
                let (pivot, below) = order.split_last().expect("order is non-empty");
                let mut steps: Vec<(usize, CollectiveOp)> = below
                    .iter()
                    .map(|dim| (*dim, CollectiveOp::ReduceScatter))
                    .collect();
                steps.push((*pivot, CollectiveOp::AllReduce));
                steps.extend(
                    below
                        .iter()
                        .rev()
                        .map(|dim| (*dim, CollectiveOp::AllGather)),
                );
                steps
            }
        }
    }

    fn build_phase(
        &self,
        node: NodeId,
        dim: usize,
        op: CollectiveOp,
        bytes: Bytes,
        phase: TrainingPhase,
    ) -> Result<CollectivePhase, SimError> {
        let peers = self.topo.group(node, dim);
        let algorithm: Box<dyn CollectiveAlgorithm> = match &self.cfg.nccl {
            Some(planner) => Box::new(NcclFlowModel::new(
                node,
                planner.plan(op, &peers, bytes, phase),
            )),
            None => build_algorithm(
                self.cfg.impls.kind_for(op, dim),
                op,
                node,
                &peers,
                bytes,
                self.cfg.direct_window,
            ),
        };
        Ok(CollectivePhase {
            dim,
            op,
            peers,
            bytes,
            algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(dims: &[usize]) -> TopologyMap {
        TopologyMap::new(dims.to_vec(), TopologyKind::Ring).unwrap()
    }

    #[test]
    fn chunks_sum_back_to_message_size() {
        for bytes in [1u64, 4095, 4096, 4097, 1 << 20, (1 << 20) + 13, 10 << 20] {
            let sizes = chunk_sizes(bytes, 1 << 20);
            assert_eq!(sizes.iter().sum::<u64>(), bytes, "bytes = {bytes}");
            if bytes > MIN_CHUNK_BYTES {
                assert!(sizes.iter().all(|c| *c >= MIN_CHUNK_BYTES));
            }
        }
    }

    #[test]
    fn small_messages_are_one_chunk() {
        assert_eq!(chunk_sizes(100, 1 << 20), vec![100]);
        assert_eq!(chunk_sizes(8000, 4096).len(), 1);
    }

    #[test]
    fn skips_uninvolved_and_unit_dimensions() {
        let topo = topo(&[2, 1, 4]);
        let cfg = PlanConfig::default();
        let generator = PhaseGenerator::new(&topo, &cfg);
        // Dimension 1 has size 1, dimension 2 is not involved.
        let order = generator.dim_order(CollectiveOp::AllReduce, &[true, true, false], 0);
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn all_gather_traverses_in_reverse() {
        let topo = topo(&[2, 4, 8]);
        let cfg = PlanConfig::default();
        let generator = PhaseGenerator::new(&topo, &cfg);
        let order = generator.dim_order(CollectiveOp::AllGather, &[true, true, true], 0);
        assert_eq!(order, vec![2, 1, 0]);
        let order = generator.dim_order(CollectiveOp::ReduceScatter, &[true, true, true], 0);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn round_robin_rotates_by_stream_index() {
        let topo = topo(&[2, 4, 8]);
        let cfg = PlanConfig {
            inter_dim: InterDimOrder::RoundRobin,
            ..PlanConfig::default()
        };
        let generator = PhaseGenerator::new(&topo, &cfg);
        assert_eq!(
            generator.dim_order(CollectiveOp::AllReduce, &[true, true, true], 1),
            vec![1, 2, 0]
        );
    }

    #[test]
    fn offline_greedy_prefers_large_dimensions() {
        let topo = topo(&[2, 8, 4]);
        let cfg = PlanConfig {
            inter_dim: InterDimOrder::OfflineGreedy,
            ..PlanConfig::default()
        };
        let generator = PhaseGenerator::new(&topo, &cfg);
        assert_eq!(
            generator.dim_order(CollectiveOp::AllReduce, &[true, true, true], 0),
            vec![1, 2, 0]
        );
    }

    #[test]
    fn local_bw_aware_rewrites_all_reduce() {
        let topo = topo(&[2, 4]);
        let cfg = PlanConfig {
            optimization: CollectiveOptimization::LocalBwAware,
            ..PlanConfig::default()
        };
        let generator = PhaseGenerator::new(&topo, &cfg);
        let chunks = generator
            .generate(
                NodeId(0),
                CollectiveOp::AllReduce,
                8192,
                &[true, true],
                0,
                TrainingPhase::WeightGrad,
            )
            .unwrap();
        assert_eq!(chunks.len(), 1);
        let ops: Vec<CollectiveOp> = chunks[0].iter().map(|p| p.op).collect();
        assert_eq!(
            ops,
            vec![
                CollectiveOp::ReduceScatter,
                CollectiveOp::ReduceScatter,
                CollectiveOp::AllGather,
                CollectiveOp::AllGather,
            ]
        );
        let dims: Vec<usize> = chunks[0].iter().map(|p| p.dim).collect();
        assert_eq!(dims, vec![0, 1, 1, 0]);
        // Data shrinks through the scatter and grows back.
        let sizes: Vec<u64> = chunks[0].iter().map(|p| p.bytes).collect();
        assert_eq!(sizes, vec![8192, 4096, 4096, 8192]);
    }

    #[test]
    fn hierarchical_pivots_on_the_last_dimension() {
        let topo = topo(&[2, 4, 2]);
        let cfg = PlanConfig {
            optimization: CollectiveOptimization::Hierarchical,
            ..PlanConfig::default()
        };
        let generator = PhaseGenerator::new(&topo, &cfg);
        let chunks = generator
            .generate(
                NodeId(0),
                CollectiveOp::AllReduce,
                16384,
                &[true, true, true],
                0,
                TrainingPhase::WeightGrad,
            )
            .unwrap();
        let ops: Vec<CollectiveOp> = chunks[0].iter().map(|p| p.op).collect();
        assert_eq!(
            ops,
            vec![
                CollectiveOp::ReduceScatter,
                CollectiveOp::ReduceScatter,
                CollectiveOp::AllReduce,
                CollectiveOp::AllGather,
                CollectiveOp::AllGather,
            ]
        );
    }

    #[test]
    fn no_participating_dimension_yields_no_chunks() {
        let topo = topo(&[2, 2]);
        let cfg = PlanConfig::default();
        let generator = PhaseGenerator::new(&topo, &cfg);
        let chunks = generator
            .generate(
                NodeId(0),
                CollectiveOp::AllReduce,
                8192,
                &[false, false],
                0,
                TrainingPhase::WeightGrad,
            )
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn nccl_mode_plans_every_phase() {
        let topo = topo(&[4]);
        let cfg = PlanConfig {
            nccl: Some(NcclFlowPlanner::new(2, false)),
            ..PlanConfig::default()
        };
        let generator = PhaseGenerator::new(&topo, &cfg);
        let chunks = generator
            .generate(
                NodeId(1),
                CollectiveOp::AllReduce,
                65536,
                &[true],
                0,
                TrainingPhase::Forward,
            )
            .unwrap();
        assert_eq!(chunks[0][0].algorithm.name(), "ncclFlowModel");
    }

    #[test]
    fn large_messages_split_into_chunks() {
        let topo = topo(&[4]);
        let cfg = PlanConfig::default();
        let generator = PhaseGenerator::new(&topo, &cfg);
        let chunks = generator
            .generate(
                NodeId(0),
                CollectiveOp::AllReduce,
                4 << 20,
                &[true],
                0,
                TrainingPhase::WeightGrad,
            )
            .unwrap();
        assert_eq!(chunks.len(), 4);
        let total: u64 = chunks.iter().map(|c| c[0].bytes).sum();
        assert_eq!(total, 4 << 20);
    }
}
