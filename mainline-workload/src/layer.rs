// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Runtime state of one layer on one node.
//!
//! The static description comes from the workload file; at runtime a layer
//! tracks its outstanding collective batches per training phase, the tick
//! at which its workload started waiting on one (at most one waiter is ever
//! active), and the accumulators feeding the end-of-run report.

use std::collections::HashSet;

use mainline_collectives::op::TrainingPhase;
use mainline_engine::types::{Cycles, Tick};
use mainline_system::stream::BatchId;

use crate::parser::{GroupKind, LayerSpec, PhaseSpec};

/// Per-layer accumulators for the summary report.
#[derive(Clone, Debug, Default)]
pub struct LayerStats {
    /// Compute cycles spent per training phase (recomputation counts
    /// again).
    pub compute_cycles: [Cycles; 3],
    /// Cycles the workload was blocked on communication, by group kind.
    pub exposed_comm: [u64; 5],
    /// Collectives issued per training phase.
    pub issued: [u64; 3],
}

impl LayerStats {
    /// Total compute cycles over all phases.
    #[must_use]
    pub fn total_compute(&self) -> Cycles {
        self.compute_cycles.iter().sum()
    }

    /// Total exposed communication over all groups.
    #[must_use]
    pub fn total_exposed(&self) -> u64 {
        self.exposed_comm.iter().sum()
    }
}

/// One layer and its runtime state.
pub struct Layer {
    /// Static description from the workload file.
    pub spec: LayerSpec,
    /// This layer's activations are kept for the backward pass.
    pub is_checkpoint: bool,
    /// Reaching this layer's backward pass triggers recomputation.
    pub needs_recompute_trigger: bool,
    /// Report accumulators.
    pub stats: LayerStats,

    outstanding: [HashSet<BatchId>; 3],
    waiting_since: [Option<Tick>; 3],
}

impl Layer {
    /// Wrap a parsed layer.
    #[must_use]
    pub fn new(spec: LayerSpec, is_checkpoint: bool, needs_recompute_trigger: bool) -> Self {
        Self {
            spec,
            is_checkpoint,
            needs_recompute_trigger,
            stats: LayerStats::default(),
            outstanding: [HashSet::new(), HashSet::new(), HashSet::new()],
            waiting_since: [None; 3],
        }
    }

    /// The static description of one training phase.
    #[must_use]
    pub fn phase(&self, phase: TrainingPhase) -> &PhaseSpec {
        match phase {
            TrainingPhase::Forward => &self.spec.fwd,
            TrainingPhase::InputGrad => &self.spec.input_grad,
            TrainingPhase::WeightGrad => &self.spec.weight_grad,
        }
    }

    /// Record an issued batch for `phase`.
    pub fn register_batch(&mut self, phase: TrainingPhase, batch: BatchId) {
        self.outstanding[phase.index()].insert(batch);
        self.stats.issued[phase.index()] += 1;
    }

    /// A batch completed. Returns whether it belonged to this layer/phase.
    pub fn batch_done(&mut self, phase: TrainingPhase, batch: BatchId) -> bool {
        self.outstanding[phase.index()].remove(&batch)
    }

    /// Whether all of `phase`'s collectives have completed.
    #[must_use]
    pub fn comm_finished(&self, phase: TrainingPhase) -> bool {
        self.outstanding[phase.index()].is_empty()
    }

    /// The workload blocked on `phase`'s communication.
    pub fn start_waiting(&mut self, phase: TrainingPhase, now: Tick) {
        let slot = &mut self.waiting_since[phase.index()];
        if slot.is_none() {
            *slot = Some(now);
        }
    }

    /// The workload is no longer blocked on `phase`; account the exposed
    /// time against the phase's group kind.
    pub fn stop_waiting(&mut self, phase: TrainingPhase, now: Tick) {
        if let Some(since) = self.waiting_since[phase.index()].take() {
            let group = self.phase(phase).comm.group;
            self.stats.exposed_comm[group.index()] += now - since;
        }
    }

    /// Charge `cycles` of compute against `phase`.
    pub fn charge_compute(&mut self, phase: TrainingPhase, cycles: Cycles) {
        self.stats.compute_cycles[phase.index()] += cycles;
    }

    /// Exposed communication accounted against `group` so far.
    #[must_use]
    pub fn exposed_for(&self, group: GroupKind) -> u64 {
        self.stats.exposed_comm[group.index()]
    }
}

#[cfg(test)]
mod tests {
    use mainline_collectives::op::CollectiveOp;

    use super::*;
    use crate::parser::CollectiveSpec;

    fn spec() -> LayerSpec {
        let phase = |compute, group| PhaseSpec {
            compute,
            comm: CollectiveSpec {
                op: Some(CollectiveOp::AllReduce),
                group,
            },
            bytes: 4096,
        };
        LayerSpec {
            name: "l0".to_string(),
            reserved: -1,
            fwd: phase(100, GroupKind::Tp),
            input_grad: phase(120, GroupKind::Tp),
            weight_grad: phase(80, GroupKind::Dp),
            weight_grad_update_time: 10,
            specific_policy: None,
        }
    }

    #[test]
    fn batches_block_their_phase() {
        let mut layer = Layer::new(spec(), false, false);
        assert!(layer.comm_finished(TrainingPhase::WeightGrad));
        layer.register_batch(TrainingPhase::WeightGrad, BatchId(1));
        layer.register_batch(TrainingPhase::WeightGrad, BatchId(2));
        assert!(!layer.comm_finished(TrainingPhase::WeightGrad));
        assert!(layer.batch_done(TrainingPhase::WeightGrad, BatchId(1)));
        assert!(!layer.comm_finished(TrainingPhase::WeightGrad));
        assert!(layer.batch_done(TrainingPhase::WeightGrad, BatchId(2)));
        assert!(layer.comm_finished(TrainingPhase::WeightGrad));
        // Completions for unknown batches are rejected.
        assert!(!layer.batch_done(TrainingPhase::WeightGrad, BatchId(3)));
    }

    #[test]
    fn waiting_accounts_exposed_comm_to_the_group() {
        let mut layer = Layer::new(spec(), false, false);
        layer.start_waiting(TrainingPhase::WeightGrad, 100);
        // A second start while already waiting keeps the original tick.
        layer.start_waiting(TrainingPhase::WeightGrad, 150);
        layer.stop_waiting(TrainingPhase::WeightGrad, 400);
        assert_eq!(layer.exposed_for(GroupKind::Dp), 300);
        // Stopping again is a no-op.
        layer.stop_waiting(TrainingPhase::WeightGrad, 500);
        assert_eq!(layer.exposed_for(GroupKind::Dp), 300);
    }
}
