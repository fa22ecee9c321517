// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The per-node training state machine.
//!
//! The workload walks its layers forward, then backward through
//! input-gradient and weight-gradient passes, for a configured number of
//! iterations. It is driven entirely by kernel callbacks: a compute delay
//! schedules a wake-up and returns, a blocking collective returns until its
//! batch-completion event arrives. The only suspension points are those
//! explicit returns.
//!
//! Barrier and priority pairings:
//!  - forward collectives block, at the default priority;
//!  - input-gradient collectives block, LIFO (freshest gradient first);
//!  - weight-gradient collectives do not block, FIFO; the forward pass of
//!    the next iteration waits on them per layer.
//!
//! With activation checkpointing, reaching a trigger layer on the way back
//! re-runs the forward passes from the nearest checkpoint before the
//! input-gradient pass continues.

use std::collections::HashMap;
use std::rc::Rc;

use mainline_collectives::op::TrainingPhase;
use mainline_collectives::topology::TopologyMap;
use mainline_engine::events::EventQueue;
use mainline_engine::sim_error;
use mainline_engine::time::SimTime;
use mainline_engine::types::{Bytes, SimError, SimResult, Tick};
use mainline_system::cluster::{SysEvent, WorkloadDriver};
use mainline_system::node::{CollectiveRequest, Node};
use mainline_system::stream::{BatchId, PriorityPolicy};
use mainline_track::entity::Entity;
use mainline_track::{debug, info};

use crate::layer::Layer;
use crate::parser::{GroupKind, WorkloadFile, WorkloadHeader};

/// Messages below this floor are padded up to it before issuance; the wire
/// protocol never moves less.
const FWD_MIN_BYTES: Bytes = 4096;

/// The state of the walk through the layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FsmState {
    ForwardPass,
    InputGradient,
    WeightGradient,
    ForwardInBackPass,
    WaitForSimFinish,
}

/// Which physical dimensions each group kind spans.
#[derive(Clone, Debug)]
struct GroupMasks {
    masks: [Vec<bool>; 5],
}

impl GroupMasks {
    fn build(header: &WorkloadHeader, topo: &TopologyMap) -> Result<Self, SimError> {
        let dims = topo.dims();
        let boundary = |group: usize, from: usize, what: &str| -> Result<usize, SimError> {
            let mut product = 1;
            let mut at = from;
            while product < group {
                if at >= dims.len() {
                    return sim_error!("{what} group of {group} does not fit the topology");
                }
                product *= dims[at];
                at += 1;
            }
            if product != group {
                return sim_error!("{what} group of {group} does not align with {dims:?}");
            }
            Ok(at)
        };

        let tp_end = boundary(header.model_parallel_npu_group, 0, "model-parallel")?;
        let ep_end = boundary(header.expert_parallel_npu_group, tp_end, "expert-parallel")?;

        let mask = |from: usize, to: usize| {
            (0..dims.len()).map(|d| d >= from && d < to).collect()
        };
        Ok(Self {
            masks: [
                mask(0, tp_end),             // TP
                mask(tp_end, dims.len()),    // DP: every data dimension
                mask(tp_end, ep_end),        // EP
                mask(ep_end, dims.len()),    // DP_EP: data minus expert
                mask(dims.len(), dims.len()), // PP: point-to-point, no dims
            ],
        })
    }

    fn for_group(&self, group: GroupKind) -> &Vec<bool> {
        &self.masks[group.index()]
    }
}

/// The per-node workload state machine.
pub struct Workload {
    /// Track entity for logging.
    pub entity: Rc<Entity>,
    /// The layers, with their runtime state.
    pub layers: Vec<Layer>,
    /// Tick at which the final pass converged.
    pub finish_tick: Option<Tick>,

    header: WorkloadHeader,
    masks: GroupMasks,
    total_pass: usize,

    state: FsmState,
    index: usize,
    pass: usize,

    delay_loaded: bool,
    compute_pending: bool,
    compute_done: bool,
    collective_issued: bool,
    checkpoint_initiated: bool,
    recompute_target: usize,

    batch_owner: HashMap<BatchId, (usize, TrainingPhase)>,
    finished: bool,
}

impl Workload {
    /// Build the workload for one node.
    pub fn new(
        parent: &Rc<Entity>,
        file: &WorkloadFile,
        topo: &TopologyMap,
        total_pass: usize,
    ) -> Result<Self, SimError> {
        let masks = GroupMasks::build(&file.header, topo)?;
        let layers = file
            .layers
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                Layer::new(
                    spec.clone(),
                    file.header.checkpoints.contains(&index),
                    file.header.checkpoint_initiates.contains(&index),
                )
            })
            .collect();
        Ok(Self {
            entity: Rc::new(Entity::new(parent, "workload")),
            layers,
            finish_tick: None,
            header: file.header.clone(),
            masks,
            total_pass,
            state: FsmState::ForwardPass,
            index: 0,
            pass: 0,
            delay_loaded: false,
            compute_pending: false,
            compute_done: false,
            collective_issued: false,
            checkpoint_initiated: false,
            recompute_target: 0,
            batch_owner: HashMap::new(),
            finished: false,
        })
    }

    /// Completed training iterations.
    #[must_use]
    pub fn passes_finished(&self) -> usize {
        self.pass
    }

    /// The parsed header this workload was built from.
    #[must_use]
    pub fn header(&self) -> &WorkloadHeader {
        &self.header
    }

    /// Schedule the phase's compute delay. First of the three suspension
    /// points.
    fn load_compute_delay(
        &mut self,
        phase: TrainingPhase,
        node: &Node,
        queue: &mut EventQueue<SysEvent>,
    ) {
        let layer = &mut self.layers[self.index];
        let mut cycles = layer.phase(phase).compute;
        if phase == TrainingPhase::WeightGrad {
            cycles += layer.spec.weight_grad_update_time;
        }
        layer.charge_compute(phase, cycles);
        self.delay_loaded = true;
        self.compute_done = false;
        self.compute_pending = true;
        queue.register_event(node.id, SysEvent::WorkloadWait, cycles);
    }

    /// Issue the phase's collective, if the layer has one.
    fn issue_collective(
        &mut self,
        phase: TrainingPhase,
        policy: PriorityPolicy,
        node: &mut Node,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let index = self.index;
        let spec = *self.layers[index].phase(phase);
        let Some(op) = spec.comm.op else {
            return Ok(());
        };
        let mut bytes = spec.bytes;
        if bytes == 0 {
            return Ok(());
        }
        if phase == TrainingPhase::Forward && bytes < FWD_MIN_BYTES {
            bytes = FWD_MIN_BYTES;
        }
        let batch = node.generate_collective(
            CollectiveRequest {
                op,
                bytes,
                involved: self.masks.for_group(spec.comm.group).clone(),
                policy,
                phase,
                notify: Some((index, phase)),
            },
            queue,
        )?;
        self.layers[index].register_batch(phase, batch);
        self.batch_owner.insert(batch, (index, phase));
        debug!(self.entity ; "layer {index} {phase} issues {op} of {bytes} B as {batch}");
        Ok(())
    }

    /// Clear the per-layer-phase progress flags when moving on.
    fn reset_progress(&mut self) {
        self.delay_loaded = false;
        self.compute_done = false;
        self.collective_issued = false;
    }

    /// Advance the machine until it has to suspend.
    fn step(&mut self, node: &mut Node, queue: &mut EventQueue<SysEvent>, time: &SimTime) -> SimResult {
        let now = queue.now();
        loop {
            if self.finished {
                return Ok(());
            }
            assert!(
                self.state == FsmState::WaitForSimFinish || self.index < self.layers.len(),
                "layer index out of range"
            );
            match self.state {
                FsmState::ForwardPass | FsmState::ForwardInBackPass => {
                    if !self.delay_loaded {
                        self.load_compute_delay(TrainingPhase::Forward, node, queue);
                        return Ok(());
                    }
                    if !self.compute_done {
                        return Ok(());
                    }
                    // The previous iteration's weight-gradient all-reduce
                    // must land before this layer steps forward again.
                    if self.state == FsmState::ForwardPass
                        && !self.layers[self.index].comm_finished(TrainingPhase::WeightGrad)
                    {
                        self.layers[self.index].start_waiting(TrainingPhase::WeightGrad, now);
                        return Ok(());
                    }
                    self.layers[self.index].stop_waiting(TrainingPhase::WeightGrad, now);

                    if !self.collective_issued {
                        self.collective_issued = true;
                        self.issue_collective(
                            TrainingPhase::Forward,
                            PriorityPolicy::None,
                            node,
                            queue,
                        )?;
                    }
                    if !self.layers[self.index].comm_finished(TrainingPhase::Forward) {
                        self.layers[self.index].start_waiting(TrainingPhase::Forward, now);
                        return Ok(());
                    }
                    self.layers[self.index].stop_waiting(TrainingPhase::Forward, now);

                    self.reset_progress();
                    if self.state == FsmState::ForwardInBackPass {
                        if self.index + 1 == self.recompute_target {
                            self.index = self.recompute_target;
                            self.state = FsmState::InputGradient;
                        } else {
                            self.index += 1;
                        }
                    } else if self.index + 1 == self.layers.len() {
                        if self.header.policy.forward_only() {
                            self.finish_pass(time);
                            if self.state != FsmState::WaitForSimFinish {
                                self.index = 0;
                            }
                        } else {
                            self.index = self.layers.len() - 1;
                            self.state = FsmState::InputGradient;
                        }
                    } else {
                        self.index += 1;
                    }
                }

                FsmState::InputGradient => {
                    if !self.delay_loaded
                        && self.layers[self.index].needs_recompute_trigger
                        && !self.checkpoint_initiated
                    {
                        // Recompute activations from the nearest checkpoint.
                        let Some(checkpoint) = (0..self.index)
                            .rev()
                            .find(|layer| self.layers[*layer].is_checkpoint)
                        else {
                            return sim_error!(
                                "recompute trigger at layer {} with no earlier checkpoint",
                                self.index
                            );
                        };
                        debug!(self.entity ; "recompute layers {checkpoint}..{} before backward",
                               self.index);
                        self.checkpoint_initiated = true;
                        self.recompute_target = self.index;
                        self.state = FsmState::ForwardInBackPass;
                        self.index = checkpoint;
                        continue;
                    }
                    if !self.delay_loaded {
                        self.load_compute_delay(TrainingPhase::InputGrad, node, queue);
                        return Ok(());
                    }
                    if !self.compute_done {
                        return Ok(());
                    }
                    if !self.collective_issued {
                        self.collective_issued = true;
                        self.issue_collective(
                            TrainingPhase::InputGrad,
                            PriorityPolicy::Lifo,
                            node,
                            queue,
                        )?;
                    }
                    if !self.layers[self.index].comm_finished(TrainingPhase::InputGrad) {
                        self.layers[self.index].start_waiting(TrainingPhase::InputGrad, now);
                        return Ok(());
                    }
                    self.layers[self.index].stop_waiting(TrainingPhase::InputGrad, now);

                    self.reset_progress();
                    if self.layers[self.index].needs_recompute_trigger {
                        self.checkpoint_initiated = false;
                    }
                    self.state = FsmState::WeightGradient;
                }

                FsmState::WeightGradient => {
                    if !self.delay_loaded {
                        self.load_compute_delay(TrainingPhase::WeightGrad, node, queue);
                        return Ok(());
                    }
                    if !self.compute_done {
                        return Ok(());
                    }
                    if !self.collective_issued {
                        self.collective_issued = true;
                        // Non-blocking: the next iteration's forward pass
                        // waits on it per layer.
                        self.issue_collective(
                            TrainingPhase::WeightGrad,
                            PriorityPolicy::Fifo,
                            node,
                            queue,
                        )?;
                    }
                    // The gradient fed into the all-reduce must exist.
                    if !self.layers[self.index].comm_finished(TrainingPhase::InputGrad) {
                        self.layers[self.index].start_waiting(TrainingPhase::InputGrad, now);
                        return Ok(());
                    }
                    self.layers[self.index].stop_waiting(TrainingPhase::InputGrad, now);

                    self.reset_progress();
                    if self.index == 0 {
                        self.finish_pass(time);
                        if self.state != FsmState::WaitForSimFinish {
                            self.index = 0;
                            self.state = FsmState::ForwardPass;
                        }
                    } else {
                        self.index -= 1;
                        self.state = FsmState::InputGradient;
                    }
                }

                FsmState::WaitForSimFinish => {
                    if node.streams_injected == node.streams_finished {
                        self.finished = true;
                        self.finish_tick = Some(now);
                        info!(self.entity ; "all passes finished at time {} ns", time.now_ns());
                    }
                    // Otherwise wait: every batch completion re-enters here,
                    // and the kernel reports a hang if none ever does.
                    return Ok(());
                }
            }
        }
    }

    fn finish_pass(&mut self, time: &SimTime) {
        self.pass += 1;
        info!(self.entity ; "pass {} finished at {} ns", self.pass, time.now_ns());
        if self.pass == self.total_pass {
            self.state = FsmState::WaitForSimFinish;
        }
    }
}

impl WorkloadDriver for Workload {
    fn tick(
        &mut self,
        node: &mut Node,
        queue: &mut EventQueue<SysEvent>,
        time: &SimTime,
    ) -> SimResult {
        if self.compute_pending {
            self.compute_pending = false;
            self.compute_done = true;
        }
        self.step(node, queue, time)
    }

    fn batch_done(
        &mut self,
        node: &mut Node,
        batch: BatchId,
        queue: &mut EventQueue<SysEvent>,
        time: &SimTime,
    ) -> SimResult {
        let Some((index, phase)) = self.batch_owner.remove(&batch) else {
            return sim_error!("completion for unknown batch {batch}");
        };
        node.take_batch(batch)?;
        if !self.layers[index].batch_done(phase, batch) {
            return sim_error!("batch {batch} was not outstanding on layer {index} {phase}");
        }
        self.step(node, queue, time)
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
