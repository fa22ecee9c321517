// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The collective stream scheduler.
//!
//! Concurrency is governed on three levels: at most `queue_threshold`
//! initialized streams per dimension, at most `max_running_streams` in
//! total, and a `ready_list_threshold` gating eager admission of brand-new
//! streams. Within one dimension's queue an insertion policy decides where
//! a stream waits; an already-initialized stream is never overtaken by a
//! newly inserted one of equal priority.

use std::collections::VecDeque;

use mainline_engine::sim_error;
use mainline_engine::types::{SimError, Tick};

use crate::stream::{StreamId, StreamTable};

/// Where a newly inserted stream lands within its dimension queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntraDimPolicy {
    /// After all streams of equal or higher priority.
    Fifo,
    /// FIFO, but the (reduce-scatter, all-gather) pair split from one
    /// decomposition stays adjacent. The pairing key is the originating
    /// batch plus chunk index.
    Rg,
    /// Ascending initial data size.
    SmallestFirst,
    /// Ascending remaining phase count.
    LessRemainingPhaseFirst,
}

impl IntraDimPolicy {
    /// Parse the system-config spelling (`intra-dimension-scheduling`).
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "FIFO" => Ok(Self::Fifo),
            "RG" => Ok(Self::Rg),
            "smallestFirst" => Ok(Self::SmallestFirst),
            "lessRemainingPhaseFirst" => Ok(Self::LessRemainingPhaseFirst),
            _ => sim_error!("unknown intra-dimension-scheduling '{raw}'"),
        }
    }
}

/// Per-dimension latency and occupancy accounting.
#[derive(Clone, Debug, Default)]
pub struct DimStats {
    /// Sum of phase latencies completed on this dimension.
    pub latency_ticks: u64,
    /// Phases completed on this dimension.
    pub completed: u64,
    /// Closed busy intervals (at least one stream running).
    pub busy: Vec<(Tick, Tick)>,
    busy_since: Option<Tick>,
}

impl DimStats {
    fn enter(&mut self, now: Tick) {
        if self.busy_since.is_none() {
            self.busy_since = Some(now);
        }
    }

    fn leave(&mut self, now: Tick) {
        if let Some(since) = self.busy_since.take() {
            self.busy.push((since, now));
        }
    }

    /// Close an open busy interval at `now` (end of run).
    pub fn finalize(&mut self, now: Tick) {
        self.leave(now);
    }
}

/// Admission control and per-dimension orderly queues.
pub struct StreamScheduler {
    policy: IntraDimPolicy,

    /// Max initialized streams per dimension.
    pub queue_threshold: usize,
    /// Max initialized streams over all dimensions.
    pub max_running_streams: usize,
    /// Admission gate: stop promoting from the ready list once this many
    /// streams are still executing their first phase.
    pub ready_list_threshold: usize,

    queues: Vec<VecDeque<StreamId>>,
    /// Initialized streams per dimension; never exceeds `queue_threshold`.
    pub running_streams: Vec<usize>,
    /// Streams (chunks) present per dimension queue, initialized or not.
    pub total_active_chunks: Vec<usize>,
    /// Initialized streams over all dimensions.
    pub total_running_streams: usize,
    /// Executing streams still on their first phase.
    pub first_phase_streams: usize,

    stats: Vec<DimStats>,
}

impl StreamScheduler {
    /// A scheduler over `num_dims` dimension queues.
    #[must_use]
    pub fn new(
        num_dims: usize,
        policy: IntraDimPolicy,
        queue_threshold: usize,
        max_running_streams: usize,
        ready_list_threshold: usize,
    ) -> Self {
        Self {
            policy,
            queue_threshold,
            max_running_streams,
            ready_list_threshold,
            queues: vec![VecDeque::new(); num_dims],
            running_streams: vec![0; num_dims],
            total_active_chunks: vec![0; num_dims],
            total_running_streams: 0,
            first_phase_streams: 0,
            stats: vec![DimStats::default(); num_dims],
        }
    }

    /// Rebuild the queue layout after a dimension split. Only legal while
    /// no stream is queued.
    pub fn rebuild(&mut self, num_dims: usize) -> Result<(), SimError> {
        if self.queues.iter().any(|q| !q.is_empty()) {
            return sim_error!("cannot re-shape queues while streams are queued");
        }
        self.queues = vec![VecDeque::new(); num_dims];
        self.running_streams = vec![0; num_dims];
        self.total_active_chunks = vec![0; num_dims];
        self.stats = vec![DimStats::default(); num_dims];
        Ok(())
    }

    /// Number of dimensions.
    #[must_use]
    pub fn num_dims(&self) -> usize {
        self.queues.len()
    }

    /// The queue of one dimension, front first. Test hook.
    #[must_use]
    pub fn queue(&self, dim: usize) -> &VecDeque<StreamId> {
        &self.queues[dim]
    }

    /// Insert `id` into dimension `dim`'s queue at the position its policy
    /// assigns.
    pub fn insert(&mut self, streams: &StreamTable, dim: usize, id: StreamId) {
        let new = &streams[&id];
        let queue = &mut self.queues[dim];

        let mut position = queue.len();
        if self.policy == IntraDimPolicy::Rg {
            // Keep the pair from one decomposition adjacent: directly after
            // the partner if it is queued here.
            let partner = queue.iter().position(|other| {
                let other = &streams[other];
                other.batch == new.batch && other.chunk_index == new.chunk_index
            });
            if let Some(partner) = partner {
                queue.insert(partner + 1, id);
                self.total_active_chunks[dim] += 1;
                return;
            }
        }
        for (i, other) in queue.iter().enumerate() {
            let other = &streams[other];
            if other.initialized {
                // Never overtake a stream the dimension already started.
                continue;
            }
            let overtakes = match self.policy {
                IntraDimPolicy::Fifo | IntraDimPolicy::Rg => other.priority < new.priority,
                IntraDimPolicy::SmallestFirst => {
                    other.initial_data_size > new.initial_data_size
                        || (other.initial_data_size == new.initial_data_size
                            && other.priority < new.priority)
                }
                IntraDimPolicy::LessRemainingPhaseFirst => {
                    other.remaining_phases() > new.remaining_phases()
                        || (other.remaining_phases() == new.remaining_phases()
                            && other.priority < new.priority)
                }
            };
            if overtakes {
                position = i;
                break;
            }
        }
        queue.insert(position, id);
        self.total_active_chunks[dim] += 1;
    }

    /// Head streams of `dim` that should be initialized now, respecting the
    /// per-dimension and global thresholds.
    #[must_use]
    pub fn to_initialize(&self, streams: &StreamTable, dim: usize) -> Vec<StreamId> {
        let mut slots_dim = self
            .queue_threshold
            .saturating_sub(self.running_streams[dim]);
        let mut slots_global = self
            .max_running_streams
            .saturating_sub(self.total_running_streams);
        let mut out = Vec::new();
        for id in &self.queues[dim] {
            if slots_dim == 0 || slots_global == 0 {
                break;
            }
            if streams[id].initialized {
                continue;
            }
            out.push(*id);
            slots_dim -= 1;
            slots_global -= 1;
        }
        out
    }

    /// Account for a stream starting on `dim`.
    pub fn note_started(&mut self, dim: usize, first_phase: bool, now: Tick) {
        self.running_streams[dim] += 1;
        self.total_running_streams += 1;
        if first_phase {
            self.first_phase_streams += 1;
        }
        self.stats[dim].enter(now);
        debug_assert!(self.running_streams[dim] <= self.queue_threshold);
        debug_assert!(self.total_running_streams <= self.max_running_streams);
    }

    /// Remove a stream from `dim` after its phase completed there.
    pub fn remove(&mut self, dim: usize, id: StreamId, first_phase: bool, elapsed: u64, now: Tick) {
        let queue = &mut self.queues[dim];
        if let Some(position) = queue.iter().position(|other| *other == id) {
            queue.remove(position);
        }
        self.total_active_chunks[dim] -= 1;
        self.running_streams[dim] -= 1;
        self.total_running_streams -= 1;
        if first_phase {
            self.first_phase_streams -= 1;
        }
        let stats = &mut self.stats[dim];
        stats.latency_ticks += elapsed;
        stats.completed += 1;
        if self.running_streams[dim] == 0 {
            stats.leave(now);
        }
    }

    /// Whether the eager-admission gate is open.
    #[must_use]
    pub fn can_promote(&self) -> bool {
        self.first_phase_streams < self.ready_list_threshold
            && self.total_running_streams < self.max_running_streams
    }

    /// Whether any global running slot is free.
    #[must_use]
    pub fn has_slots(&self) -> bool {
        self.total_running_streams < self.max_running_streams
    }

    /// Per-dimension accounting, for the utilization report.
    #[must_use]
    pub fn stats(&self, dim: usize) -> &DimStats {
        &self.stats[dim]
    }

    /// Close all open busy intervals at the end of the run.
    pub fn finalize_stats(&mut self, now: Tick) {
        for stats in &mut self.stats {
            stats.finalize(now);
        }
    }
}
