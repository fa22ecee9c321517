// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Streams and stream batches.
//!
//! A *stream* is one chunk of a collective together with its ordered list of
//! phases. A *batch* is the set of chunk-streams generated from one
//! collective issuance; it carries the notifier that wakes the issuing layer
//! once every chunk has finished.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use mainline_collectives::op::TrainingPhase;
use mainline_collectives::phase::CollectivePhase;
use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, SimError, Tick};

use crate::sendrecv::RENDEZVOUS_TAG_OFFSET;

/// Unique (per cluster run) identity of a stream.
///
/// All nodes issue the same collectives in the same order, so corresponding
/// chunks carry the same id everywhere; the id is what pairs a sender's
/// traffic with the receiver's stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identity of a stream batch on its issuing node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Tags per phase (lanes): the double binary tree uses two, everything else
/// uses lane 0.
pub const TAG_LANE_SPAN: u64 = 4;

/// Phases per stream in the tag space.
pub const TAG_PHASE_SPAN: u64 = 64;

/// The wire tag of `phase_index` of `stream` (lane 0).
#[must_use]
pub fn base_tag(stream: StreamId, phase_index: usize) -> u64 {
    (stream.0 * TAG_PHASE_SPAN + phase_index as u64) * TAG_LANE_SPAN
}

/// The stream a wire tag belongs to.
#[must_use]
pub fn stream_of_tag(tag: u64) -> StreamId {
    StreamId(tag / TAG_LANE_SPAN / TAG_PHASE_SPAN)
}

/// The highest stream id whose tags stay clear of the rendezvous range.
#[must_use]
pub fn max_stream_id() -> u64 {
    RENDEZVOUS_TAG_OFFSET / TAG_LANE_SPAN / TAG_PHASE_SPAN - 1
}

/// How a collective's priority is assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityPolicy {
    /// Fall back to the system-wide scheduling policy.
    None,
    /// Earlier streams run first.
    Fifo,
    /// Later streams run first.
    Lifo,
    /// Ahead of everything.
    Highest,
}

impl PriorityPolicy {
    /// Parse the system-config spelling (`scheduling-policy`).
    pub fn parse(raw: &str) -> Result<Self, SimError> {
        match raw {
            "FIFO" => Ok(Self::Fifo),
            "LIFO" => Ok(Self::Lifo),
            _ => sim_error!("unknown scheduling-policy '{raw}'"),
        }
    }
}

/// Lifecycle of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Built but not yet admitted to a queue.
    Created,
    /// In a per-dimension queue, waiting to be initialized.
    Ready,
    /// Its current phase is executing.
    Executing,
    /// All phases complete.
    Finished,
}

/// One chunk of a collective and its remaining phases.
pub struct Stream {
    /// Unique id (also the base of this stream's wire tags).
    pub id: StreamId,
    /// The batch this chunk belongs to.
    pub batch: BatchId,
    /// Position of this chunk within its batch.
    pub chunk_index: usize,
    /// Remaining phases, front first.
    pub phases: VecDeque<CollectivePhase>,
    /// The phase currently executing, moved out of `phases`.
    pub current: Option<CollectivePhase>,
    /// Phases completed so far; monotonic, terminates at the phase count.
    pub steps_finished: usize,
    /// Total number of phases generated for this chunk.
    pub total_phases: usize,
    /// Size of the chunk as issued.
    pub initial_data_size: Bytes,
    /// Scheduling priority from the issuing policy.
    pub priority: i64,
    /// Lifecycle state.
    pub state: StreamState,
    /// Whether the scheduler has started this stream in its current queue.
    pub initialized: bool,
    /// Tick the stream was created.
    pub created_at: Tick,
    /// Tick the current phase was started.
    pub phase_started_at: Tick,
}

impl Stream {
    /// Phases not yet completed.
    #[must_use]
    pub fn remaining_phases(&self) -> usize {
        self.total_phases - self.steps_finished
    }

    /// The dimension the stream wants to run on next.
    #[must_use]
    pub fn next_dim(&self) -> Option<usize> {
        match &self.current {
            Some(phase) => Some(phase.dim),
            None => self.phases.front().map(|phase| phase.dim),
        }
    }

    /// The wire tag base of the current phase.
    #[must_use]
    pub fn current_base_tag(&self) -> u64 {
        base_tag(self.id, self.steps_finished)
    }
}

/// Owning table of a node's live streams, keyed by id.
///
/// Ids are never reused, so a handle can never silently alias a different
/// stream.
pub type StreamTable = HashMap<StreamId, Stream>;

/// The set of chunk-streams generated from one collective issuance.
pub struct StreamBatch {
    /// Identity on the issuing node.
    pub id: BatchId,
    /// Tick the collective was issued.
    pub created_at: Tick,
    /// Tick the last chunk finished.
    pub finished_at: Option<Tick>,
    /// Chunks still live.
    pub live_streams: usize,
    /// False for a zero-cost batch (nothing participates).
    pub active: bool,
    /// The layer and phase to wake when the batch completes.
    pub notify: Option<(usize, TrainingPhase)>,
}

impl StreamBatch {
    /// Whether every chunk has finished.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.live_streams == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_decode_to_their_stream() {
        for stream in [0u64, 1, 57, 100_000] {
            for phase in [0usize, 1, 5, 63] {
                let tag = base_tag(StreamId(stream), phase);
                assert_eq!(stream_of_tag(tag), StreamId(stream));
                assert_eq!(stream_of_tag(tag + TAG_LANE_SPAN - 1), StreamId(stream));
            }
        }
    }

    #[test]
    fn tag_space_stays_clear_of_rendezvous_offset() {
        let tag = base_tag(StreamId(max_stream_id()), (TAG_PHASE_SPAN - 1) as usize);
        assert!(tag + TAG_LANE_SPAN <= RENDEZVOUS_TAG_OFFSET);
    }

    #[test]
    fn parse_priority_policy() {
        assert_eq!(PriorityPolicy::parse("LIFO").unwrap(), PriorityPolicy::Lifo);
        assert_eq!(PriorityPolicy::parse("FIFO").unwrap(), PriorityPolicy::Fifo);
        assert!(PriorityPolicy::parse("RANDOM").is_err());
    }
}
