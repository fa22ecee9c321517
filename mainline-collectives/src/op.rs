// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The collective operations and the training phases that issue them.

use std::fmt;

use mainline_engine::sim_error;
use mainline_engine::types::SimError;

/// A group communication pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    /// Reduce across all members, result everywhere.
    AllReduce,
    /// Concatenate every member's shard everywhere.
    AllGather,
    /// Reduce across all members, each member keeps one shard.
    ReduceScatter,
    /// Every member exchanges a distinct shard with every other member.
    AllToAll,
}

impl CollectiveOp {
    /// Parse the workload-file spelling of an operation.
    ///
    /// `NONE` parses to `Ok(None)`; anything unknown is a fatal
    /// configuration error.
    pub fn parse(raw: &str) -> Result<Option<Self>, SimError> {
        match raw {
            "NONE" => Ok(None),
            "ALLREDUCE" => Ok(Some(Self::AllReduce)),
            "ALLGATHER" => Ok(Some(Self::AllGather)),
            "REDUCESCATTER" => Ok(Some(Self::ReduceScatter)),
            "ALLTOALL" => Ok(Some(Self::AllToAll)),
            _ => sim_error!("unknown collective kind '{raw}'"),
        }
    }
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AllReduce => write!(f, "ALLREDUCE"),
            Self::AllGather => write!(f, "ALLGATHER"),
            Self::ReduceScatter => write!(f, "REDUCESCATTER"),
            Self::AllToAll => write!(f, "ALLTOALL"),
        }
    }
}

/// Which part of a training iteration an operation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrainingPhase {
    /// Forward pass.
    Forward,
    /// Backward pass, input gradients.
    InputGrad,
    /// Backward pass, weight gradients.
    WeightGrad,
}

impl TrainingPhase {
    /// All phases, in forward-pass-first order.
    pub const ALL: [TrainingPhase; 3] = [Self::Forward, Self::InputGrad, Self::WeightGrad];

    /// A stable index for per-phase tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::InputGrad => 1,
            Self::WeightGrad => 2,
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "fwd"),
            Self::InputGrad => write!(f, "ig"),
            Self::WeightGrad => write!(f, "wg"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_kinds() {
        assert_eq!(CollectiveOp::parse("NONE").unwrap(), None);
        assert_eq!(
            CollectiveOp::parse("ALLREDUCE").unwrap(),
            Some(CollectiveOp::AllReduce)
        );
        assert_eq!(
            CollectiveOp::parse("REDUCESCATTER").unwrap(),
            Some(CollectiveOp::ReduceScatter)
        );
    }

    #[test]
    fn parse_unknown_kind_fails() {
        let err = CollectiveOp::parse("BROADCAST").unwrap_err();
        assert!(format!("{err}").contains("BROADCAST"));
    }

    #[test]
    fn display_round_trips() {
        for op in [
            CollectiveOp::AllReduce,
            CollectiveOp::AllGather,
            CollectiveOp::ReduceScatter,
            CollectiveOp::AllToAll,
        ] {
            assert_eq!(CollectiveOp::parse(&format!("{op}")).unwrap(), Some(op));
        }
    }
}
