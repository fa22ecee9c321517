// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Collective-communication planning and execution for MAINLINE.
//!
//! This crate turns a logical collective operation (all-reduce, all-gather,
//! reduce-scatter, all-to-all) over a multi-dimensional cluster topology
//! into an ordered list of single-dimension *phases*, and provides the
//! algorithm state machines that execute one phase each by driving
//! send/receive calls through the [`Comms`](crate::comms::Comms) seam.
//!
//! The pieces, leaves first:
//!
//!  - [`topology`]: the static map of every node's position in each logical
//!    topology over each physical dimension.
//!  - [`algorithms`]: the `CollectiveAlgorithm` family (ring, recursive
//!    halving/doubling, double binary tree, direct exchange, and the
//!    NCCL-accurate flow model).
//!  - [`phase`]: the generator composing operation x involved-dimensions x
//!    size into chunks and per-chunk phase lists.
//!  - [`planner`]: exact send/recv plans for the NCCL-accurate mode.

pub mod algorithms;
pub mod comms;
pub mod op;
pub mod phase;
pub mod planner;
pub mod topology;
