// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The seam between a collective algorithm and the node executing it.
//!
//! An algorithm never talks to the network or memory models directly; the
//! node hands it a [`Comms`] context for the duration of one callback.
//! Memory and reduction charges accrue on the context and are applied as
//! extra delay to the next send issued through it.

use mainline_engine::types::{Bytes, NodeId, SimResult};

/// What an algorithm callback reports back to the owning stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// More sends or receives are outstanding.
    InFlight,
    /// The phase has completed on this node.
    Done,
}

/// Send/receive and local-cost operations available to an algorithm.
pub trait Comms {
    /// The node this context belongs to.
    fn node(&self) -> NodeId;

    /// The base tag of the phase being executed. Algorithms that need more
    /// than one tag (flow models, double trees) add a small offset.
    fn base_tag(&self) -> u64;

    /// Issue a send of `bytes` to `dst`. Serialized per `(dst, tag)` by the
    /// node; completion is reported through
    /// [`on_send_done`](crate::algorithms::CollectiveAlgorithm::on_send_done).
    fn send(&mut self, dst: NodeId, bytes: Bytes, tag: u64) -> SimResult;

    /// Post a receive of `bytes` from `src`. Receives are not serialized;
    /// the backend matches them by tag.
    fn recv(&mut self, src: NodeId, bytes: Bytes, tag: u64) -> SimResult;

    /// Charge a memory-bus read of `bytes`.
    fn mem_read(&mut self, bytes: Bytes);

    /// Charge a memory-bus write of `bytes`.
    fn mem_write(&mut self, bytes: Bytes);

    /// Charge one local reduction.
    fn reduction(&mut self);
}
