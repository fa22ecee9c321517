// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The network-backend boundary and the default analytical backend.
//!
//! Every send carries `(src, dst, tag, bytes)` plus the extra processing
//! delay the sender accrued. The backend answers with two completion
//! callbacks: `PacketSent(dst, tag)` at the sender once the message has
//! left, and `PacketReceived(src, tag, bytes)` at the destination once it
//! has arrived. The backend is also the time authority; the default
//! analytical backend delegates that to the kernel's [`SimTime`].

use mainline_engine::events::EventQueue;
use mainline_engine::time::SimTime;
use mainline_engine::types::{Bytes, Cycles, NodeId, SimResult};

use crate::cluster::SysEvent;

/// One message handed to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendSpec {
    /// Sending node.
    pub src: NodeId,
    /// Receiving node.
    pub dst: NodeId,
    /// Payload size.
    pub bytes: Bytes,
    /// Wire tag; receives are matched against it.
    pub tag: u64,
    /// Sender-side processing delay accrued before the message may leave.
    pub extra_delay: Cycles,
}

/// The packet-level simulator behind the cluster.
pub trait NetworkBackend {
    /// Accept one message and schedule its completion callbacks.
    fn send(&mut self, spec: &SendSpec, queue: &mut EventQueue<SysEvent>) -> SimResult;

    /// The simulated wall-clock. The node reads time only through this
    /// boundary.
    fn now_ns(&self, time: &SimTime) -> f64 {
        time.now_ns()
    }

    /// The physical dimensions changed (a dimension was split at
    /// `split_at`).
    fn dims_changed(&mut self, _dims: &[usize], _split_at: usize) {}
}

/// LogGP cost parameters, in cycles (and bytes per cycle for `big_g`).
#[derive(Clone, Copy, Debug)]
pub struct LogGpParams {
    /// Wire latency L.
    pub l: Cycles,
    /// Per-message overhead o, charged on both ends.
    pub o: Cycles,
    /// Gap between messages g.
    pub g: Cycles,
    /// Bytes per cycle G (inverse gap per byte).
    pub big_g: f64,
}

impl Default for LogGpParams {
    fn default() -> Self {
        Self {
            l: 500,
            o: 50,
            g: 10,
            big_g: 16.0,
        }
    }
}

/// Per-dimension link parameters.
#[derive(Clone, Copy, Debug)]
pub struct LinkParams {
    /// Bytes per cycle over one link of this dimension.
    pub bytes_per_cycle: f64,
    /// Additional per-hop latency.
    pub latency: Cycles,
}

/// The default backend: a message costs `o + g + bytes/G` at the sender and
/// arrives `L + link latency + o` later. No queueing between distinct
/// `(dst, tag)` channels is modelled; serialization within one channel is
/// the node's job.
pub struct AnalyticalNetwork {
    dims: Vec<usize>,
    links: Vec<LinkParams>,
    logp: LogGpParams,
}

impl AnalyticalNetwork {
    /// A backend for a cluster shaped `dims` with per-dimension `links`.
    ///
    /// A links list shorter than `dims` repeats its last entry; an empty
    /// list uses `logp.big_g` everywhere.
    #[must_use]
    pub fn new(dims: Vec<usize>, links: Vec<LinkParams>, logp: LogGpParams) -> Self {
        Self { dims, links, logp }
    }

    /// The dimension a `src -> dst` hop travels over: the innermost
    /// coordinate where the two differ.
    #[must_use]
    pub fn hop_dim(&self, src: NodeId, dst: NodeId) -> usize {
        let mut a = src.0;
        let mut b = dst.0;
        for (dim, size) in self.dims.iter().enumerate() {
            if a % size != b % size {
                return dim;
            }
            a /= size;
            b /= size;
        }
        0
    }

    fn link(&self, dim: usize) -> LinkParams {
        match self.links.as_slice() {
            [] => LinkParams {
                bytes_per_cycle: self.logp.big_g,
                latency: 0,
            },
            links => links[dim.min(links.len() - 1)],
        }
    }
}

impl NetworkBackend for AnalyticalNetwork {
    fn send(&mut self, spec: &SendSpec, queue: &mut EventQueue<SysEvent>) -> SimResult {
        let link = self.link(self.hop_dim(spec.src, spec.dst));
        let transfer = (spec.bytes as f64 / link.bytes_per_cycle).ceil() as Cycles;
        let sender_busy = spec.extra_delay + self.logp.o + self.logp.g + transfer;

        queue.register_event(
            spec.src,
            SysEvent::PacketSent {
                dst: spec.dst,
                tag: spec.tag,
            },
            sender_busy,
        );
        queue.register_event(
            spec.dst,
            SysEvent::PacketReceived {
                src: spec.src,
                tag: spec.tag,
                bytes: spec.bytes,
            },
            sender_busy + self.logp.l + link.latency + self.logp.o,
        );
        Ok(())
    }

    fn dims_changed(&mut self, dims: &[usize], split_at: usize) {
        self.dims = dims.to_vec();
        if split_at < self.links.len() {
            let link = self.links[split_at];
            self.links.insert(split_at + 1, link);
        }
    }
}
