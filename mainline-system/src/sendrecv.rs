// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Send serialization and receive matching.
//!
//! Sends to one `(dst, tag)` channel are strictly serialized: at most one
//! is in flight, the rest wait in order. Receives are not serialized; the
//! backend matches them by tag, and arrivals that beat their receive are
//! buffered until one is posted.
//!
//! Large transfers use a rendezvous handshake: the receiver announces
//! readiness with a fixed-size control message on `tag +
//! RENDEZVOUS_TAG_OFFSET`, and the sender holds the payload until the
//! control message arrives.

use std::collections::{HashMap, VecDeque};

use mainline_engine::events::EventQueue;
use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, NodeId, SimResult};

use crate::cluster::SysEvent;
use crate::net::{NetworkBackend, SendSpec};

/// The distinguished tag range for rendezvous control messages.
pub const RENDEZVOUS_TAG_OFFSET: u64 = 500_000_000;

/// Fixed size of a rendezvous control message.
pub const RENDEZVOUS_CONTROL_BYTES: Bytes = 8192;

/// Per-`(dst, tag)` serialized send channels.
#[derive(Default)]
pub struct PendingSends {
    /// Queued sends per busy channel.
    queued: HashMap<(NodeId, u64), VecDeque<SendSpec>>,
    /// Channels with a send in flight.
    inflight: Vec<(NodeId, u64)>,
}

impl PendingSends {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `spec` to the backend, or queue it behind the in-flight send
    /// on its channel.
    pub fn submit(
        &mut self,
        spec: SendSpec,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let key = (spec.dst, spec.tag);
        if self.inflight.contains(&key) {
            self.queued.entry(key).or_default().push_back(spec);
            Ok(())
        } else {
            self.inflight.push(key);
            net.send(&spec, queue)
        }
    }

    /// The channel's in-flight send completed; fire the next queued one.
    pub fn on_packet_sent(
        &mut self,
        dst: NodeId,
        tag: u64,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let key = (dst, tag);
        let Some(position) = self.inflight.iter().position(|k| *k == key) else {
            return sim_error!("send completion for idle channel ({dst}, {tag})");
        };
        let next = self.queued.get_mut(&key).and_then(VecDeque::pop_front);
        match next {
            Some(spec) => net.send(&spec, queue),
            None => {
                self.inflight.swap_remove(position);
                self.queued.remove(&key);
                Ok(())
            }
        }
    }

    /// Whether a send is in flight on `(dst, tag)`. Test hook.
    #[must_use]
    pub fn is_inflight(&self, dst: NodeId, tag: u64) -> bool {
        self.inflight.contains(&(dst, tag))
    }

    /// Number of sends queued behind the in-flight one. Test hook.
    #[must_use]
    pub fn queued_len(&self, dst: NodeId, tag: u64) -> usize {
        self.queued.get(&(dst, tag)).map_or(0, VecDeque::len)
    }

    /// Total sends neither completed nor rejected.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inflight.len() + self.queued.values().map(VecDeque::len).sum::<usize>()
    }
}

/// Posted receives and early arrivals, matched by tag and source.
#[derive(Default)]
pub struct PostedRecvs {
    posted: HashMap<u64, Vec<(NodeId, Bytes)>>,
    arrived: HashMap<u64, VecDeque<(NodeId, Bytes)>>,
}

impl PostedRecvs {
    /// Create an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a receive. If a matching message already arrived it is returned
    /// and the caller must redeliver it; the posted entry stays behind for
    /// the redelivery to consume.
    pub fn post(&mut self, src: NodeId, bytes: Bytes, tag: u64) -> Option<(NodeId, Bytes)> {
        self.posted.entry(tag).or_default().push((src, bytes));
        let arrivals = self.arrived.get_mut(&tag)?;
        let position = arrivals.iter().position(|(from, _)| *from == src)?;
        let arrival = arrivals.remove(position);
        if arrivals.is_empty() {
            self.arrived.remove(&tag);
        }
        arrival
    }

    /// A message arrived. Returns true if a posted receive matched (and was
    /// consumed); otherwise the message is buffered.
    pub fn on_arrival(&mut self, src: NodeId, tag: u64, bytes: Bytes) -> bool {
        if let Some(entries) = self.posted.get_mut(&tag) {
            if let Some(position) = entries.iter().position(|(from, _)| *from == src) {
                entries.swap_remove(position);
                if entries.is_empty() {
                    self.posted.remove(&tag);
                }
                return true;
            }
        }
        self.arrived.entry(tag).or_default().push_back((src, bytes));
        false
    }

    /// Receives posted and not yet matched.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.posted.values().map(Vec::len).sum()
    }
}
