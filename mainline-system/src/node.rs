// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The per-node orchestrator.
//!
//! A node owns its live streams, the per-dimension queues and scheduler,
//! the serialized send path and receive matcher, and the memory-bus model.
//! Collectives are issued through [`Node::generate_collective`]; everything
//! afterwards is event-driven: admitted streams start on `StreamInit`,
//! algorithms advance on `PacketSent`/`PacketReceived`, and completed
//! batches wake their layer through `BatchDone`.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use mainline_collectives::comms::{Comms, Progress};
use mainline_collectives::op::{CollectiveOp, TrainingPhase};
use mainline_collectives::phase::{PhaseGenerator, PlanConfig};
use mainline_collectives::topology::TopologyMap;
use mainline_engine::events::EventQueue;
use mainline_engine::sim_error;
use mainline_engine::types::{Bytes, Cycles, NodeId, SimError, SimResult};
use mainline_track::entity::Entity;
use mainline_track::{debug, trace};

use crate::cluster::SysEvent;
use crate::config::SystemConfig;
use crate::membus::MemBus;
use crate::net::{NetworkBackend, SendSpec};
use crate::scheduler::StreamScheduler;
use crate::sendrecv::{
    PendingSends, PostedRecvs, RENDEZVOUS_CONTROL_BYTES, RENDEZVOUS_TAG_OFFSET,
};
use crate::stream::{
    BatchId, PriorityPolicy, Stream, StreamBatch, StreamId, StreamState, StreamTable,
    max_stream_id, stream_of_tag,
};

/// One collective issuance.
#[derive(Clone, Debug)]
pub struct CollectiveRequest {
    /// The logical operation.
    pub op: CollectiveOp,
    /// Message size before chunking.
    pub bytes: Bytes,
    /// Which physical dimensions take part.
    pub involved: Vec<bool>,
    /// Priority policy for the generated streams.
    pub policy: PriorityPolicy,
    /// The training phase issuing the collective.
    pub phase: TrainingPhase,
    /// Layer and phase to wake when the batch completes.
    pub notify: Option<(usize, TrainingPhase)>,
}

/// The per-node execution engine.
pub struct Node {
    /// This node's identity.
    pub id: NodeId,
    /// Track entity for logging.
    pub entity: Rc<Entity>,
    /// This node's view of the cluster topology.
    pub topo: TopologyMap,
    /// Shared system configuration.
    pub cfg: Rc<SystemConfig>,
    /// The stream scheduler and its per-dimension queues.
    pub scheduler: StreamScheduler,
    /// Streams issued (chunks) over the node's lifetime.
    pub streams_injected: u64,
    /// Streams fully completed.
    pub streams_finished: u64,

    plan: PlanConfig,
    streams: StreamTable,
    batches: HashMap<BatchId, StreamBatch>,
    ready_list: VecDeque<StreamId>,
    pending_sends: PendingSends,
    posted_recvs: PostedRecvs,
    rendezvous_stash: HashMap<(NodeId, u64), VecDeque<SendSpec>>,
    rendezvous_ready: HashMap<(NodeId, u64), usize>,
    membus: MemBus,

    next_stream: u64,
    next_batch: u64,
    issue_seq: i64,
}

impl Node {
    /// Create a node.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, id: NodeId, topo: TopologyMap, cfg: Rc<SystemConfig>) -> Self {
        let entity = Rc::new(Entity::new(parent, &format!("node{}", id.0)));
        let scheduler = StreamScheduler::new(
            topo.num_dims(),
            cfg.intra_scheduling,
            cfg.active_chunks_per_dimension,
            cfg.max_running_streams,
            cfg.ready_list_threshold,
        );
        let membus = MemBus::new(cfg.membus_bytes_per_cycle, cfg.model_shared_bus);
        let plan = cfg.plan_config();
        Self {
            id,
            entity,
            topo,
            cfg,
            scheduler,
            streams_injected: 0,
            streams_finished: 0,
            plan,
            streams: StreamTable::new(),
            batches: HashMap::new(),
            ready_list: VecDeque::new(),
            pending_sends: PendingSends::new(),
            posted_recvs: PostedRecvs::new(),
            rendezvous_stash: HashMap::new(),
            rendezvous_ready: HashMap::new(),
            membus,
            next_stream: 0,
            next_batch: 0,
            issue_seq: 0,
        }
    }

    /// Split a dimension so that the leading dimensions cover a group of
    /// `target` nodes. One-shot, during initialisation only.
    pub fn break_dimension(&mut self, target: usize) -> SimResult {
        if !self.streams.is_empty() {
            return sim_error!("{}: cannot break dimensions with live streams", self.id);
        }
        self.topo.break_dimension(target)?;
        self.scheduler.rebuild(self.topo.num_dims())
    }

    fn priority_for(&mut self, policy: PriorityPolicy) -> i64 {
        let effective = match policy {
            PriorityPolicy::None => self.cfg.scheduling_policy,
            other => other,
        };
        self.issue_seq += 1;
        match effective {
            PriorityPolicy::Lifo => self.issue_seq,
            PriorityPolicy::Fifo => -self.issue_seq,
            PriorityPolicy::Highest => i64::MAX,
            PriorityPolicy::None => 0,
        }
    }

    /// Issue one collective: chunk it, build the phase lists, and admit the
    /// streams.
    ///
    /// Returns the batch that completes (via a `BatchDone` event) once all
    /// chunks have finished. A collective in which no dimension
    /// participates, or of zero size, yields an inactive batch that
    /// completes immediately.
    pub fn generate_collective(
        &mut self,
        req: CollectiveRequest,
        queue: &mut EventQueue<SysEvent>,
    ) -> Result<BatchId, SimError> {
        let now = queue.now();
        let batch_id = BatchId(self.next_batch);
        self.next_batch += 1;

        let generator = PhaseGenerator::new(&self.topo, &self.plan);
        let chunks = generator.generate(
            self.id,
            req.op,
            req.bytes,
            &req.involved,
            self.next_stream,
            req.phase,
        )?;

        let mut batch = StreamBatch {
            id: batch_id,
            created_at: now,
            finished_at: None,
            live_streams: chunks.len(),
            active: !chunks.is_empty(),
            notify: req.notify,
        };
        if !batch.active {
            debug!(self.entity ; "{} {} of {} B is inactive", batch_id, req.op, req.bytes);
            batch.finished_at = Some(now);
            self.batches.insert(batch_id, batch);
            queue.register_event(self.id, SysEvent::BatchDone { batch: batch_id }, 0);
            return Ok(batch_id);
        }

        let priority = self.priority_for(req.policy);
        self.batches.insert(batch_id, batch);
        for (chunk_index, phases) in chunks.into_iter().enumerate() {
            if self.next_stream > max_stream_id() {
                return sim_error!("{}: stream tag space exhausted", self.id);
            }
            let id = StreamId(self.next_stream);
            self.next_stream += 1;
            let total_phases = phases.len();
            let initial_data_size = phases.first().map_or(0, |p| p.bytes);
            self.streams.insert(
                id,
                Stream {
                    id,
                    batch: batch_id,
                    chunk_index,
                    phases: VecDeque::from(phases),
                    current: None,
                    steps_finished: 0,
                    total_phases,
                    initial_data_size,
                    priority,
                    state: StreamState::Created,
                    initialized: false,
                    created_at: now,
                    phase_started_at: now,
                },
            );
            self.streams_injected += 1;
            self.ready_list.push_back(id);
        }
        trace!(self.entity ; "{}: {} of {} B, {} chunks", batch_id, req.op, req.bytes,
               self.batches[&batch_id].live_streams);

        if self.cfg.boost_mode || self.scheduler.can_promote() {
            self.schedule(usize::MAX, queue);
        }
        Ok(batch_id)
    }

    /// Promote up to `n` streams from the ready list into their first
    /// dimension queue.
    pub fn schedule(&mut self, n: usize, queue: &mut EventQueue<SysEvent>) {
        let mut promoted = 0;
        while promoted < n && self.scheduler.has_slots() {
            let Some(id) = self.ready_list.pop_front() else {
                break;
            };
            let dim = {
                let stream = self.streams.get_mut(&id).expect("ready stream exists");
                stream.state = StreamState::Ready;
                stream.next_dim().expect("created stream has phases")
            };
            self.scheduler.insert(&self.streams, dim, id);
            self.start_streams(dim, queue);
            promoted += 1;
        }
    }

    /// Initialize head streams of `dim` up to the thresholds.
    fn start_streams(&mut self, dim: usize, queue: &mut EventQueue<SysEvent>) {
        let now = queue.now();
        for id in self.scheduler.to_initialize(&self.streams, dim) {
            let stream = self.streams.get_mut(&id).expect("queued stream exists");
            stream.initialized = true;
            stream.state = StreamState::Executing;
            stream.phase_started_at = now;
            let first_phase = stream.steps_finished == 0;
            stream.current = stream.phases.pop_front();
            debug_assert!(stream.current.is_some());
            self.scheduler.note_started(dim, first_phase, now);
            queue.register_event(self.id, SysEvent::StreamInit { stream: id }, 0);
        }
    }

    /// Run the current phase of a freshly initialized stream.
    pub fn on_stream_init(
        &mut self,
        id: StreamId,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let Some(stream) = self.streams.get_mut(&id) else {
            return sim_error!("{}: init for unknown stream {id}", self.id);
        };
        let base_tag = stream.current_base_tag();
        let Some(mut phase) = stream.current.take() else {
            return sim_error!("{}: stream {id} has no phase to run", self.id);
        };
        trace!(self.entity ; "{id} runs {} {} on dim {}", phase.algorithm.name(), phase.op,
               phase.dim);
        let mut ctx = NodeCtx {
            node: self.id,
            base_tag,
            cfg: &self.cfg,
            pending: &mut self.pending_sends,
            posted: &mut self.posted_recvs,
            stash: &mut self.rendezvous_stash,
            ready: &mut self.rendezvous_ready,
            membus: &mut self.membus,
            accrued: 0,
            net: &mut *net,
            queue: &mut *queue,
        };
        let progress = phase.algorithm.run(&mut ctx)?;
        stream.current = Some(phase);
        if progress == Progress::Done {
            self.finish_phase(id, queue)?;
        }
        Ok(())
    }

    /// One of this node's sends has left.
    pub fn on_packet_sent(
        &mut self,
        dst: NodeId,
        tag: u64,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        self.pending_sends
            .on_packet_sent(dst, tag, &mut *net, &mut *queue)?;
        if tag >= RENDEZVOUS_TAG_OFFSET {
            // A control message left; nothing tracks its completion.
            return Ok(());
        }

        let id = stream_of_tag(tag);
        let Some(stream) = self.streams.get_mut(&id) else {
            return sim_error!("{}: send completion (dst {dst}, tag {tag}) without a stream", self.id);
        };
        let base_tag = stream.current_base_tag();
        let Some(mut phase) = stream.current.take() else {
            return sim_error!("{}: send completion for idle stream {id}", self.id);
        };
        let mut ctx = NodeCtx {
            node: self.id,
            base_tag,
            cfg: &self.cfg,
            pending: &mut self.pending_sends,
            posted: &mut self.posted_recvs,
            stash: &mut self.rendezvous_stash,
            ready: &mut self.rendezvous_ready,
            membus: &mut self.membus,
            accrued: 0,
            net: &mut *net,
            queue: &mut *queue,
        };
        let progress = phase.algorithm.on_send_done(dst, tag, &mut ctx)?;
        stream.current = Some(phase);
        if progress == Progress::Done {
            self.finish_phase(id, queue)?;
        }
        Ok(())
    }

    /// A message addressed to this node has arrived.
    pub fn on_packet_received(
        &mut self,
        src: NodeId,
        tag: u64,
        bytes: Bytes,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        if tag >= RENDEZVOUS_TAG_OFFSET {
            // The receiver is ready: release the next stashed payload for
            // it, or bank the credit until the sender gets there.
            let key = (src, tag - RENDEZVOUS_TAG_OFFSET);
            if let Some(stashed) = self.rendezvous_stash.get_mut(&key) {
                let spec = stashed.pop_front().expect("stash queues are never empty");
                if stashed.is_empty() {
                    self.rendezvous_stash.remove(&key);
                }
                trace!(self.entity ; "rendezvous grant for tag {} to {src}", key.1);
                return self.pending_sends.submit(spec, &mut *net, &mut *queue);
            }
            *self.rendezvous_ready.entry(key).or_insert(0) += 1;
            return Ok(());
        }

        if !self.posted_recvs.on_arrival(src, tag, bytes) {
            // Arrived before its receive was posted; it waits in the
            // matcher.
            return Ok(());
        }

        let id = stream_of_tag(tag);
        let Some(stream) = self.streams.get_mut(&id) else {
            return sim_error!("{}: arrival (src {src}, tag {tag}) without a stream", self.id);
        };
        let base_tag = stream.current_base_tag();
        let Some(mut phase) = stream.current.take() else {
            return sim_error!("{}: arrival for idle stream {id}", self.id);
        };
        let mut ctx = NodeCtx {
            node: self.id,
            base_tag,
            cfg: &self.cfg,
            pending: &mut self.pending_sends,
            posted: &mut self.posted_recvs,
            stash: &mut self.rendezvous_stash,
            ready: &mut self.rendezvous_ready,
            membus: &mut self.membus,
            accrued: 0,
            net: &mut *net,
            queue: &mut *queue,
        };
        let progress = phase.algorithm.on_recv(src, tag, bytes, &mut ctx)?;
        stream.current = Some(phase);
        if progress == Progress::Done {
            self.finish_phase(id, queue)?;
        }
        Ok(())
    }

    /// The current phase of `id` completed: advance the stream and refill
    /// the queues.
    fn finish_phase(&mut self, id: StreamId, queue: &mut EventQueue<SysEvent>) -> SimResult {
        let now = queue.now();
        let (dim, batch_id, stream_done) = {
            let stream = self.streams.get_mut(&id).expect("finishing a live stream");
            let phase = stream.current.take().expect("finishing an executing phase");
            let dim = phase.dim;
            let first_phase = stream.steps_finished == 0;
            stream.steps_finished += 1;
            let elapsed = now - stream.phase_started_at;
            self.scheduler.remove(dim, id, first_phase, elapsed, now);
            (dim, stream.batch, stream.phases.is_empty())
        };

        if stream_done {
            self.streams.remove(&id);
            self.streams_finished += 1;
            trace!(self.entity ; "{id} finished");
            let batch = self
                .batches
                .get_mut(&batch_id)
                .expect("stream batch exists");
            batch.live_streams -= 1;
            if batch.complete() {
                batch.finished_at = Some(now);
                queue.register_event(self.id, SysEvent::BatchDone { batch: batch_id }, 0);
            }
        } else {
            let next_dim = {
                let stream = self.streams.get_mut(&id).expect("stream advances");
                stream.state = StreamState::Ready;
                stream.initialized = false;
                stream.next_dim().expect("phases remain")
            };
            self.scheduler.insert(&self.streams, next_dim, id);
            self.start_streams(next_dim, queue);
        }

        if !self.ready_list.is_empty() && self.scheduler.has_slots() {
            self.schedule(usize::MAX, queue);
        }
        // A global slot freed up: streams waiting anywhere may now start,
        // not only on the dimension that finished.
        self.start_streams(dim, queue);
        if self.scheduler.has_slots() {
            for other in 0..self.scheduler.num_dims() {
                if other != dim {
                    self.start_streams(other, queue);
                }
            }
        }
        Ok(())
    }

    /// Send `bytes` to `dst` on `tag`, serialized per `(dst, tag)` and
    /// subject to the rendezvous handshake above the size threshold.
    pub fn sim_send(
        &mut self,
        dst: NodeId,
        bytes: Bytes,
        tag: u64,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let mut ctx = NodeCtx {
            node: self.id,
            base_tag: tag,
            cfg: &self.cfg,
            pending: &mut self.pending_sends,
            posted: &mut self.posted_recvs,
            stash: &mut self.rendezvous_stash,
            ready: &mut self.rendezvous_ready,
            membus: &mut self.membus,
            accrued: 0,
            net,
            queue,
        };
        ctx.send(dst, bytes, tag)
    }

    /// Post a receive of `bytes` from `src` on `tag`. Not serialized; the
    /// backend matches it by tag.
    pub fn sim_recv(
        &mut self,
        src: NodeId,
        bytes: Bytes,
        tag: u64,
        net: &mut dyn NetworkBackend,
        queue: &mut EventQueue<SysEvent>,
    ) -> SimResult {
        let mut ctx = NodeCtx {
            node: self.id,
            base_tag: tag,
            cfg: &self.cfg,
            pending: &mut self.pending_sends,
            posted: &mut self.posted_recvs,
            stash: &mut self.rendezvous_stash,
            ready: &mut self.rendezvous_ready,
            membus: &mut self.membus,
            accrued: 0,
            net,
            queue,
        };
        ctx.recv(src, bytes, tag)
    }

    /// The batch, if it is still live.
    #[must_use]
    pub fn batch(&self, id: BatchId) -> Option<&StreamBatch> {
        self.batches.get(&id)
    }

    /// Consume a completed batch (it is destroyed with its chunks gone).
    pub fn take_batch(&mut self, id: BatchId) -> Result<StreamBatch, SimError> {
        match self.batches.remove(&id) {
            Some(batch) => Ok(batch),
            None => sim_error!("{}: completion for unknown batch {id}", self.id),
        }
    }

    /// The serialized send path. Test hook.
    #[must_use]
    pub fn pending_sends(&self) -> &PendingSends {
        &self.pending_sends
    }

    /// Memory traffic counters.
    #[must_use]
    pub fn membus(&self) -> &MemBus {
        &self.membus
    }

    /// Streams neither finished nor failed.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }
}

/// The [`Comms`] context a node hands its algorithms for one callback.
///
/// Memory and reduction charges accrue here and ride out as extra delay on
/// the next send.
struct NodeCtx<'a> {
    node: NodeId,
    base_tag: u64,
    cfg: &'a SystemConfig,
    pending: &'a mut PendingSends,
    posted: &'a mut PostedRecvs,
    stash: &'a mut HashMap<(NodeId, u64), VecDeque<SendSpec>>,
    ready: &'a mut HashMap<(NodeId, u64), usize>,
    membus: &'a mut MemBus,
    accrued: Cycles,
    net: &'a mut dyn NetworkBackend,
    queue: &'a mut EventQueue<SysEvent>,
}

impl Comms for NodeCtx<'_> {
    fn node(&self) -> NodeId {
        self.node
    }

    fn base_tag(&self) -> u64 {
        self.base_tag
    }

    fn send(&mut self, dst: NodeId, bytes: Bytes, tag: u64) -> SimResult {
        let spec = SendSpec {
            src: self.node,
            dst,
            bytes,
            tag,
            extra_delay: self.accrued + self.cfg.endpoint_delay,
        };
        self.accrued = 0;
        if bytes < self.cfg.rendezvous_threshold_bytes {
            return self.pending.submit(spec, &mut *self.net, &mut *self.queue);
        }
        let key = (dst, tag);
        if let Some(credits) = self.ready.get_mut(&key) {
            // The receiver already announced readiness.
            *credits -= 1;
            if *credits == 0 {
                self.ready.remove(&key);
            }
            self.pending.submit(spec, &mut *self.net, &mut *self.queue)
        } else {
            // Hold the payload until the receiver's control message grants
            // it.
            self.stash.entry(key).or_default().push_back(spec);
            Ok(())
        }
    }

    fn recv(&mut self, src: NodeId, bytes: Bytes, tag: u64) -> SimResult {
        if bytes >= self.cfg.rendezvous_threshold_bytes {
            let control = SendSpec {
                src: self.node,
                dst: src,
                bytes: RENDEZVOUS_CONTROL_BYTES,
                tag: tag + RENDEZVOUS_TAG_OFFSET,
                extra_delay: self.cfg.endpoint_delay,
            };
            self.pending
                .submit(control, &mut *self.net, &mut *self.queue)?;
        }
        if let Some((from, arrived_bytes)) = self.posted.post(src, bytes, tag) {
            // The message is already here; redeliver it behind this
            // callback.
            self.queue.register_event(
                self.node,
                SysEvent::PacketReceived {
                    src: from,
                    tag,
                    bytes: arrived_bytes,
                },
                0,
            );
        }
        Ok(())
    }

    fn mem_read(&mut self, bytes: Bytes) {
        self.accrued += self.membus.read(bytes);
    }

    fn mem_write(&mut self, bytes: Bytes) {
        self.accrued += self.membus.write(bytes);
    }

    fn reduction(&mut self) {
        self.accrued += self.cfg.local_reduction_delay;
    }
}
