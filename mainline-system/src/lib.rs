// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The per-node execution engine of MAINLINE.
//!
//! A [`Cluster`](crate::cluster::Cluster) owns one [`Node`](crate::node::Node)
//! per accelerator. Each node carries its streams (chunked collectives in
//! flight), the per-dimension queues and their
//! [scheduler](crate::scheduler::StreamScheduler), the serialized send path
//! with rendezvous support, and a memory-bus model. Workloads drive their
//! node through the [`WorkloadDriver`](crate::cluster::WorkloadDriver) seam
//! and are woken through batch-completion events.

pub mod cluster;
pub mod config;
pub mod membus;
pub mod net;
pub mod node;
pub mod scheduler;
pub mod sendrecv;
pub mod stream;
