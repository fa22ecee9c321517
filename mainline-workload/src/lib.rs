// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Training workloads for MAINLINE.
//!
//! A workload file describes the layers of one training iteration and the
//! parallelisation strategy. The [`Workload`](crate::fsm::Workload) state
//! machine walks those layers on every node - forward, input-gradient,
//! weight-gradient, with activation recomputation where checkpoints demand
//! it - issuing compute delays and collectives with the dependency ordering
//! of synchronous data/tensor/expert-parallel training.

pub mod fsm;
pub mod layer;
pub mod parser;
pub mod pipeline;
pub mod reports;
