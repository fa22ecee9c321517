// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! End-to-end runs of single collectives through the cluster.

mod common;

use common::one_shot_cluster;
use mainline_collectives::op::CollectiveOp;
use mainline_collectives::phase::CollectiveOptimization;
use mainline_system::config::SystemConfig;

#[test]
fn ring_all_reduce_converges_on_every_node() {
    let (mut engine, mut cluster) = one_shot_cluster(
        &[4],
        SystemConfig::default(),
        CollectiveOp::AllReduce,
        64 * 1024,
    );
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
    assert!(engine.time.now() > 0);

    for n in 0..cluster.num_nodes() {
        let node = cluster.node(mainline_engine::types::NodeId(n));
        assert_eq!(node.streams_injected, node.streams_finished);
        assert_eq!(node.live_streams(), 0);
        assert_eq!(node.pending_sends().outstanding(), 0);
        // 2(N-1) reducing and gathering steps touched memory.
        assert!(node.membus().bytes_read > 0);
    }
}

#[test]
fn two_dimensional_all_reduce_with_local_bw_aware() {
    let cfg = SystemConfig {
        optimization: CollectiveOptimization::LocalBwAware,
        ..SystemConfig::default()
    };
    let (mut engine, mut cluster) =
        one_shot_cluster(&[2, 2], cfg, CollectiveOp::AllReduce, 32 * 1024);
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
}

#[test]
fn all_to_all_converges() {
    let (mut engine, mut cluster) = one_shot_cluster(
        &[4],
        SystemConfig::default(),
        CollectiveOp::AllToAll,
        16 * 1024,
    );
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
}

#[test]
fn multi_chunk_collective_accounts_every_stream() {
    let cfg = SystemConfig {
        preferred_chunk_bytes: 16 * 1024,
        active_chunks_per_dimension: 2,
        ..SystemConfig::default()
    };
    let (mut engine, mut cluster) =
        one_shot_cluster(&[4], cfg, CollectiveOp::AllGather, 64 * 1024);
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();

    let node = cluster.node(mainline_engine::types::NodeId(0));
    assert_eq!(node.streams_injected, 4);
}

#[test]
fn rendezvous_transfers_complete() {
    // Force every ring message through the rendezvous handshake.
    let cfg = SystemConfig {
        rendezvous_threshold_bytes: 1024,
        ..SystemConfig::default()
    };
    let (mut engine, mut cluster) =
        one_shot_cluster(&[4], cfg, CollectiveOp::AllReduce, 64 * 1024);
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
}

#[test]
fn nccl_flow_mode_converges() {
    let cfg = SystemConfig {
        nccl_flow_model: true,
        nccl_channels: 2,
        ..SystemConfig::default()
    };
    let (mut engine, mut cluster) =
        one_shot_cluster(&[4], cfg, CollectiveOp::AllReduce, 256 * 1024);
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
}
