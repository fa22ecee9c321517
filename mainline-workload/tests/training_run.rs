// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Whole-workload runs on small clusters.

use std::rc::Rc;

use mainline_collectives::topology::TopologyMap;
use mainline_engine::engine::Engine;
use mainline_engine::test_helpers::quiet_engine;
use mainline_engine::types::NodeId;
use mainline_system::cluster::{Cluster, SysEvent};
use mainline_system::config::SystemConfig;
use mainline_system::net::{AnalyticalNetwork, LogGpParams};
use mainline_workload::fsm::Workload;
use mainline_workload::parser::{GroupKind, WorkloadFile};

fn run_cluster(
    workload_text: &str,
    dims: &[usize],
    cfg: SystemConfig,
    passes: usize,
) -> (Engine<SysEvent>, Cluster<Workload>) {
    let engine: Engine<SysEvent> = quiet_engine();
    let file = WorkloadFile::from_str(workload_text).unwrap();
    let topo = TopologyMap::with_kinds(dims.to_vec(), cfg.impls.topology_kinds()).unwrap();
    let cfg = Rc::new(cfg);
    let net = AnalyticalNetwork::new(dims.to_vec(), Vec::new(), LogGpParams::default());
    let drivers: Vec<Workload> = (0..topo.total_nodes())
        .map(|_| Workload::new(engine.top(), &file, &topo, passes).unwrap())
        .collect();
    let mut cluster = Cluster::new(engine.top(), &topo, &cfg, Box::new(net), drivers).unwrap();

    let mut engine = engine;
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster).unwrap();
    cluster.check_finished().unwrap();
    (engine, cluster)
}

const PURE_DP: &str = "\
DATA
2
l0 -1 100 NONE 0 100 NONE 0 100 ALLREDUCE 4096 0
l1 -1 100 NONE 0 100 NONE 0 100 ALLREDUCE 4096 0
";

#[test]
fn pure_data_parallel_one_pass() {
    let (engine, cluster) = run_cluster(PURE_DP, &[4], SystemConfig::default(), 1);

    for n in 0..4 {
        let node = cluster.node(NodeId(n));
        let workload = cluster.driver(NodeId(n));
        assert_eq!(workload.passes_finished(), 1);
        // One weight-gradient all-reduce per layer, nothing else.
        assert_eq!(node.streams_injected, 2);
        assert_eq!(node.streams_finished, 2);
        for layer in &workload.layers {
            assert_eq!(layer.stats.issued, [0, 0, 1]);
        }
    }
    assert!(engine.time.now() > 0);
}

const TRANSFORMER_2X2: &str = "\
HYBRID_TRANSFORMER model_parallel_NPU_group: 2
3
l0 -1 100 ALLGATHER 4096 100 REDUCESCATTER 4096 100 ALLREDUCE 4096 0
l1 -1 100 ALLGATHER 4096 100 REDUCESCATTER 4096 100 ALLREDUCE 4096 0
l2 -1 100 ALLGATHER 4096 100 REDUCESCATTER 4096 100 ALLREDUCE 4096 0
";

#[test]
fn transformer_tp2_dp2_two_passes() {
    let (_, cluster) = run_cluster(TRANSFORMER_2X2, &[2, 2], SystemConfig::default(), 2);

    for n in 0..4 {
        let node = cluster.node(NodeId(n));
        let workload = cluster.driver(NodeId(n));
        assert_eq!(workload.passes_finished(), 2);
        // Per pass: 3 fwd + 3 ig on the TP dimension, 3 wg on the DP
        // dimension.
        assert_eq!(node.streams_injected, 18);
        assert_eq!(node.streams_finished, 18);
        for layer in &workload.layers {
            assert_eq!(layer.stats.issued, [2, 2, 2]);
        }
        // Blocking barriers exposed TP communication; the wg dependency of
        // pass two may add DP exposure.
        let tp_exposed: u64 = workload
            .layers
            .iter()
            .map(|layer| layer.exposed_for(GroupKind::Tp))
            .sum();
        assert!(tp_exposed > 0);
    }
}

const RECOMPUTE: &str = "\
HYBRID_TRANSFORMER_FWD_IN_BCKWD checkpoints: 2 0 4 checkpoint_initiates: 2 3 7
8
l0 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l1 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l2 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l3 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l4 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l5 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l6 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
l7 -1 10 NONE 0 10 NONE 0 10 ALLREDUCE 4096 0
";

#[test]
fn activation_recomputation_reruns_forward_segments() {
    let (_, cluster) = run_cluster(RECOMPUTE, &[2], SystemConfig::default(), 1);

    let workload = cluster.driver(NodeId(0));
    assert_eq!(workload.passes_finished(), 1);
    // Backward reach of layer 7 re-runs forwards 4..7; backward reach of
    // layer 3 re-runs forwards 0..3. Everything else runs forward once.
    let fwd = |i: usize| workload.layers[i].stats.compute_cycles[0];
    for i in [0, 1, 2, 4, 5, 6] {
        assert_eq!(fwd(i), 20, "layer {i}");
    }
    for i in [3, 7] {
        assert_eq!(fwd(i), 10, "layer {i}");
    }
}

#[test]
fn forward_only_inference_runs_no_backward() {
    let text = "\
DISTRIBUTED_INFERENCE model_parallel_NPU_group: 2
2
l0 -1 50 ALLGATHER 4096 0 NONE 0 0 NONE 0 0
l1 -1 50 ALLGATHER 4096 0 NONE 0 0 NONE 0 0
";
    let (_, cluster) = run_cluster(text, &[2], SystemConfig::default(), 3);
    let workload = cluster.driver(NodeId(0));
    assert_eq!(workload.passes_finished(), 3);
    for layer in &workload.layers {
        assert_eq!(layer.stats.issued, [3, 0, 0]);
        assert_eq!(layer.stats.compute_cycles[1], 0);
    }
}
