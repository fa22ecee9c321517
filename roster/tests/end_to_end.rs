// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Full runs over the demo inputs.

use std::path::{Path, PathBuf};

use mainline_track::tracker::dev_null_tracker;
use roster::{ClusterSpec, RunConfig, run};

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../demos")
        .join(name)
}

fn demo_config(workload: &str) -> RunConfig {
    RunConfig {
        threads: 1,
        workload: demo(workload),
        network: demo("cluster.yaml"),
        system: demo("system.cfg"),
        num_gpus: Some(4),
        result_dir: None,
        passes: 1,
        nvls_override: None,
    }
}

#[test]
fn transformer_demo_runs_to_completion() {
    let tracker = dev_null_tracker();
    let summary = run(&demo_config("transformer.workload"), &tracker).unwrap();
    assert_eq!(summary.passes, 1);
    assert!(summary.time_ns > 0.0);
    // 2 TP collectives x 2 layers + 3 wg all-reduces.
    assert!(summary.streams_per_node >= 7);
}

#[test]
fn data_parallel_demo_runs_to_completion() {
    let tracker = dev_null_tracker();
    let mut config = demo_config("dp.workload");
    config.passes = 2;
    let summary = run(&config, &tracker).unwrap();
    assert_eq!(summary.passes, 2);
}

#[test]
fn reports_are_written() {
    let tracker = dev_null_tracker();
    let dir = std::env::temp_dir().join("roster-report-test");
    let _ = std::fs::remove_dir_all(&dir);

    let mut config = demo_config("transformer.workload");
    config.result_dir = Some(dir.clone());
    run(&config, &tracker).unwrap();

    let summary = std::fs::read_to_string(dir.join("summary.csv")).unwrap();
    assert!(summary.starts_with("layer,"));
    assert!(summary.lines().count() >= 5);
    let util = std::fs::read_to_string(dir.join("dim_util.csv")).unwrap();
    assert!(util.starts_with("dim,"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn gpu_count_mismatch_is_fatal() {
    let tracker = dev_null_tracker();
    let mut config = demo_config("dp.workload");
    config.num_gpus = Some(8);
    let err = run(&config, &tracker).unwrap_err();
    assert!(format!("{err}").contains("does not match"));
}

#[test]
fn cluster_spec_parses() {
    let spec = ClusterSpec::from_file(&demo("cluster.yaml")).unwrap();
    assert_eq!(spec.dims, vec![2, 2]);
    assert_eq!(spec.links.len(), 2);
}
