// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Assembly of a full simulation run: cluster description, system config
//! and workload in, CSV reports out.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mainline_collectives::topology::TopologyMap;
use mainline_engine::engine::Engine;
use mainline_engine::types::{NodeId, SimError, SimResult};
use mainline_system::cluster::{Cluster, SysEvent};
use mainline_system::config::SystemConfig;
use mainline_system::net::{AnalyticalNetwork, LinkParams};
use mainline_track::{Tracker, info};
use mainline_workload::fsm::Workload;
use mainline_workload::parser::WorkloadFile;
use mainline_workload::reports;
use serde::Deserialize;

/// One dimension's link in the cluster description.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LinkSpec {
    /// Link bandwidth in GB/s.
    pub bandwidth_gbps: f64,
    /// Per-hop latency in ns.
    pub latency_ns: f64,
}

/// The cluster description file (`-n`).
#[derive(Clone, Debug, Deserialize)]
pub struct ClusterSpec {
    /// Physical dimension sizes, innermost first.
    pub dims: Vec<usize>,
    /// Per-dimension links (short lists repeat their last entry).
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl ClusterSpec {
    /// Parse the YAML cluster description.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError(format!("unable to read {}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| SimError(format!("{}: {e}", path.display())))
    }

    fn link_params(&self, clock_period_ns: f64) -> Vec<LinkParams> {
        self.links
            .iter()
            .map(|link| LinkParams {
                // GB/s is bytes per ns.
                bytes_per_cycle: link.bandwidth_gbps * clock_period_ns,
                latency: (link.latency_ns / clock_period_ns).ceil() as u64,
            })
            .collect()
    }
}

/// Everything one invocation needs.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Requested backend threads (the analytical backend ignores > 1).
    pub threads: usize,
    /// Workload file path.
    pub workload: PathBuf,
    /// Cluster description path.
    pub network: PathBuf,
    /// System configuration path.
    pub system: PathBuf,
    /// Expected cluster size; checked against the description.
    pub num_gpus: Option<usize>,
    /// Where the CSV reports go; no reports when absent.
    pub result_dir: Option<PathBuf>,
    /// Training iterations to simulate.
    pub passes: usize,
    /// Override of the NVLS enable flag (`AS_NVLS_ENABLE`).
    pub nvls_override: Option<bool>,
}

/// What a run produced.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    /// Wall-clock reached when the last pass converged.
    pub time_ns: f64,
    /// Iterations simulated.
    pub passes: usize,
    /// Streams injected (= finished) per node.
    pub streams_per_node: u64,
}

/// Load the inputs, run the simulation to completion, and emit the
/// reports.
pub fn run(config: &RunConfig, tracker: &Tracker) -> Result<RunSummary, SimError> {
    let system = {
        let mut system = SystemConfig::from_file(&config.system)?;
        if let Some(nvls) = config.nvls_override {
            system.nvls_enable = nvls;
        }
        system
    };
    let workload = WorkloadFile::from_file(&config.workload)?;
    let cluster_spec = ClusterSpec::from_file(&config.network)?;

    let mut topo =
        TopologyMap::with_kinds(cluster_spec.dims.clone(), system.impls.topology_kinds())?;
    // Align the dimension boundaries with the parallelisation groups before
    // anything is built on top.
    let tp = workload.header.model_parallel_npu_group;
    let ep = workload.header.expert_parallel_npu_group;
    topo.break_dimension(tp)?;
    topo.break_dimension(tp * ep)?;

    let total = topo.total_nodes();
    if let Some(expected) = config.num_gpus {
        if expected != total {
            return Err(SimError(format!(
                "-g {expected} does not match the {total}-GPU cluster description"
            )));
        }
    }
    if workload.header.all_gpus != 0 && workload.header.all_gpus != total {
        return Err(SimError(format!(
            "workload declares {} GPUs but the cluster has {total}",
            workload.header.all_gpus
        )));
    }

    let mut engine: Engine<SysEvent> = Engine::new(tracker);
    let net = AnalyticalNetwork::new(
        topo.dims().to_vec(),
        cluster_spec.link_params(engine.time.clock_period_ns()),
        system.logp,
    );

    let system = Rc::new(system);
    let drivers = (0..total)
        .map(|_| Workload::new(engine.top(), &workload, &topo, config.passes))
        .collect::<Result<Vec<_>, _>>()?;
    let mut cluster = Cluster::new(engine.top(), &topo, &system, Box::new(net), drivers)?;

    info!(cluster.entity ; "running {} passes over {} nodes {:?}", config.passes, total,
          topo.dims());
    cluster.start(&mut engine.queue);
    engine.run(&mut cluster)?;
    cluster.check_finished()?;
    let end = engine.time.now();
    cluster.finalize_stats(end);

    if let Some(dir) = &config.result_dir {
        write_reports(dir, &cluster, &engine, &workload)?;
    }

    let node0 = cluster.node(NodeId(0));
    Ok(RunSummary {
        time_ns: engine.time.now_ns(),
        passes: cluster.driver(NodeId(0)).passes_finished(),
        streams_per_node: node0.streams_finished,
    })
}

fn write_reports(
    dir: &Path,
    cluster: &Cluster<Workload>,
    engine: &Engine<SysEvent>,
    workload: &WorkloadFile,
) -> SimResult {
    std::fs::create_dir_all(dir)
        .map_err(|e| SimError(format!("unable to create {}: {e}", dir.display())))?;
    let open = |name: &str| -> Result<BufWriter<File>, SimError> {
        let path = dir.join(name);
        let file = File::create(&path)
            .map_err(|e| SimError(format!("unable to create {}: {e}", path.display())))?;
        Ok(BufWriter::new(file))
    };

    // Node 0 is representative: the workload is identical on every node.
    let node0 = cluster.node(NodeId(0));
    let mut summary = open("summary.csv")?;
    reports::write_summary(
        &mut summary,
        &cluster.driver(NodeId(0)).layers,
        &engine.time,
        workload.header.pipeline_parallelism,
        workload.header.gradient_accumulation,
    )?;

    let stats: Vec<_> = (0..node0.topo.num_dims())
        .map(|dim| node0.scheduler.stats(dim))
        .collect();
    let mut util = open("dim_util.csv")?;
    reports::write_dim_utilization(&mut util, &stats, engine.time.now())
}
