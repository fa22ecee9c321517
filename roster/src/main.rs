// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Command-line front-end for MAINLINE training simulations.
//!
//! For example:
//!   cargo run --bin roster -- -w demos/transformer.workload \
//!     -n demos/cluster.yaml -c demos/system.cfg -r results/

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info, warn};
use mainline_track::str_to_level;
use mainline_track::tracker::stdout_tracker;
use roster::{RunConfig, run};

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Simulate distributed deep-learning training on a cluster description")]
struct Cli {
    /// Network backend threads. The analytical backend is single-threaded;
    /// higher values are accepted and ignored.
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Workload file describing the layers of one iteration.
    #[arg(short = 'w', long = "workload")]
    workload: PathBuf,

    /// Cluster description (dimensions and links), YAML.
    #[arg(short = 'n', long = "network")]
    network: PathBuf,

    /// System configuration (scheduling, implementations, LogGP).
    #[arg(short = 'c', long = "system-config")]
    system: PathBuf,

    /// Expected number of GPUs; checked against the cluster description.
    #[arg(short = 'g', long = "num-gpus")]
    num_gpus: Option<usize>,

    /// Directory for the summary and utilization CSVs.
    #[arg(short = 'r', long = "result-dir")]
    result_dir: Option<PathBuf>,

    /// Training iterations to simulate.
    #[arg(long, default_value_t = 1)]
    passes: usize,
}

/// Configure the logger level and formatting string.
fn setup_logger() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logger();

    let level = std::env::var("AS_LOG_LEVEL")
        .map(|raw| str_to_level(&raw))
        .unwrap_or(log::Level::Info);
    let tracker = stdout_tracker(level);

    let nvls_override = std::env::var("AS_NVLS_ENABLE")
        .ok()
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"));

    if args.threads > 1 {
        warn!(
            "{} threads requested; the analytical backend runs single-threaded",
            args.threads
        );
    }

    let config = RunConfig {
        threads: args.threads,
        workload: args.workload,
        network: args.network,
        system: args.system,
        num_gpus: args.num_gpus,
        result_dir: args.result_dir,
        passes: args.passes,
        nvls_override,
    };

    let summary = run(&config, &tracker)?;
    info!(
        "{} passes, {} streams per node",
        summary.passes, summary.streams_per_node
    );
    println!("all passes finished at time {} ns", summary.time_ns);
    Ok(())
}
