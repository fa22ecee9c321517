// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! End-of-run CSV reports.
//!
//! Two files: a per-layer summary (compute, exposed communication by group
//! kind, bubble, totals - in seconds) and a per-dimension utilization table
//! (percent busy per decile of the run).

use std::io::Write;

use mainline_engine::time::SimTime;
use mainline_engine::types::{SimError, SimResult, Tick};
use mainline_system::scheduler::DimStats;

use crate::layer::Layer;
use crate::parser::GroupKind;
use crate::pipeline::bubble_fraction;

fn seconds(time: &SimTime, cycles: u64) -> f64 {
    time.to_ns(cycles) * 1e-9
}

fn io_error(err: std::io::Error) -> SimError {
    SimError(format!("report write failed: {err}"))
}

/// Write the per-layer summary for one node.
pub fn write_summary(
    out: &mut dyn Write,
    layers: &[Layer],
    time: &SimTime,
    pp_stages: usize,
    microbatches: usize,
) -> SimResult {
    write!(out, "layer,fwd compute,ig compute,wg compute").map_err(io_error)?;
    for group in GroupKind::ALL {
        write!(out, ",exposed {group}").map_err(io_error)?;
    }
    writeln!(out, ",bubble,total").map_err(io_error)?;

    let bubble = if pp_stages > 1 {
        bubble_fraction(pp_stages, microbatches)
    } else {
        0.0
    };

    let mut totals = vec![0.0; 4 + GroupKind::ALL.len()];
    for layer in layers {
        let compute: Vec<f64> = (0..3)
            .map(|phase| seconds(time, layer.stats.compute_cycles[phase]))
            .collect();
        let exposed: Vec<f64> = GroupKind::ALL
            .iter()
            .map(|group| seconds(time, layer.stats.exposed_comm[group.index()]))
            .collect();
        let layer_bubble = bubble * (compute.iter().sum::<f64>());
        let total =
            compute.iter().sum::<f64>() + exposed.iter().sum::<f64>() + layer_bubble;

        write!(out, "{}", layer.spec.name).map_err(io_error)?;
        for value in compute.iter().chain(exposed.iter()) {
            write!(out, ",{value:.9}").map_err(io_error)?;
        }
        writeln!(out, ",{layer_bubble:.9},{total:.9}").map_err(io_error)?;

        for (slot, value) in compute.iter().chain(exposed.iter()).enumerate() {
            totals[slot] += value;
        }
        totals[3 + GroupKind::ALL.len()] += layer_bubble;
    }

    write!(out, "total").map_err(io_error)?;
    let sum: f64 = totals.iter().sum();
    for value in &totals[..3 + GroupKind::ALL.len()] {
        write!(out, ",{value:.9}").map_err(io_error)?;
    }
    writeln!(out, ",{:.9},{sum:.9}", totals[3 + GroupKind::ALL.len()]).map_err(io_error)?;
    Ok(())
}

/// Write per-dimension utilization: percent of each decile of the run in
/// which the dimension had at least one stream running.
pub fn write_dim_utilization(
    out: &mut dyn Write,
    stats: &[&DimStats],
    end: Tick,
) -> SimResult {
    write!(out, "dim").map_err(io_error)?;
    for decile in 1..=10 {
        write!(out, ",{}%", decile * 10).map_err(io_error)?;
    }
    writeln!(out).map_err(io_error)?;

    let end = end.max(1);
    for (dim, stats) in stats.iter().enumerate() {
        write!(out, "{dim}").map_err(io_error)?;
        for decile in 0..10u64 {
            let from = end * decile / 10;
            let to = end * (decile + 1) / 10;
            let busy: u64 = stats
                .busy
                .iter()
                .map(|(start, stop)| stop.min(&to).saturating_sub(*start.max(&from)))
                .sum();
            let percent = 100.0 * busy as f64 / (to - from).max(1) as f64;
            write!(out, ",{percent:.1}").map_err(io_error)?;
        }
        writeln!(out).map_err(io_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use mainline_track::entity::toplevel;
    use mainline_track::tracker::dev_null_tracker;

    use super::*;
    use crate::parser::WorkloadFile;

    fn sample_layers() -> Vec<Layer> {
        let file = WorkloadFile::from_str(
            "DATA\n1\nl0 -1 100 NONE 0 200 NONE 0 300 ALLREDUCE 4096 10\n",
        )
        .unwrap();
        file.layers
            .into_iter()
            .map(|spec| Layer::new(spec, false, false))
            .collect()
    }

    #[test]
    fn summary_has_header_layer_and_totals() {
        let tracker = dev_null_tracker();
        let top = toplevel(&tracker, "top");
        let time = SimTime::new(&top);

        let mut layers = sample_layers();
        layers[0].stats.compute_cycles = [100, 200, 310];

        let mut out = Vec::new();
        write_summary(&mut out, &layers, &time, 1, 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("layer,fwd compute"));
        assert!(lines[1].starts_with("l0,"));
        assert!(lines[2].starts_with("total,"));
    }

    #[test]
    fn utilization_reports_busy_deciles() {
        let mut stats = DimStats::default();
        stats.busy.push((0, 50));
        let mut out = Vec::new();
        write_dim_utilization(&mut out, &[&stats], 100).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        // Busy for the whole first half of the run.
        assert!(row.starts_with("0,100.0,100.0,100.0,100.0,100.0,0.0"));
    }
}
