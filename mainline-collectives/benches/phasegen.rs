// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use criterion::{Criterion, criterion_group, criterion_main};
use mainline_collectives::op::{CollectiveOp, TrainingPhase};
use mainline_collectives::phase::{CollectiveOptimization, PhaseGenerator, PlanConfig};
use mainline_collectives::topology::{TopologyKind, TopologyMap};
use mainline_engine::types::NodeId;

fn bench_generate(c: &mut Criterion) {
    let topo = TopologyMap::new(vec![8, 8, 4], TopologyKind::Ring).unwrap();
    let cfg = PlanConfig {
        optimization: CollectiveOptimization::LocalBwAware,
        ..PlanConfig::default()
    };
    let generator = PhaseGenerator::new(&topo, &cfg);
    let involved = vec![true, true, true];

    c.bench_function("generate 64MiB all-reduce over [8,8,4]", |b| {
        b.iter(|| {
            generator
                .generate(
                    NodeId(37),
                    CollectiveOp::AllReduce,
                    64 << 20,
                    &involved,
                    0,
                    TrainingPhase::WeightGrad,
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_generate);
criterion_main!(benches);
