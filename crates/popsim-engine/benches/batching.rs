// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batching Microbenchmarks
//!
//! Purpose:
//! - Compare one simulator step with batching on and off as the number of
//!   low-rank connections grows.
//! - Compare serial and parallel plan strategies on the same batched model.
//!
//! Notes:
//! - Fixed seeds, no I/O.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use popsim_device::Queue;
use popsim_engine::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const POPULATION_SIZE: usize = 512;
const VIEW: usize = 64;
const RANK: usize = 8;

fn build(connection_count: usize, batching: bool, strategy: PlanStrategy) -> Simulator {
    let queue = Queue::new("bench").expect("queue");
    let ens = FixedOutputPopulation::new(&queue, "ens", vec![0.5; POPULATION_SIZE]);
    let mut rng = StdRng::seed_from_u64(0xBA7C);

    let connections: Vec<Connection> = (0..connection_count)
        .map(|i| {
            let src = (i * VIEW) % (POPULATION_SIZE - VIEW);
            let dst = (src + VIEW / 2) % (POPULATION_SIZE - VIEW);
            random_low_rank_connection_with_rng(
                &queue,
                ens.view(src..src + VIEW),
                ens.view(dst..dst + VIEW),
                RANK,
                &mut rng,
            )
            .into()
        })
        .collect();

    let selector = CpuPlanSelector::new(PlanConfig {
        strategy,
        ..Default::default()
    });
    let options = SimulatorOptions {
        batching,
        ..Default::default()
    };
    let populations: Vec<Box<dyn Population>> = vec![Box::new(ens)];
    Simulator::new(populations, connections, &selector, options).expect("simulator")
}

fn bench_batched_vs_individual(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_low_rank");

    for &count in &[2usize, 16, 64] {
        group.throughput(Throughput::Elements(count as u64));
        for (label, batching) in [("batched", true), ("individual", false)] {
            let mut sim = build(count, batching, PlanStrategy::Auto);
            group.bench_with_input(BenchmarkId::new(label, count), &count, |b, _| {
                b.iter(|| {
                    sim.step(black_box(1)).expect("step");
                })
            });
        }
    }

    group.finish();
}

fn bench_plan_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_strategy");

    for strategy in [PlanStrategy::Serial, PlanStrategy::Parallel] {
        let mut sim = build(64, true, strategy);
        group.bench_function(BenchmarkId::from_parameter(strategy), |b| {
            b.iter(|| {
                sim.step(black_box(10)).expect("step");
            })
        });
    }

    group.finish();
}

fn criterion_config() -> Criterion {
    Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(2))
        .sample_size(20)
}

criterion_group! {
    name = batching;
    config = criterion_config();
    targets = bench_batched_vs_individual, bench_plan_strategies
}
criterion_main!(batching);
