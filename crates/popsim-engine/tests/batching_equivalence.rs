// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batched execution must match executing every connection on its own.

use popsim_device::Queue;
use popsim_engine::prelude::*;
use popsim_engine::{LowRankBatch, PlanConfig, SingleUpdate};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn assert_close(batched: &[f32], single: &[f32]) {
    assert_eq!(batched.len(), single.len());
    for (i, (b, s)) in batched.iter().zip(single).enumerate() {
        let tolerance = 1e-5 * s.abs().max(1.0) * 10.0;
        assert!(
            (b - s).abs() <= tolerance,
            "unit {}: batched {} vs single {}",
            i,
            b,
            s
        );
    }
}

/// Connection layout: (src_start, dst_start) for each member
fn layout(rng: &mut StdRng, count: usize, size: usize, src_len: usize, dst_len: usize) -> Vec<(usize, usize)> {
    (0..count)
        .map(|_| {
            (
                rng.gen_range(0..=size - src_len),
                rng.gen_range(0..=size - dst_len),
            )
        })
        .collect()
}

fn run_equivalence(seed: u64, count: usize, rank: usize, src_len: usize, dst_len: usize, strategy: PlanStrategy) {
    let mut rng = StdRng::seed_from_u64(seed);
    let size = src_len.max(dst_len) + 4;
    let output: Vec<f32> = (0..size).map(|_| rng.gen_range(-2.0..2.0)).collect();
    let initial: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let starts = layout(&mut rng, count, size, src_len, dst_len);

    let queue = Queue::new("equivalence").unwrap();
    let batched_pop = FixedOutputPopulation::new(&queue, "batched", output.clone());
    let single_pop = FixedOutputPopulation::new(&queue, "single", output);
    batched_pop.input_current().enqueue_write(&queue, 0, initial.clone()).unwrap();
    single_pop.input_current().enqueue_write(&queue, 0, initial).unwrap();

    let mut batched_connections = Vec::new();
    let mut single_connections = Vec::new();
    for &(src, dst) in &starts {
        let template = random_low_rank_connection_with_rng(
            &queue,
            batched_pop.view(src..src + src_len),
            batched_pop.view(dst..dst + dst_len),
            rank,
            &mut rng,
        );
        single_connections.push(Connection::from(LowRankConnection::new(
            &queue,
            single_pop.view(src..src + src_len),
            single_pop.view(dst..dst + dst_len),
            template.dec().clone(),
            template.enc().clone(),
        )));
        batched_connections.push(template);
    }

    let batched_input = batched_pop.input_current().clone();
    let single_input = single_pop.input_current().clone();
    let populations: Vec<Box<dyn Population>> = vec![Box::new(batched_pop), Box::new(single_pop)];
    let selector = CpuPlanSelector::new(PlanConfig {
        strategy,
        ..Default::default()
    });

    let batch = LowRankBatch::new(&batched_connections, &populations, &selector).unwrap();
    let singles: Vec<SingleUpdate> = single_connections
        .iter()
        .map(|c| SingleUpdate::compile(c, &populations, &selector).unwrap())
        .collect();

    batch.enqueue_update(&queue).unwrap();
    for update in &singles {
        update.enqueue_update(&queue).unwrap();
    }
    queue.finish().unwrap();

    assert_close(&batched_input.read(), &single_input.read());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn batched_matches_individual_serial(
        seed in any::<u64>(),
        count in 2usize..6,
        rank in 1usize..4,
        src_len in 1usize..8,
        dst_len in 1usize..8,
    ) {
        run_equivalence(seed, count, rank, src_len, dst_len, PlanStrategy::Serial);
    }

    #[test]
    fn batched_matches_individual_parallel(
        seed in any::<u64>(),
        count in 2usize..6,
        rank in 1usize..4,
        src_len in 1usize..8,
        dst_len in 1usize..8,
    ) {
        run_equivalence(seed, count, rank, src_len, dst_len, PlanStrategy::Parallel);
    }
}

#[test]
fn batched_matches_individual_for_overlapping_destinations() {
    // Seven-unit destinations in an eleven-unit population always overlap
    for seed in 0..8 {
        run_equivalence(seed, 4, 2, 3, 7, PlanStrategy::Auto);
    }
}
