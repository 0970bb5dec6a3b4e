// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Simulator
//!
//! Owns the populations and the compiled connection groups, and advances the
//! model in whole steps.
//!
//! ## Step Order
//! ```text
//! for each step:
//!     1. every population's update      (consumes and zeroes input_current)
//!     2. every connection group         (accumulates into input_current)
//! finish()                              (once, after the last step)
//! ```
//!
//! Connections therefore feed the *next* step's population update.

use ahash::AHashMap;
use popsim_device::Queue;
use tracing::{info, trace};

use crate::batch::{DenseBatch, LowRankBatch};
use crate::connection::{Connection, ConnectionKind, DenseConnection, LowRankConnection};
use crate::error::{EngineError, EngineResult};
use crate::plan::{CpuPlanSelector, PlanSelector};
use crate::population::{Population, PopulationId};
use crate::update::{SingleUpdate, Updatable};

/// How connections are compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorOptions {
    /// Merge same-kind connections on one population into batches
    pub batching: bool,

    /// Smallest group that is batched (must be at least 2)
    pub min_batch_size: usize,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            batching: true,
            min_batch_size: 2,
        }
    }
}

/// All compiled work for one connection kind
pub struct ConnectionGroup {
    kind: ConnectionKind,
    updatables: Vec<Updatable>,
}

impl ConnectionGroup {
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn updatables(&self) -> &[Updatable] {
        &self.updatables
    }

    /// Connections covered by this group
    pub fn member_count(&self) -> usize {
        self.updatables.iter().map(Updatable::member_count).sum()
    }

    pub fn kernel_count(&self) -> usize {
        self.updatables.iter().map(Updatable::kernel_count).sum()
    }
}

pub struct Simulator {
    populations: Vec<Box<dyn Population>>,
    connections: Vec<Connection>,
    groups: Vec<ConnectionGroup>,
    queue: Queue,
    steps_taken: u64,
}

impl Simulator {
    /// Validate the model and compile every connection
    ///
    /// No device work is issued until [`Simulator::step`].
    pub fn new(
        populations: Vec<Box<dyn Population>>,
        connections: Vec<Connection>,
        selector: &dyn PlanSelector,
        options: SimulatorOptions,
    ) -> EngineResult<Self> {
        if options.min_batch_size < 2 {
            return Err(EngineError::InvalidParameters(format!(
                "min_batch_size must be at least 2, got {}",
                options.min_batch_size
            )));
        }

        let queue = populations
            .first()
            .map(|p| p.queue().clone())
            .ok_or(EngineError::NoPopulations)?;

        for population in &populations {
            if *population.queue() != queue {
                return Err(EngineError::QueueMismatch {
                    context: format!("population '{}'", population.name()),
                    expected: queue.id(),
                    found: population.queue().id(),
                });
            }
        }
        for (index, connection) in connections.iter().enumerate() {
            if *connection.queue() != queue {
                return Err(EngineError::QueueMismatch {
                    context: format!("connection {} ({})", index, connection.kind()),
                    expected: queue.id(),
                    found: connection.queue().id(),
                });
            }
        }

        let groups = Self::compile_groups(&populations, &connections, selector, options)?;

        let kernels: usize = groups.iter().map(ConnectionGroup::kernel_count).sum();
        info!(
            populations = populations.len(),
            connections = connections.len(),
            groups = groups.len(),
            kernels_per_step = kernels + populations.len(),
            selector = selector.name(),
            "simulator ready"
        );

        Ok(Self {
            populations,
            connections,
            groups,
            queue,
            steps_taken: 0,
        })
    }

    /// Build with the default CPU plan selector and batching enabled
    pub fn with_defaults(
        populations: Vec<Box<dyn Population>>,
        connections: Vec<Connection>,
    ) -> EngineResult<Self> {
        Self::new(
            populations,
            connections,
            &CpuPlanSelector::default(),
            SimulatorOptions::default(),
        )
    }

    /// Group by kind in first-seen order, then batch within each kind
    fn compile_groups(
        populations: &[Box<dyn Population>],
        connections: &[Connection],
        selector: &dyn PlanSelector,
        options: SimulatorOptions,
    ) -> EngineResult<Vec<ConnectionGroup>> {
        let mut index: AHashMap<ConnectionKind, usize> = AHashMap::new();
        let mut by_kind: Vec<(ConnectionKind, Vec<&Connection>)> = Vec::new();
        for connection in connections {
            let slot = *index.entry(connection.kind()).or_insert_with(|| {
                by_kind.push((connection.kind(), Vec::new()));
                by_kind.len() - 1
            });
            by_kind[slot].1.push(connection);
        }

        by_kind
            .into_iter()
            .map(|(kind, members)| {
                let updatables = if options.batching && members.len() >= options.min_batch_size {
                    vec![Self::batch_kind(kind, &members, populations, selector)?]
                } else {
                    members
                        .iter()
                        .map(|c| {
                            SingleUpdate::compile(c, populations, selector).map(Updatable::Single)
                        })
                        .collect::<EngineResult<Vec<_>>>()?
                };
                trace!(%kind, updatables = updatables.len(), "compiled connection group");
                Ok(ConnectionGroup { kind, updatables })
            })
            .collect()
    }

    /// One batch holding every member of `kind`, in registration order
    ///
    /// Members must share one population on both ends; anything else fails
    /// with [`EngineError::PopulationMismatch`].
    fn batch_kind(
        kind: ConnectionKind,
        members: &[&Connection],
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Updatable> {
        let updatable = match kind {
            ConnectionKind::LowRank => {
                let batch: Vec<LowRankConnection> = members
                    .iter()
                    .filter_map(|c| match c {
                        Connection::LowRank(c) => Some(c.clone()),
                        Connection::Dense(_) => None,
                    })
                    .collect();
                Updatable::LowRankBatch(LowRankBatch::new(&batch, populations, selector)?)
            }
            ConnectionKind::Dense => {
                let batch: Vec<DenseConnection> = members
                    .iter()
                    .filter_map(|c| match c {
                        Connection::Dense(c) => Some(c.clone()),
                        Connection::LowRank(_) => None,
                    })
                    .collect();
                Updatable::DenseBatch(DenseBatch::new(&batch, populations, selector)?)
            }
        };
        Ok(updatable)
    }

    /// Advance `n` steps, then drain the queue once
    ///
    /// `step(0)` only drains. A failure reported by the drain leaves the step
    /// counter untouched.
    pub fn step(&mut self, n: u64) -> EngineResult<()> {
        for _ in 0..n {
            for population in &self.populations {
                population.enqueue_update(&self.queue)?;
            }
            for group in &self.groups {
                trace!(kind = %group.kind, "issuing connection group");
                for updatable in &group.updatables {
                    updatable.enqueue_update(&self.queue)?;
                }
            }
        }
        self.queue.finish()?;
        self.steps_taken += n;
        Ok(())
    }

    pub fn populations(&self) -> &[Box<dyn Population>] {
        &self.populations
    }

    pub fn population(&self, id: PopulationId) -> Option<&dyn Population> {
        self.populations
            .iter()
            .find(|p| p.id() == id)
            .map(|p| &**p)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn groups(&self) -> &[ConnectionGroup] {
        &self.groups
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Kernels issued per step, population updates included
    pub fn kernels_per_step(&self) -> usize {
        self.populations.len()
            + self
                .groups
                .iter()
                .map(ConnectionGroup::kernel_count)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::random_low_rank_connection;
    use crate::population::FixedOutputPopulation;
    use ndarray::array;
    use popsim_device::{DeviceBuffer, DeviceError, DeviceResult};

    #[test]
    fn test_requires_populations() {
        assert!(matches!(
            Simulator::with_defaults(Vec::new(), Vec::new()),
            Err(EngineError::NoPopulations)
        ));
    }

    #[test]
    fn test_min_batch_size_validated() {
        let queue = Queue::new("sim-opts").unwrap();
        let pop = FixedOutputPopulation::new(&queue, "p", vec![0.0; 2]);
        let options = SimulatorOptions {
            batching: true,
            min_batch_size: 1,
        };
        assert!(matches!(
            Simulator::new(vec![Box::new(pop)], Vec::new(), &CpuPlanSelector::default(), options),
            Err(EngineError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_groups_keep_first_seen_kind_order() {
        let queue = Queue::new("sim-order").unwrap();
        let pop = FixedOutputPopulation::new(&queue, "p", vec![1.0; 6]);
        let dense = DenseConnection::new(&queue, pop.view(0..1), pop.view(1..2), array![[1.0]]);
        let lr1 = random_low_rank_connection(&queue, pop.view(0..3), pop.view(3..6), 2);
        let lr2 = random_low_rank_connection(&queue, pop.view(3..6), pop.view(0..3), 2);
        let populations: Vec<Box<dyn Population>> = vec![Box::new(pop)];

        let sim = Simulator::with_defaults(
            populations,
            vec![dense.into(), lr1.into(), lr2.into()],
        )
        .unwrap();

        let kinds: Vec<_> = sim.groups().iter().map(ConnectionGroup::kind).collect();
        assert_eq!(kinds, vec![ConnectionKind::Dense, ConnectionKind::LowRank]);
        assert_eq!(sim.groups()[0].member_count(), 1);
        assert_eq!(sim.groups()[1].member_count(), 2);
        assert!(sim.groups()[1].updatables()[0].is_batch());
        // 1 population + 1 dense + 2 low-rank batch kernels
        assert_eq!(sim.kernels_per_step(), 4);
        assert_eq!(sim.queue().submitted(), 0);
    }

    #[test]
    fn test_batching_disabled_compiles_singly() {
        let queue = Queue::new("sim-nobatch").unwrap();
        let pop = FixedOutputPopulation::new(&queue, "p", vec![1.0; 6]);
        let lr1 = random_low_rank_connection(&queue, pop.view(0..3), pop.view(3..6), 2);
        let lr2 = random_low_rank_connection(&queue, pop.view(3..6), pop.view(0..3), 2);
        let populations: Vec<Box<dyn Population>> = vec![Box::new(pop)];

        let sim = Simulator::new(
            populations,
            vec![lr1.into(), lr2.into()],
            &CpuPlanSelector::default(),
            SimulatorOptions {
                batching: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(sim.groups()[0].updatables().len(), 2);
        assert_eq!(sim.kernels_per_step(), 5);
    }

    #[test]
    fn test_step_counts_and_issues_kernels() {
        let queue = Queue::new("sim-step").unwrap();
        let pop = FixedOutputPopulation::new(&queue, "p", vec![1.0; 4]);
        let lr1 = random_low_rank_connection(&queue, pop.view(0..2), pop.view(2..4), 1);
        let lr2 = random_low_rank_connection(&queue, pop.view(2..4), pop.view(0..2), 1);
        let id = pop.id();
        let populations: Vec<Box<dyn Population>> = vec![Box::new(pop)];
        let mut sim = Simulator::with_defaults(populations, vec![lr1.into(), lr2.into()]).unwrap();

        sim.step(3).unwrap();
        assert_eq!(sim.steps_taken(), 3);
        assert_eq!(sim.queue().submitted(), 3 * sim.kernels_per_step() as u64);
        assert_eq!(sim.queue().pending(), 0);

        sim.step(0).unwrap();
        assert_eq!(sim.steps_taken(), 3);
        assert_eq!(sim.population(id).map(|p| p.len()), Some(4));
    }

    #[test]
    fn test_rejects_foreign_queue() {
        let queue = Queue::new("sim-q1").unwrap();
        let other = Queue::new("sim-q2").unwrap();
        let a = FixedOutputPopulation::new(&queue, "a", vec![0.0; 2]);
        let b = FixedOutputPopulation::new(&other, "b", vec![0.0; 2]);
        let populations: Vec<Box<dyn Population>> = vec![Box::new(a), Box::new(b)];
        assert!(matches!(
            Simulator::with_defaults(populations, Vec::new()),
            Err(EngineError::QueueMismatch { .. })
        ));
    }

    #[test]
    fn test_cross_population_kind_fails_when_batched() {
        let queue = Queue::new("sim-cross").unwrap();
        let a = FixedOutputPopulation::new(&queue, "a", vec![0.0; 4]);
        let b = FixedOutputPopulation::new(&queue, "b", vec![0.0; 3]);
        let c1 = random_low_rank_connection(&queue, a.view(0..4), b.full_view(), 2);
        let c2 = random_low_rank_connection(&queue, a.view(0..4), b.full_view(), 2);
        let populations: Vec<Box<dyn Population>> = vec![Box::new(a), Box::new(b)];

        let result = Simulator::with_defaults(populations, vec![c1.into(), c2.into()]);
        assert!(matches!(
            result,
            Err(EngineError::PopulationMismatch { index: 0, end: "destination", .. })
        ));
        assert_eq!(queue.submitted(), 0);
    }

    /// Population whose update kernel always fails
    struct FailingPopulation {
        id: PopulationId,
        queue: Queue,
        output: DeviceBuffer,
        input_current: DeviceBuffer,
    }

    impl Population for FailingPopulation {
        fn id(&self) -> PopulationId {
            self.id
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn len(&self) -> usize {
            self.output.len()
        }

        fn queue(&self) -> &Queue {
            &self.queue
        }

        fn output(&self) -> &DeviceBuffer {
            &self.output
        }

        fn input_current(&self) -> &DeviceBuffer {
            &self.input_current
        }

        fn enqueue_update(&self, queue: &Queue) -> DeviceResult<()> {
            queue.submit("failing_update", || {
                Err(DeviceError::KernelFailed {
                    label: "failing_update",
                    reason: "unit saturated".to_string(),
                })
            })
        }
    }

    #[test]
    fn test_kernel_failure_surfaces_from_step() {
        let queue = Queue::new("sim-fail").unwrap();
        let failing = FailingPopulation {
            id: PopulationId::fresh(),
            queue: queue.clone(),
            output: DeviceBuffer::zeros(2),
            input_current: DeviceBuffer::zeros(2),
        };
        let mut sim = Simulator::with_defaults(vec![Box::new(failing)], Vec::new()).unwrap();

        let result = sim.step(3);
        assert!(matches!(
            result,
            Err(EngineError::Device(DeviceError::KernelFailed { label: "failing_update", .. }))
        ));
        assert_eq!(sim.steps_taken(), 0);
        // Every queued update still ran; the failure is reported once
        assert_eq!(queue.completed(), 3);
        sim.step(0).unwrap();
        assert_eq!(sim.steps_taken(), 0);
    }
}
