// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Build engine settings from a loaded [`PopsimConfig`].

use popsim_config::{PopsimConfig, StrategyName};
use popsim_engine::{
    Connection, CpuPlanSelector, EngineResult, PlanConfig, PlanStrategy, Population, Simulator,
    SimulatorOptions,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Plan selection settings from the `[plan]` section
pub fn plan_config(config: &PopsimConfig) -> PlanConfig {
    let strategy = match config.plan.strategy {
        StrategyName::Auto => PlanStrategy::Auto,
        StrategyName::Serial => PlanStrategy::Serial,
        StrategyName::Parallel => PlanStrategy::Parallel,
    };
    PlanConfig {
        strategy,
        parallel_threshold: config.plan.parallel_threshold,
    }
}

/// Batching settings from the `[batching]` section
pub fn simulator_options(config: &PopsimConfig) -> SimulatorOptions {
    SimulatorOptions {
        batching: config.batching.enabled,
        min_batch_size: config.batching.min_batch_size,
    }
}

/// RNG for connection initialization: seeded when `simulation.seed` is set
pub fn seeded_rng(config: &PopsimConfig) -> StdRng {
    match config.simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Console logging settings from the `[logging]` section
#[cfg(feature = "observability")]
pub fn observability_config(config: &PopsimConfig) -> popsim_observability::ObservabilityConfig {
    popsim_observability::ObservabilityConfig::with_level(config.logging.level.as_str())
}

/// Compile a simulator with the CPU plan selector configured from `config`
pub fn build_simulator(
    config: &PopsimConfig,
    populations: Vec<Box<dyn Population>>,
    connections: Vec<Connection>,
) -> EngineResult<Simulator> {
    let plan = plan_config(config);
    let options = simulator_options(config);
    debug!(
        strategy = %plan.strategy,
        parallel_threshold = plan.parallel_threshold,
        batching = options.batching,
        min_batch_size = options.min_batch_size,
        "building simulator from config"
    );
    Simulator::new(populations, connections, &CpuPlanSelector::new(plan), options)
}
