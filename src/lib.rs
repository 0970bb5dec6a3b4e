// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # popsim - Neural Population Simulator Core
//!
//! Populations of units exchange input currents through low-rank and dense
//! connections. Connections of the same kind between views of one
//! population are merged into a single batched update, so a step issues two
//! kernels for a whole group of low-rank connections instead of two each.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! popsim = "0.1"  # Default: config + observability
//! ```
//!
//! ## Feature Flags
//!
//! - **`config`** (default): `popsim.toml` loading with env/CLI overrides
//! - **`observability`** (default): logging setup and per-crate debug flags
//! - **`file-logging`**: timestamped `run_*` log folders with retention
//!
//! ## Usage
//!
//! ```rust
//! use popsim::prelude::*;
//!
//! let queue = Queue::new("main").unwrap();
//! let ens = LifPopulation::new(&queue, "ens", 7, LifParameters::default()).unwrap();
//! let a = ens.view(0..4);
//! let b = ens.view(4..7);
//! let c1 = random_low_rank_connection(&queue, a, b, 2);
//! let c2 = random_low_rank_connection(&queue, a, b, 2);
//!
//! let populations: Vec<Box<dyn Population>> = vec![Box::new(ens)];
//! let mut sim = Simulator::with_defaults(populations, vec![c1.into(), c2.into()]).unwrap();
//! sim.step(100).unwrap();
//! assert_eq!(sim.steps_taken(), 100);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: popsim-config, popsim-observability        │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Device: popsim-device                                  │
//! │  (ordered command queue, device-resident buffers)       │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Simulation: popsim-engine                              │
//! │  (connections, batching, plan selection, simulator)     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub use popsim_device as device;
pub use popsim_engine as engine;

#[cfg(feature = "config")]
pub use popsim_config as config;

#[cfg(feature = "observability")]
pub use popsim_observability as observability;

#[cfg(feature = "config")]
mod setup;

#[cfg(feature = "config")]
pub use setup::{build_simulator, plan_config, seeded_rng, simulator_options};

#[cfg(all(feature = "config", feature = "observability"))]
pub use setup::observability_config;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::device::{DeviceBuffer, Queue};
    pub use crate::engine::prelude::*;

    #[cfg(feature = "config")]
    pub use crate::config::{load_config, validate_config, PopsimConfig};
    #[cfg(feature = "config")]
    pub use crate::setup::build_simulator;
    #[cfg(all(feature = "config", feature = "observability"))]
    pub use crate::setup::observability_config;

    #[cfg(feature = "observability")]
    pub use crate::observability::{init_logging, CrateDebugFlags, ObservabilityConfig};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::prelude::*;
        let queue = Queue::new("facade").unwrap();
        let pop = FixedOutputPopulation::new(&queue, "p", vec![0.0; 2]);
        assert_eq!(pop.len(), 2);
    }
}
