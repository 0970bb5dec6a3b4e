// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # popsim Engine
//!
//! Connection batching and update scheduling for population simulations.
//!
//! ## Pipeline
//! - **Connections**: low-rank (`enc · dec`) and dense links between views of
//!   populations, tagged with an explicit [`ConnectionKind`]
//! - **Batching**: same-kind connections on one population are stacked into a
//!   single batched gemv family (two kernels per step for low-rank instead of
//!   two per connection)
//! - **Plan selection**: a [`PlanSelector`] turns a batched gemv request into
//!   an executable [`BatchedPlan`]
//! - **Simulator**: issues population updates, then connection groups, for
//!   `n` steps on one queue, then drains once
//!
//! ## Example
//!
//! ```rust
//! use popsim_device::Queue;
//! use popsim_engine::prelude::*;
//!
//! let queue = Queue::new("doc").unwrap();
//! let ens = FixedOutputPopulation::new(&queue, "ens", vec![1.0; 7]);
//! let a = ens.view(0..4);
//! let b = ens.view(4..7);
//! let c1 = random_low_rank_connection(&queue, a, b, 2);
//! let c2 = random_low_rank_connection(&queue, a, b, 2);
//!
//! let populations: Vec<Box<dyn Population>> = vec![Box::new(ens)];
//! let mut sim = Simulator::with_defaults(populations, vec![c1.into(), c2.into()]).unwrap();
//! sim.step(10).unwrap();
//! assert_eq!(sim.steps_taken(), 10);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod batch;
pub mod connection;
pub mod error;
pub mod plan;
pub mod population;
pub mod simulator;
pub mod update;

pub use batch::{DenseBatch, LowRankBatch};
pub use connection::{
    random_low_rank_connection, random_low_rank_connection_with_rng, Connection, ConnectionKind,
    DenseConnection, LowRankConnection,
};
pub use error::{EngineError, EngineResult};
pub use plan::{
    select_strategy, BatchShape, BatchedPlan, CpuPlanSelector, GemvBatchedRequest, MatrixAccess,
    PlanConfig, PlanDecision, PlanError, PlanResult, PlanSelector, PlanStrategy, VectorAccess,
};
pub use population::{
    FixedOutputPopulation, LifParameters, LifPopulation, Population, PopulationId, PopulationView,
};
pub use simulator::{ConnectionGroup, Simulator, SimulatorOptions};
pub use update::{SingleUpdate, Updatable};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::connection::{
        random_low_rank_connection, random_low_rank_connection_with_rng, Connection,
        ConnectionKind, DenseConnection, LowRankConnection,
    };
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::plan::{CpuPlanSelector, PlanConfig, PlanSelector, PlanStrategy};
    pub use crate::population::{
        FixedOutputPopulation, LifParameters, LifPopulation, Population, PopulationId,
        PopulationView,
    };
    pub use crate::simulator::{Simulator, SimulatorOptions};
}
