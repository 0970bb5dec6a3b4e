// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Population Abstraction
//!
//! A population is a group of units sharing device-resident state and one
//! queue. The engine only needs its `output` and `input_current` buffers and
//! a per-step update kernel; neuron dynamics live behind the trait.
//!
//! ## Adding a New Population Model
//!
//! 1. Create `src/population/your_model.rs`
//! 2. Implement `Population`, zeroing `input_current` once it is consumed
//! 3. Add tests
//! 4. Export in `mod.rs`

pub mod fixed;
pub mod lif;

pub use fixed::FixedOutputPopulation;
pub use lif::{LifParameters, LifPopulation};

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use popsim_device::{DeviceBuffer, DeviceResult, Queue};

use crate::error::{EngineError, EngineResult};

/// Process-unique population identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopulationId(pub u64);

static NEXT_POPULATION_ID: AtomicU64 = AtomicU64::new(1);

impl PopulationId {
    /// Allocate a fresh id
    pub fn fresh() -> Self {
        Self(NEXT_POPULATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PopulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pop{}", self.0)
    }
}

/// Non-owning handle to a contiguous slice of a population's units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PopulationView {
    pub population: PopulationId,
    pub start: usize,
    pub len: usize,
}

impl PopulationView {
    pub fn new(population: PopulationId, start: usize, len: usize) -> Self {
        Self {
            population,
            start,
            len,
        }
    }

    /// One past the last unit
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Population trait: the interface the scheduler drives
///
/// Implementations own their buffers. `enqueue_update` must consume the
/// accumulated `input_current` and leave it zeroed, so connections issued later
/// in the same step accumulate into a clean buffer.
pub trait Population: Send + Sync {
    fn id(&self) -> PopulationId;

    fn name(&self) -> &str;

    /// Number of units
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue this population is bound to
    fn queue(&self) -> &Queue;

    /// One scalar per unit, produced by the population's own update
    fn output(&self) -> &DeviceBuffer;

    /// Accumulator connections write into
    fn input_current(&self) -> &DeviceBuffer;

    /// Queue this population's per-step update
    fn enqueue_update(&self, queue: &Queue) -> DeviceResult<()>;

    /// View of `range` units of this population
    fn view(&self, range: Range<usize>) -> PopulationView {
        PopulationView::new(self.id(), range.start, range.len())
    }

    /// View covering every unit
    fn full_view(&self) -> PopulationView {
        PopulationView::new(self.id(), 0, self.len())
    }
}

/// Look up a population by id
pub fn find_population(
    populations: &[Box<dyn Population>],
    id: PopulationId,
) -> EngineResult<&dyn Population> {
    populations
        .iter()
        .find(|p| p.id() == id)
        .map(|p| &**p)
        .ok_or(EngineError::UnknownPopulation(id))
}

/// Resolve a view to its population, checking it lies inside it
pub fn resolve_view<'a>(
    populations: &'a [Box<dyn Population>],
    view: &PopulationView,
) -> EngineResult<&'a dyn Population> {
    let population = find_population(populations, view.population)?;
    if view.end() > population.len() {
        return Err(EngineError::ViewOutOfBounds {
            population: population.name().to_string(),
            start: view.start,
            end: view.end(),
            len: population.len(),
        });
    }
    Ok(population)
}
