// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the engine
//!
//! Everything except `Device` is a configuration error raised while a batch,
//! plan or simulator is being built. None of them is retried.

use popsim_device::{DeviceError, QueueId};

use crate::plan::PlanError;
use crate::population::PopulationId;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Simulator requires at least one population")]
    NoPopulations,

    #[error("Queue mismatch: {context} is bound to queue {found}, expected {expected}")]
    QueueMismatch {
        context: String,
        expected: QueueId,
        found: QueueId,
    },

    #[error(
        "Population mismatch: connection {index} has {end} population {found}, batch population is {expected}"
    )]
    PopulationMismatch {
        index: usize,
        end: &'static str,
        expected: PopulationId,
        found: PopulationId,
    },

    #[error("Unknown population: {0}")]
    UnknownPopulation(PopulationId),

    #[error("View [{start}, {end}) exceeds population '{population}' of {len} units")]
    ViewOutOfBounds {
        population: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Mixed rank in batch: connection {index} has rank {found}, expected {expected}")]
    MixedRank {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Cannot build a batch from zero connections")]
    EmptyBatch,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Plan selection failures pass through untouched
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
