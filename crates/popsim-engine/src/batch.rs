// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Connection Batches
//!
//! Same-kind connections whose views all live in one population are stacked
//! and executed as one batched gemv family per stage:
//!
//! ```text
//! Low-rank (2 kernels per step, regardless of batch size B):
//!     decode:  decoded[b·r .. (b+1)·r]       = dec_b · output[src_b]
//!     encode:  input_current[dst_b]         += enc_b · decoded[b·r .. (b+1)·r]
//!
//! Dense (1 kernel per step):
//!     input_current[dst_b] += W_b · output[src_b]
//! ```
//!
//! Destinations may overlap; contributions accumulate. Construction issues no
//! device work.

use ndarray::{Array3, ArrayView2, Axis};
use popsim_device::{DeviceBuffer, Queue};
use tracing::debug;

use crate::connection::{DenseConnection, LowRankConnection};
use crate::error::{EngineError, EngineResult};
use crate::plan::{
    BatchShape, BatchedPlan, GemvBatchedRequest, MatrixAccess, PlanSelector, VectorAccess,
};
use crate::population::{Population, PopulationId, PopulationView};

/// Stack matrices along a new leading axis into a device buffer
fn stack_to_device(
    context: &str,
    matrices: &[ArrayView2<'_, f32>],
) -> EngineResult<(Array3<f32>, DeviceBuffer)> {
    let stacked =
        ndarray::stack(Axis(0), matrices).map_err(|_| EngineError::ShapeMismatch {
            context: context.to_string(),
            expected: matrices
                .first()
                .map(|m| m.shape().to_vec())
                .unwrap_or_default(),
            actual: matrices
                .iter()
                .find(|m| m.shape() != matrices[0].shape())
                .map(|m| m.shape().to_vec())
                .unwrap_or_default(),
        })?;
    // Logical (row-major) order regardless of memory layout
    let buffer = DeviceBuffer::from_vec(stacked.iter().copied().collect());
    Ok((stacked, buffer))
}

/// Check every view is in the batch population and every connection shares a queue
fn check_members<'a>(
    members: impl Iterator<Item = (&'a Queue, &'a PopulationView, &'a PopulationView)>,
) -> EngineResult<(PopulationId, Queue)> {
    let mut anchor: Option<(PopulationId, Queue)> = None;
    for (index, (queue, src, dst)) in members.enumerate() {
        let (population, batch_queue) =
            anchor.get_or_insert_with(|| (src.population, queue.clone()));

        for (end, view) in [("source", src), ("destination", dst)] {
            if view.population != *population {
                return Err(EngineError::PopulationMismatch {
                    index,
                    end,
                    expected: *population,
                    found: view.population,
                });
            }
        }
        if *queue != *batch_queue {
            return Err(EngineError::QueueMismatch {
                context: format!("batch member {}", index),
                expected: batch_queue.id(),
                found: queue.id(),
            });
        }
    }
    anchor.ok_or(EngineError::EmptyBatch)
}

/// Batch of low-rank connections sharing one population and one rank
pub struct LowRankBatch {
    connections: Vec<LowRankConnection>,
    population: PopulationId,
    queue: Queue,
    rank: usize,
    /// `[B, rank, n]`
    dec_stack: Array3<f32>,
    /// `[B, m, rank]`
    enc_stack: Array3<f32>,
    /// `B × rank` scratch written by decode, read by encode
    decoded: DeviceBuffer,
    dec_plan: Box<dyn BatchedPlan>,
    enc_plan: Box<dyn BatchedPlan>,
}

impl LowRankBatch {
    /// Build a batch and its two plans
    ///
    /// Errors: [`EngineError::EmptyBatch`], [`EngineError::PopulationMismatch`]
    /// when any view leaves the first source's population,
    /// [`EngineError::QueueMismatch`], [`EngineError::MixedRank`], and
    /// [`EngineError::ShapeMismatch`] when view lengths differ across members.
    pub fn new(
        connections: &[LowRankConnection],
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Self> {
        let (population_id, queue) = check_members(
            connections
                .iter()
                .map(|c| (c.queue(), c.src(), c.dst())),
        )?;

        let mut population = None;
        for connection in connections {
            let (src, _) = connection.validate(populations)?;
            population = Some(src);
        }
        let population = population.ok_or(EngineError::EmptyBatch)?;

        let first = &connections[0];
        let rank = first.rank();
        for (index, connection) in connections.iter().enumerate() {
            if connection.rank() != rank {
                return Err(EngineError::MixedRank {
                    index,
                    expected: rank,
                    found: connection.rank(),
                });
            }
        }

        let decs: Vec<_> = connections.iter().map(|c| c.dec().view()).collect();
        let encs: Vec<_> = connections.iter().map(|c| c.enc().view()).collect();
        let (dec_stack, dec_buffer) = stack_to_device("stacked low-rank decoders", &decs)?;
        let (enc_stack, enc_buffer) = stack_to_device("stacked low-rank encoders", &encs)?;

        let batch = connections.len();
        let dec_dims = dec_stack.dim();
        let enc_dims = enc_stack.dim();
        if dec_dims.1 != rank || enc_dims.2 != rank {
            return Err(EngineError::ShapeMismatch {
                context: "stacked low-rank rank axis".to_string(),
                expected: vec![rank, rank],
                actual: vec![dec_dims.1, enc_dims.2],
            });
        }

        let decoded = DeviceBuffer::zeros(batch * rank);
        let src_offsets: Vec<usize> = connections.iter().map(|c| c.src().start).collect();
        let dst_offsets: Vec<usize> = connections.iter().map(|c| c.dst().start).collect();
        let decoded_offsets: Vec<usize> = (0..batch).map(|b| b * rank).collect();

        let dec_shape = BatchShape::new(batch, rank, dec_dims.2);
        let dec_plan = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape: dec_shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(dec_buffer, dec_shape),
            x: VectorAccess::with_offsets(population.output().clone(), src_offsets, 1),
            beta: 0.0,
            y: VectorAccess::with_offsets(decoded.clone(), decoded_offsets.clone(), 1),
            queues: vec![queue.clone()],
        })?;

        let enc_shape = BatchShape::new(batch, enc_dims.1, rank);
        let enc_plan = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape: enc_shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(enc_buffer, enc_shape),
            x: VectorAccess::with_offsets(decoded.clone(), decoded_offsets, 1),
            beta: 1.0,
            y: VectorAccess::with_offsets(population.input_current().clone(), dst_offsets, 1),
            queues: vec![queue.clone()],
        })?;

        debug!(
            population = %population.name(),
            members = batch,
            rank,
            selector = selector.name(),
            "built low-rank batch"
        );

        Ok(Self {
            connections: connections.to_vec(),
            population: population_id,
            queue,
            rank,
            dec_stack,
            enc_stack,
            decoded,
            dec_plan,
            enc_plan,
        })
    }

    /// Queue decode then encode for every member
    pub fn enqueue_update(&self, queue: &Queue) -> EngineResult<()> {
        self.dec_plan.enqueue(queue)?;
        self.enc_plan.enqueue(queue)?;
        Ok(())
    }

    pub fn connections(&self) -> &[LowRankConnection] {
        &self.connections
    }

    pub fn population(&self) -> PopulationId {
        self.population
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// `[B, rank, n]`
    pub fn dec_shape(&self) -> [usize; 3] {
        let (b, r, n) = self.dec_stack.dim();
        [b, r, n]
    }

    /// `[B, m, rank]`
    pub fn enc_shape(&self) -> [usize; 3] {
        let (b, m, r) = self.enc_stack.dim();
        [b, m, r]
    }

    pub fn dec_stack(&self) -> &Array3<f32> {
        &self.dec_stack
    }

    pub fn enc_stack(&self) -> &Array3<f32> {
        &self.enc_stack
    }

    /// Intermediate decoded values, `rank` per member
    pub fn decoded(&self) -> &DeviceBuffer {
        &self.decoded
    }

    /// Kernels issued per update
    pub fn kernel_count(&self) -> usize {
        2
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Batch of dense connections sharing one population
pub struct DenseBatch {
    connections: Vec<DenseConnection>,
    population: PopulationId,
    queue: Queue,
    weight_stack: Array3<f32>,
    plan: Box<dyn BatchedPlan>,
}

impl DenseBatch {
    pub fn new(
        connections: &[DenseConnection],
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Self> {
        let (population_id, queue) = check_members(
            connections
                .iter()
                .map(|c| (c.queue(), c.src(), c.dst())),
        )?;

        let mut population = None;
        for connection in connections {
            let (src, _) = connection.validate(populations)?;
            population = Some(src);
        }
        let population = population.ok_or(EngineError::EmptyBatch)?;

        let weights: Vec<ArrayView2<'_, f32>> =
            connections.iter().map(|c| c.weights().view()).collect();
        let (weight_stack, weight_buffer) = stack_to_device("stacked dense weights", &weights)?;
        let (batch, m, n) = weight_stack.dim();

        let shape = BatchShape::new(batch, m, n);
        let plan = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(weight_buffer, shape),
            x: VectorAccess::with_offsets(
                population.output().clone(),
                connections.iter().map(|c| c.src().start).collect(),
                1,
            ),
            beta: 1.0,
            y: VectorAccess::with_offsets(
                population.input_current().clone(),
                connections.iter().map(|c| c.dst().start).collect(),
                1,
            ),
            queues: vec![queue.clone()],
        })?;

        debug!(
            population = %population.name(),
            members = batch,
            selector = selector.name(),
            "built dense batch"
        );

        Ok(Self {
            connections: connections.to_vec(),
            population: population_id,
            queue,
            weight_stack,
            plan,
        })
    }

    pub fn enqueue_update(&self, queue: &Queue) -> EngineResult<()> {
        self.plan.enqueue(queue)?;
        Ok(())
    }

    pub fn connections(&self) -> &[DenseConnection] {
        &self.connections
    }

    pub fn population(&self) -> PopulationId {
        self.population
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// `[B, m, n]`
    pub fn weight_shape(&self) -> [usize; 3] {
        let (b, m, n) = self.weight_stack.dim();
        [b, m, n]
    }

    pub fn kernel_count(&self) -> usize {
        1
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Host-side reference for one low-rank connection: `enc · (dec · x)`
#[cfg(test)]
pub(crate) fn low_rank_reference(
    dec: &ndarray::Array2<f32>,
    enc: &ndarray::Array2<f32>,
    x: &[f32],
) -> Vec<f32> {
    let x = ndarray::ArrayView1::from(x);
    enc.dot(&dec.dot(&x)).to_vec()
}
