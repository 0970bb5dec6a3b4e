// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Compiled per-step connection work
//!
//! Every connection reaches the simulator as an [`Updatable`]: either alone
//! ([`SingleUpdate`], a batch of one with private scratch) or as a member of a
//! same-kind batch.

use popsim_device::{DeviceBuffer, Queue};

use crate::batch::{DenseBatch, LowRankBatch};
use crate::connection::{Connection, DenseConnection, LowRankConnection};
use crate::error::EngineResult;
use crate::plan::{
    BatchShape, BatchedPlan, GemvBatchedRequest, MatrixAccess, PlanSelector, VectorAccess,
};
use crate::population::Population;

/// One connection compiled on its own
///
/// Unlike a batch, source and destination may sit in different populations.
pub struct SingleUpdate {
    connection: Connection,
    plans: Vec<Box<dyn BatchedPlan>>,
}

impl SingleUpdate {
    pub fn compile(
        connection: &Connection,
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Self> {
        let plans = match connection {
            Connection::LowRank(c) => Self::low_rank_plans(c, populations, selector)?,
            Connection::Dense(c) => Self::dense_plans(c, populations, selector)?,
        };
        Ok(Self {
            connection: connection.clone(),
            plans,
        })
    }

    fn low_rank_plans(
        connection: &LowRankConnection,
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Vec<Box<dyn BatchedPlan>>> {
        let (src, dst) = connection.validate(populations)?;
        let queue = connection.queue();
        let rank = connection.rank();
        let scratch = DeviceBuffer::zeros(rank);

        let dec_shape = BatchShape::new(1, rank, connection.src().len);
        let decode = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape: dec_shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(DeviceBuffer::to_device(&flatten(connection.dec())), dec_shape),
            x: VectorAccess::with_offsets(src.output().clone(), vec![connection.src().start], 1),
            beta: 0.0,
            y: VectorAccess::with_offsets(scratch.clone(), vec![0], 1),
            queues: vec![queue.clone(), src.queue().clone()],
        })?;

        let enc_shape = BatchShape::new(1, connection.dst().len, rank);
        let encode = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape: enc_shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(DeviceBuffer::to_device(&flatten(connection.enc())), enc_shape),
            x: VectorAccess::with_offsets(scratch, vec![0], 1),
            beta: 1.0,
            y: VectorAccess::with_offsets(
                dst.input_current().clone(),
                vec![connection.dst().start],
                1,
            ),
            queues: vec![queue.clone(), dst.queue().clone()],
        })?;

        Ok(vec![decode, encode])
    }

    fn dense_plans(
        connection: &DenseConnection,
        populations: &[Box<dyn Population>],
        selector: &dyn PlanSelector,
    ) -> EngineResult<Vec<Box<dyn BatchedPlan>>> {
        let (src, dst) = connection.validate(populations)?;
        let shape = BatchShape::new(1, connection.dst().len, connection.src().len);
        let plan = selector.choose_gemv_batched_plan(GemvBatchedRequest {
            shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(DeviceBuffer::to_device(&flatten(connection.weights())), shape),
            x: VectorAccess::with_offsets(src.output().clone(), vec![connection.src().start], 1),
            beta: 1.0,
            y: VectorAccess::with_offsets(
                dst.input_current().clone(),
                vec![connection.dst().start],
                1,
            ),
            queues: vec![
                connection.queue().clone(),
                src.queue().clone(),
                dst.queue().clone(),
            ],
        })?;
        Ok(vec![plan])
    }

    pub fn enqueue_update(&self, queue: &Queue) -> EngineResult<()> {
        for plan in &self.plans {
            plan.enqueue(queue)?;
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn kernel_count(&self) -> usize {
        self.plans.len()
    }
}

/// Row-major copy of a matrix
fn flatten(matrix: &ndarray::Array2<f32>) -> Vec<f32> {
    matrix.iter().copied().collect()
}

/// Anything the simulator issues once per step for a connection group
pub enum Updatable {
    Single(SingleUpdate),
    LowRankBatch(LowRankBatch),
    DenseBatch(DenseBatch),
}

impl Updatable {
    pub fn enqueue_update(&self, queue: &Queue) -> EngineResult<()> {
        match self {
            Updatable::Single(u) => u.enqueue_update(queue),
            Updatable::LowRankBatch(b) => b.enqueue_update(queue),
            Updatable::DenseBatch(b) => b.enqueue_update(queue),
        }
    }

    /// Kernels issued per step
    pub fn kernel_count(&self) -> usize {
        match self {
            Updatable::Single(u) => u.kernel_count(),
            Updatable::LowRankBatch(b) => b.kernel_count(),
            Updatable::DenseBatch(b) => b.kernel_count(),
        }
    }

    /// Connections covered
    pub fn member_count(&self) -> usize {
        match self {
            Updatable::Single(_) => 1,
            Updatable::LowRankBatch(b) => b.len(),
            Updatable::DenseBatch(b) => b.len(),
        }
    }

    pub fn is_batch(&self) -> bool {
        !matches!(self, Updatable::Single(_))
    }
}
