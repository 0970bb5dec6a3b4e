// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Batched GEMV Plan Selection
//!
//! A batched gemv family computes, for every member `b` of a batch:
//!
//! ```text
//! y_b = alpha · A_b · x_b + beta · y_b        (A_b is m × n)
//! ```
//!
//! Callers describe where each operand lives with access descriptors and ask a
//! [`PlanSelector`] for an executable [`BatchedPlan`]. Each plan enqueues
//! exactly one kernel, whatever the batch size.

mod cpu;

pub use cpu::CpuPlanSelector;

use std::fmt;

use popsim_device::{DeviceBuffer, DeviceError, Queue, QueueId};
use tracing::warn;

/// Plan selection errors
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid batch shape {shape}: {reason}")]
    InvalidShape { shape: BatchShape, reason: String },

    #[error("Operand {operand} needs index {required} but its buffer holds {len} elements")]
    AccessOutOfBounds {
        operand: &'static str,
        required: usize,
        len: usize,
    },

    #[error("Operand {operand} has {actual} batch offsets, expected {expected}")]
    OffsetCountMismatch {
        operand: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Operands {first} and {second} alias the same buffer")]
    AliasedOperands {
        first: &'static str,
        second: &'static str,
    },

    #[error("No queue supplied for plan")]
    NoQueue,

    #[error("Plan bound to queue {expected} cannot run on queue {found}")]
    QueueMismatch { expected: QueueId, found: QueueId },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type for plan operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Batch dimensions `(batch, m, n)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchShape {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
}

impl BatchShape {
    pub fn new(batch: usize, m: usize, n: usize) -> Self {
        Self { batch, m, n }
    }

    /// Multiply-accumulates per execution
    pub fn work(&self) -> usize {
        self.batch * self.m * self.n
    }
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} × {} × {}]", self.batch, self.m, self.n)
    }
}

/// Where the stacked matrices `A_b` live
#[derive(Debug, Clone)]
pub struct MatrixAccess {
    pub buffer: DeviceBuffer,
    pub offset: usize,
    pub batch_stride: usize,
    pub row_stride: usize,
    pub col_stride: usize,
}

impl MatrixAccess {
    /// Row-major `[batch, m, n]` stack starting at element 0
    pub fn contiguous(buffer: DeviceBuffer, shape: BatchShape) -> Self {
        Self {
            buffer,
            offset: 0,
            batch_stride: shape.m * shape.n,
            row_stride: shape.n,
            col_stride: 1,
        }
    }

    #[inline(always)]
    pub(crate) fn index(&self, b: usize, i: usize, j: usize) -> usize {
        self.offset + b * self.batch_stride + i * self.row_stride + j * self.col_stride
    }
}

/// Where each member's vector starts, plus the element stride
#[derive(Debug, Clone)]
pub struct VectorAccess {
    pub buffer: DeviceBuffer,
    pub offsets: Vec<usize>,
    pub stride: usize,
}

impl VectorAccess {
    /// Member `b` starts at `offset + b * batch_stride`
    pub fn strided(
        buffer: DeviceBuffer,
        offset: usize,
        batch_stride: usize,
        stride: usize,
        batch: usize,
    ) -> Self {
        Self {
            buffer,
            offsets: (0..batch).map(|b| offset + b * batch_stride).collect(),
            stride,
        }
    }

    /// Members start at explicit offsets
    pub fn with_offsets(buffer: DeviceBuffer, offsets: Vec<usize>, stride: usize) -> Self {
        Self {
            buffer,
            offsets,
            stride,
        }
    }
}

/// Everything a selector needs to pick and build a plan
#[derive(Debug, Clone)]
pub struct GemvBatchedRequest {
    pub shape: BatchShape,
    pub alpha: f32,
    pub a: MatrixAccess,
    pub x: VectorAccess,
    pub beta: f32,
    pub y: VectorAccess,
    pub queues: Vec<Queue>,
}

/// Executable plan for one batched gemv family
pub trait BatchedPlan: Send + Sync + fmt::Debug {
    fn shape(&self) -> BatchShape;

    fn strategy(&self) -> PlanStrategy;

    /// Submit the whole batch as one kernel
    fn enqueue(&self, queue: &Queue) -> PlanResult<()>;
}

/// Builds plans for batched gemv families
pub trait PlanSelector: Send + Sync {
    /// Selector name for logging/debugging
    fn name(&self) -> &str;

    fn choose_gemv_batched_plan(
        &self,
        request: GemvBatchedRequest,
    ) -> PlanResult<Box<dyn BatchedPlan>>;
}

/// Execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanStrategy {
    /// One member after another on the queue worker
    Serial,

    /// Members fanned out over the rayon pool, results written back in order
    Parallel,

    /// Decide from the request's size
    #[default]
    Auto,
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStrategy::Serial => write!(f, "serial"),
            PlanStrategy::Parallel => write!(f, "parallel"),
            PlanStrategy::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for PlanStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" => Ok(PlanStrategy::Serial),
            "parallel" => Ok(PlanStrategy::Parallel),
            "auto" => Ok(PlanStrategy::Auto),
            _ => Err(format!("unknown plan strategy '{}'", s)),
        }
    }
}

/// Configuration for strategy selection
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub strategy: PlanStrategy,

    /// Minimum `batch × m × n` before `Auto` fans out (default: 65,536)
    pub parallel_threshold: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            strategy: PlanStrategy::Auto,
            parallel_threshold: 65_536,
        }
    }
}

/// Strategy decision with rationale
#[derive(Debug, Clone)]
pub struct PlanDecision {
    pub strategy: PlanStrategy,
    pub reason: String,
}

/// Check a request is executable: sane shape, in-bounds accesses, one queue
pub fn validate_request(request: &GemvBatchedRequest) -> PlanResult<()> {
    let shape = request.shape;
    if shape.batch == 0 || shape.m == 0 || shape.n == 0 {
        return Err(PlanError::InvalidShape {
            shape,
            reason: "every dimension must be non-zero".to_string(),
        });
    }
    if request.x.stride == 0 || request.y.stride == 0 {
        return Err(PlanError::InvalidShape {
            shape,
            reason: "vector strides must be non-zero".to_string(),
        });
    }

    let first_queue = request.queues.first().ok_or(PlanError::NoQueue)?;
    if let Some(other) = request.queues.iter().find(|q| *q != first_queue) {
        return Err(PlanError::QueueMismatch {
            expected: first_queue.id(),
            found: other.id(),
        });
    }

    if request.a.buffer.same_buffer(&request.x.buffer) {
        return Err(PlanError::AliasedOperands {
            first: "A",
            second: "X",
        });
    }
    if request.a.buffer.same_buffer(&request.y.buffer) {
        return Err(PlanError::AliasedOperands {
            first: "A",
            second: "Y",
        });
    }

    let a_last = request.a.index(shape.batch - 1, shape.m - 1, shape.n - 1);
    check_index("A", a_last, &request.a.buffer)?;

    check_vector("X", &request.x, shape.batch, shape.n)?;
    check_vector("Y", &request.y, shape.batch, shape.m)?;
    Ok(())
}

fn check_vector(
    operand: &'static str,
    access: &VectorAccess,
    batch: usize,
    count: usize,
) -> PlanResult<()> {
    if access.offsets.len() != batch {
        return Err(PlanError::OffsetCountMismatch {
            operand,
            expected: batch,
            actual: access.offsets.len(),
        });
    }
    for &offset in &access.offsets {
        check_index(operand, offset + (count - 1) * access.stride, &access.buffer)?;
    }
    Ok(())
}

fn check_index(operand: &'static str, last: usize, buffer: &DeviceBuffer) -> PlanResult<()> {
    if last >= buffer.len() {
        return Err(PlanError::AccessOutOfBounds {
            operand,
            required: last,
            len: buffer.len(),
        });
    }
    Ok(())
}

/// Pick the execution strategy for a validated request
///
/// Selection priority:
/// 1. Honor a forced strategy
/// 2. Single-member batches and X/Y aliasing run serially
/// 3. Fan out when `batch × m × n` reaches the threshold
pub fn select_strategy(request: &GemvBatchedRequest, config: &PlanConfig) -> PlanDecision {
    let aliased = request.x.buffer.same_buffer(&request.y.buffer);
    let work = request.shape.work();

    match config.strategy {
        PlanStrategy::Serial => PlanDecision {
            strategy: PlanStrategy::Serial,
            reason: "Forced serial via configuration".to_string(),
        },
        PlanStrategy::Parallel if aliased => {
            warn!(shape = %request.shape, "parallel forced but X aliases Y, running serially");
            PlanDecision {
                strategy: PlanStrategy::Serial,
                reason: "Forced parallel downgraded: X aliases Y".to_string(),
            }
        }
        PlanStrategy::Parallel => PlanDecision {
            strategy: PlanStrategy::Parallel,
            reason: "Forced parallel via configuration".to_string(),
        },
        PlanStrategy::Auto if request.shape.batch < 2 => PlanDecision {
            strategy: PlanStrategy::Serial,
            reason: "Serial selected: single-member batch".to_string(),
        },
        PlanStrategy::Auto if aliased => PlanDecision {
            strategy: PlanStrategy::Serial,
            reason: "Serial selected: X aliases Y".to_string(),
        },
        PlanStrategy::Auto if work >= config.parallel_threshold => PlanDecision {
            strategy: PlanStrategy::Parallel,
            reason: format!(
                "Parallel selected: {} multiply-adds >= threshold {}",
                work, config.parallel_threshold
            ),
        },
        PlanStrategy::Auto => PlanDecision {
            strategy: PlanStrategy::Serial,
            reason: format!(
                "Serial selected: {} multiply-adds < threshold {}",
                work, config.parallel_threshold
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(batch: usize, m: usize, n: usize, queue: &Queue) -> GemvBatchedRequest {
        let shape = BatchShape::new(batch, m, n);
        GemvBatchedRequest {
            shape,
            alpha: 1.0,
            a: MatrixAccess::contiguous(DeviceBuffer::zeros(batch * m * n), shape),
            x: VectorAccess::strided(DeviceBuffer::zeros(batch * n), 0, n, 1, batch),
            beta: 0.0,
            y: VectorAccess::strided(DeviceBuffer::zeros(batch * m), 0, m, 1, batch),
            queues: vec![queue.clone()],
        }
    }

    #[test]
    fn test_valid_request() {
        let queue = Queue::new("plan-valid").unwrap();
        assert!(validate_request(&request(3, 2, 4, &queue)).is_ok());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let queue = Queue::new("plan-zero").unwrap();
        let mut req = request(2, 2, 2, &queue);
        req.shape = BatchShape::new(2, 0, 2);
        assert!(matches!(validate_request(&req), Err(PlanError::InvalidShape { .. })));
    }

    #[test]
    fn test_out_of_bounds_operands_rejected() {
        let queue = Queue::new("plan-oob").unwrap();

        let mut req = request(2, 2, 3, &queue);
        req.x = VectorAccess::strided(DeviceBuffer::zeros(5), 0, 3, 1, 2);
        assert!(matches!(
            validate_request(&req),
            Err(PlanError::AccessOutOfBounds { operand: "X", required: 5, len: 5 })
        ));

        let mut req = request(2, 2, 3, &queue);
        req.a = MatrixAccess::contiguous(DeviceBuffer::zeros(11), req.shape);
        assert!(matches!(
            validate_request(&req),
            Err(PlanError::AccessOutOfBounds { operand: "A", .. })
        ));
    }

    #[test]
    fn test_offset_count_and_queue_checks() {
        let queue = Queue::new("plan-q1").unwrap();
        let other = Queue::new("plan-q2").unwrap();

        let mut req = request(2, 2, 2, &queue);
        req.y.offsets.pop();
        assert!(matches!(
            validate_request(&req),
            Err(PlanError::OffsetCountMismatch { operand: "Y", expected: 2, actual: 1 })
        ));

        let mut req = request(2, 2, 2, &queue);
        req.queues.clear();
        assert!(matches!(validate_request(&req), Err(PlanError::NoQueue)));

        let mut req = request(2, 2, 2, &queue);
        req.queues.push(other);
        assert!(matches!(validate_request(&req), Err(PlanError::QueueMismatch { .. })));
    }

    #[test]
    fn test_matrix_aliasing_rejected() {
        let queue = Queue::new("plan-alias").unwrap();
        let mut req = request(1, 2, 2, &queue);
        req.y.buffer = req.a.buffer.clone();
        assert!(matches!(
            validate_request(&req),
            Err(PlanError::AliasedOperands { first: "A", second: "Y" })
        ));
    }

    #[test]
    fn test_strategy_selection() {
        let queue = Queue::new("plan-select").unwrap();
        let config = PlanConfig {
            parallel_threshold: 100,
            ..Default::default()
        };

        let small = select_strategy(&request(4, 2, 2, &queue), &config);
        assert_eq!(small.strategy, PlanStrategy::Serial);
        assert!(small.reason.contains("Serial selected"));

        let large = select_strategy(&request(4, 5, 5, &queue), &config);
        assert_eq!(large.strategy, PlanStrategy::Parallel);

        let single = select_strategy(&request(1, 50, 50, &queue), &config);
        assert_eq!(single.strategy, PlanStrategy::Serial);

        let forced = PlanConfig {
            strategy: PlanStrategy::Serial,
            ..config.clone()
        };
        let decision = select_strategy(&request(4, 5, 5, &queue), &forced);
        assert_eq!(decision.strategy, PlanStrategy::Serial);
        assert!(decision.reason.contains("Forced serial"));

        let mut aliased = request(2, 2, 2, &queue);
        aliased.y.buffer = aliased.x.buffer.clone();
        let forced_parallel = PlanConfig {
            strategy: PlanStrategy::Parallel,
            ..config
        };
        assert_eq!(
            select_strategy(&aliased, &forced_parallel).strategy,
            PlanStrategy::Serial
        );
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Serial".parse::<PlanStrategy>().unwrap(), PlanStrategy::Serial);
        assert_eq!("parallel".parse::<PlanStrategy>().unwrap(), PlanStrategy::Parallel);
        assert_eq!("auto".parse::<PlanStrategy>().unwrap(), PlanStrategy::Auto);
        assert!("gpu".parse::<PlanStrategy>().is_err());
    }
}
