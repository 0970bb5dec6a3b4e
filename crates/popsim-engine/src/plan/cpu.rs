// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # CPU Plan Selector
//!
//! Executes batched gemv families on the queue worker thread. The parallel
//! strategy computes every member's result on the rayon pool before writing
//! any of them back, so members whose Y ranges overlap still accumulate
//! exactly as in the serial order.

use std::sync::Arc;

use popsim_device::Queue;
use rayon::prelude::*;
use tracing::debug;

use super::{
    select_strategy, validate_request, BatchShape, BatchedPlan, GemvBatchedRequest, MatrixAccess,
    PlanConfig, PlanError, PlanResult, PlanSelector, PlanStrategy, VectorAccess,
};

/// Plan selector for the host CPU
pub struct CpuPlanSelector {
    /// Selector name for logging
    name: String,

    config: PlanConfig,
}

impl CpuPlanSelector {
    pub fn new(config: PlanConfig) -> Self {
        Self {
            name: format!("CPU ({})", config.strategy),
            config,
        }
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }
}

impl Default for CpuPlanSelector {
    fn default() -> Self {
        Self::new(PlanConfig::default())
    }
}

impl PlanSelector for CpuPlanSelector {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_gemv_batched_plan(
        &self,
        request: GemvBatchedRequest,
    ) -> PlanResult<Box<dyn BatchedPlan>> {
        validate_request(&request)?;
        let decision = select_strategy(&request, &self.config);
        debug!(
            selector = %self.name,
            shape = %request.shape,
            strategy = %decision.strategy,
            "{}",
            decision.reason
        );

        let GemvBatchedRequest {
            shape,
            alpha,
            a,
            x,
            beta,
            y,
            mut queues,
        } = request;
        // validate_request guarantees at least one queue
        let queue = queues.swap_remove(0);

        Ok(Box::new(CpuGemvPlan {
            queue,
            strategy: decision.strategy,
            kernel: Arc::new(GemvKernel {
                shape,
                alpha,
                a,
                x,
                beta,
                y,
            }),
        }))
    }
}

#[derive(Debug)]
struct GemvKernel {
    shape: BatchShape,
    alpha: f32,
    a: MatrixAccess,
    x: VectorAccess,
    beta: f32,
    y: VectorAccess,
}

impl GemvKernel {
    #[inline(always)]
    fn combine(&self, acc: f32, previous: f32) -> f32 {
        // beta == 0 must not propagate NaN/Inf from stale Y contents
        if self.beta == 0.0 {
            self.alpha * acc
        } else {
            self.alpha * acc + self.beta * previous
        }
    }

    fn dot(&self, a: &[f32], x: &[f32], x_offset: usize, b: usize, i: usize) -> f32 {
        (0..self.shape.n)
            .map(|j| a[self.a.index(b, i, j)] * x[x_offset + j * self.x.stride])
            .sum()
    }

    fn run_serial(&self) {
        let a = self.a.buffer.lock_read();

        if self.x.buffer.same_buffer(&self.y.buffer) {
            // Inputs are read before any output of this launch is written
            let x = self.x.buffer.lock_read().clone();
            let mut y = self.y.buffer.lock_write();
            let results = self.compute_all(&a, &x, false);
            self.write_back(&mut y, &results);
            return;
        }

        let x = self.x.buffer.lock_read();
        let mut y = self.y.buffer.lock_write();
        for b in 0..self.shape.batch {
            let x_offset = self.x.offsets[b];
            let y_offset = self.y.offsets[b];
            for i in 0..self.shape.m {
                let acc = self.dot(&a, &x, x_offset, b, i);
                let slot = &mut y[y_offset + i * self.y.stride];
                *slot = self.combine(acc, *slot);
            }
        }
    }

    fn run_parallel(&self) {
        let a = self.a.buffer.lock_read();
        let x = self.x.buffer.lock_read().clone();
        let results = self.compute_all(&a, &x, true);
        let mut y = self.y.buffer.lock_write();
        self.write_back(&mut y, &results);
    }

    /// Raw `A_b · x_b` for every member
    fn compute_all(&self, a: &[f32], x: &[f32], parallel: bool) -> Vec<Vec<f32>> {
        let member = |b: usize| -> Vec<f32> {
            let x_offset = self.x.offsets[b];
            (0..self.shape.m)
                .map(|i| self.dot(a, x, x_offset, b, i))
                .collect()
        };
        if parallel {
            (0..self.shape.batch).into_par_iter().map(member).collect()
        } else {
            (0..self.shape.batch).map(member).collect()
        }
    }

    /// Apply alpha/beta in member order
    fn write_back(&self, y: &mut [f32], results: &[Vec<f32>]) {
        for (b, acc) in results.iter().enumerate() {
            let y_offset = self.y.offsets[b];
            for (i, &value) in acc.iter().enumerate() {
                let slot = &mut y[y_offset + i * self.y.stride];
                *slot = self.combine(value, *slot);
            }
        }
    }
}

/// One batched gemv family bound to a queue
#[derive(Debug)]
struct CpuGemvPlan {
    queue: Queue,
    strategy: PlanStrategy,
    kernel: Arc<GemvKernel>,
}

impl BatchedPlan for CpuGemvPlan {
    fn shape(&self) -> BatchShape {
        self.kernel.shape
    }

    fn strategy(&self) -> PlanStrategy {
        self.strategy
    }

    fn enqueue(&self, queue: &Queue) -> PlanResult<()> {
        if *queue != self.queue {
            return Err(PlanError::QueueMismatch {
                expected: self.queue.id(),
                found: queue.id(),
            });
        }

        let kernel = Arc::clone(&self.kernel);
        match self.strategy {
            PlanStrategy::Parallel => queue.submit("gemv_batched_parallel", move || {
                kernel.run_parallel();
                Ok(())
            })?,
            _ => queue.submit("gemv_batched_serial", move || {
                kernel.run_serial();
                Ok(())
            })?,
        }
        Ok(())
    }
}
