// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Connections
//!
//! Descriptors for synaptic links between population views. A connection
//! performs no computation itself; it is compiled either on its own
//! ([`crate::update::SingleUpdate`]) or as a member of a batch.
//!
//! ```text
//! LowRank:  dst.input_current[dst] += enc · (dec · src.output[src])
//! Dense:    dst.input_current[dst] += W · src.output[src]
//! ```

use std::fmt;

use ndarray::Array2;
use popsim_device::Queue;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{EngineError, EngineResult};
use crate::population::{resolve_view, Population, PopulationView};

/// Batching key attached to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    LowRank,
    Dense,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::LowRank => write!(f, "low-rank"),
            ConnectionKind::Dense => write!(f, "dense"),
        }
    }
}

/// Low-rank link: a decode to `rank` dimensions followed by an encode
#[derive(Debug, Clone, PartialEq)]
pub struct LowRankConnection {
    queue: Queue,
    src: PopulationView,
    dst: PopulationView,
    /// rank × src.len
    dec: Array2<f32>,
    /// dst.len × rank
    enc: Array2<f32>,
}

impl LowRankConnection {
    /// Shapes are not checked here; batch and plan construction check them.
    pub fn new(
        queue: &Queue,
        src: PopulationView,
        dst: PopulationView,
        dec: Array2<f32>,
        enc: Array2<f32>,
    ) -> Self {
        Self {
            queue: queue.clone(),
            src,
            dst,
            dec,
            enc,
        }
    }

    pub fn rank(&self) -> usize {
        self.enc.ncols()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn src(&self) -> &PopulationView {
        &self.src
    }

    pub fn dst(&self) -> &PopulationView {
        &self.dst
    }

    pub fn dec(&self) -> &Array2<f32> {
        &self.dec
    }

    pub fn enc(&self) -> &Array2<f32> {
        &self.enc
    }

    /// Resolve both ends and check the matrices against the views
    pub(crate) fn validate<'a>(
        &self,
        populations: &'a [Box<dyn Population>],
    ) -> EngineResult<(&'a dyn Population, &'a dyn Population)> {
        let src = resolve_view(populations, &self.src)?;
        let dst = resolve_view(populations, &self.dst)?;

        let rank = self.rank();
        let expected_dec = [rank, self.src.len];
        if self.dec.dim() != (rank, self.src.len) {
            return Err(EngineError::ShapeMismatch {
                context: "low-rank decoder (rank × source units)".to_string(),
                expected: expected_dec.to_vec(),
                actual: self.dec.shape().to_vec(),
            });
        }
        if self.enc.nrows() != self.dst.len {
            return Err(EngineError::ShapeMismatch {
                context: "low-rank encoder (destination units × rank)".to_string(),
                expected: vec![self.dst.len, rank],
                actual: self.enc.shape().to_vec(),
            });
        }
        Ok((src, dst))
    }
}

/// Full-weight link
#[derive(Debug, Clone, PartialEq)]
pub struct DenseConnection {
    queue: Queue,
    src: PopulationView,
    dst: PopulationView,
    /// dst.len × src.len
    weights: Array2<f32>,
}

impl DenseConnection {
    pub fn new(
        queue: &Queue,
        src: PopulationView,
        dst: PopulationView,
        weights: Array2<f32>,
    ) -> Self {
        Self {
            queue: queue.clone(),
            src,
            dst,
            weights,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn src(&self) -> &PopulationView {
        &self.src
    }

    pub fn dst(&self) -> &PopulationView {
        &self.dst
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub(crate) fn validate<'a>(
        &self,
        populations: &'a [Box<dyn Population>],
    ) -> EngineResult<(&'a dyn Population, &'a dyn Population)> {
        let src = resolve_view(populations, &self.src)?;
        let dst = resolve_view(populations, &self.dst)?;
        if self.weights.dim() != (self.dst.len, self.src.len) {
            return Err(EngineError::ShapeMismatch {
                context: "dense weights (destination units × source units)".to_string(),
                expected: vec![self.dst.len, self.src.len],
                actual: self.weights.shape().to_vec(),
            });
        }
        Ok((src, dst))
    }
}

/// Any connection the simulator can schedule
#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    LowRank(LowRankConnection),
    Dense(DenseConnection),
}

impl Connection {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            Connection::LowRank(_) => ConnectionKind::LowRank,
            Connection::Dense(_) => ConnectionKind::Dense,
        }
    }

    pub fn queue(&self) -> &Queue {
        match self {
            Connection::LowRank(c) => c.queue(),
            Connection::Dense(c) => c.queue(),
        }
    }

    pub fn src(&self) -> &PopulationView {
        match self {
            Connection::LowRank(c) => c.src(),
            Connection::Dense(c) => c.src(),
        }
    }

    pub fn dst(&self) -> &PopulationView {
        match self {
            Connection::LowRank(c) => c.dst(),
            Connection::Dense(c) => c.dst(),
        }
    }
}

impl From<LowRankConnection> for Connection {
    fn from(connection: LowRankConnection) -> Self {
        Connection::LowRank(connection)
    }
}

impl From<DenseConnection> for Connection {
    fn from(connection: DenseConnection) -> Self {
        Connection::Dense(connection)
    }
}

/// Random low-rank connection drawn from the thread-local RNG
pub fn random_low_rank_connection(
    queue: &Queue,
    src: PopulationView,
    dst: PopulationView,
    rank: usize,
) -> LowRankConnection {
    random_low_rank_connection_with_rng(queue, src, dst, rank, &mut rand::thread_rng())
}

/// Random low-rank connection with standard-normal `dec` and `enc`
pub fn random_low_rank_connection_with_rng<R: Rng + ?Sized>(
    queue: &Queue,
    src: PopulationView,
    dst: PopulationView,
    rank: usize,
    rng: &mut R,
) -> LowRankConnection {
    let mut sample = || {
        let value: f64 = rng.sample(StandardNormal);
        value as f32
    };
    let dec = Array2::from_shape_simple_fn((rank, src.len), &mut sample);
    let enc = Array2::from_shape_simple_fn((dst.len, rank), &mut sample);
    LowRankConnection::new(queue, src, dst, dec, enc)
}
