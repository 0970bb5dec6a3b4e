// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # LIF (Leaky Integrate-and-Fire) Population
//!
//! ## Model Dynamics
//!
//! ```text
//! Membrane Potential Update (per unit, per step):
//!     J = gain × input_current + bias
//!     V(t+1) = V(t) + J - g_leak × (V(t) - V_rest)
//!
//! Firing Check:
//!     if refractory_countdown > 0:
//!         countdown -= 1, hold V at V_rest, output 0
//!     else if V(t+1) ≥ threshold:
//!         output 1, reset to V_rest, countdown = refractory_period
//!     else:
//!         output 0
//!
//! input_current is zeroed once consumed.
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use popsim_device::{DeviceBuffer, DeviceResult, Queue};

use super::{Population, PopulationId};
use crate::error::{EngineError, EngineResult};

/// LIF model parameters, shared by every unit of a population
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifParameters {
    /// Leak coefficient (0.0-1.0): fraction of (V - V_rest) lost per step
    pub leak_coefficient: f32,

    /// Resting potential: baseline membrane potential when no input
    pub resting_potential: f32,

    /// Firing threshold
    pub threshold: f32,

    /// Steps a unit stays silent after firing
    pub refractory_period: u16,

    /// Scale applied to the accumulated input current
    pub gain: f32,

    /// Constant drive added every step
    pub bias: f32,
}

impl Default for LifParameters {
    fn default() -> Self {
        Self {
            leak_coefficient: 0.1,
            resting_potential: 0.0,
            threshold: 1.0,
            refractory_period: 2,
            gain: 1.0,
            bias: 0.0,
        }
    }
}

impl LifParameters {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.leak_coefficient) {
            return Err("LIF: Leak coefficient must be in [0, 1]");
        }
        if self.threshold <= self.resting_potential {
            return Err("LIF: Threshold must exceed resting potential");
        }
        if !self.gain.is_finite() || !self.bias.is_finite() {
            return Err("LIF: Gain and bias must be finite");
        }
        Ok(())
    }
}

struct LifState {
    membrane_potentials: Vec<f32>,
    refractory_countdowns: Vec<u16>,
}

/// Population of LIF units
///
/// Clones are handles to the same units: they share buffers and state.
#[derive(Clone)]
pub struct LifPopulation {
    id: PopulationId,
    name: String,
    queue: Queue,
    params: LifParameters,
    output: DeviceBuffer,
    input_current: DeviceBuffer,
    state: Arc<Mutex<LifState>>,
}

impl LifPopulation {
    pub fn new(
        queue: &Queue,
        name: impl Into<String>,
        size: usize,
        params: LifParameters,
    ) -> EngineResult<Self> {
        params
            .validate()
            .map_err(|msg| EngineError::InvalidParameters(msg.to_string()))?;

        Ok(Self {
            id: PopulationId::fresh(),
            name: name.into(),
            queue: queue.clone(),
            params,
            output: DeviceBuffer::zeros(size),
            input_current: DeviceBuffer::zeros(size),
            state: Arc::new(Mutex::new(LifState {
                membrane_potentials: vec![params.resting_potential; size],
                refractory_countdowns: vec![0; size],
            })),
        })
    }

    pub fn params(&self) -> &LifParameters {
        &self.params
    }

    /// Host copy of the membrane potentials; drain the queue first
    pub fn membrane_potentials(&self) -> Vec<f32> {
        self.state.lock().membrane_potentials.clone()
    }
}

impl Population for LifPopulation {
    fn id(&self) -> PopulationId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.output.len()
    }

    fn queue(&self) -> &Queue {
        &self.queue
    }

    fn output(&self) -> &DeviceBuffer {
        &self.output
    }

    fn input_current(&self) -> &DeviceBuffer {
        &self.input_current
    }

    fn enqueue_update(&self, queue: &Queue) -> DeviceResult<()> {
        let params = self.params;
        let output = self.output.clone();
        let input_current = self.input_current.clone();
        let state = Arc::clone(&self.state);

        queue.submit("lif_update", move || {
            let mut state = state.lock();
            let LifState {
                membrane_potentials,
                refractory_countdowns,
            } = &mut *state;
            let mut input = input_current.lock_write();
            let mut out = output.lock_write();

            for (((v, countdown), current), fired) in membrane_potentials
                .iter_mut()
                .zip(refractory_countdowns.iter_mut())
                .zip(input.iter_mut())
                .zip(out.iter_mut())
            {
                if *countdown > 0 {
                    *countdown -= 1;
                    *v = params.resting_potential;
                    *fired = 0.0;
                } else {
                    let drive = params.gain * *current + params.bias;
                    *v = *v + drive - params.leak_coefficient * (*v - params.resting_potential);
                    if *v >= params.threshold {
                        *fired = 1.0;
                        *v = params.resting_potential;
                        *countdown = params.refractory_period;
                    } else {
                        *fired = 0.0;
                    }
                }
                *current = 0.0;
            }
            Ok(())
        })
    }
}
