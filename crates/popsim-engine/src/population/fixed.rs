// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Population whose output is set by the host
//!
//! Useful as a stimulus source and for checking connection arithmetic: its
//! update leaves `output` alone and only consumes `input_current`.

use popsim_device::{DeviceBuffer, DeviceError, DeviceResult, Queue};

use super::{Population, PopulationId};

pub struct FixedOutputPopulation {
    id: PopulationId,
    name: String,
    queue: Queue,
    output: DeviceBuffer,
    input_current: DeviceBuffer,
}

impl FixedOutputPopulation {
    /// Create a population emitting `output` every step
    pub fn new(queue: &Queue, name: impl Into<String>, output: Vec<f32>) -> Self {
        let input_current = DeviceBuffer::zeros(output.len());
        Self {
            id: PopulationId::fresh(),
            name: name.into(),
            queue: queue.clone(),
            output: DeviceBuffer::from_vec(output),
            input_current,
        }
    }

    /// Queue a replacement of the whole output vector
    pub fn set_output(&self, values: Vec<f32>) -> DeviceResult<()> {
        if values.len() != self.output.len() {
            return Err(DeviceError::LengthMismatch {
                expected: self.output.len(),
                actual: values.len(),
            });
        }
        self.output.enqueue_write(&self.queue, 0, values)
    }
}

impl Population for FixedOutputPopulation {
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
        self.input_current.enqueue_fill(queue, 0.0)
    }
}
