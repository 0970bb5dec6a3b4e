// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Device-resident f32 buffers
//!
//! A `DeviceBuffer` is a cheaply clonable handle; clones alias the same
//! storage. Kernels lock the storage only while they run. Ordering between
//! kernels comes from the queue, not from the lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{DeviceError, DeviceResult};
use crate::queue::Queue;

/// Handle to a fixed-length device vector
#[derive(Clone)]
pub struct DeviceBuffer {
    data: Arc<RwLock<Vec<f32>>>,
    len: usize,
}

impl DeviceBuffer {
    /// Allocate a zero-filled buffer
    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![0.0; len])
    }

    /// Transfer host data into a new buffer
    pub fn to_device(data: &[f32]) -> Self {
        Self::from_vec(data.to_vec())
    }

    pub fn from_vec(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(RwLock::new(data)),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when both handles alias the same storage
    pub fn same_buffer(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Check that `[offset, offset + count)` lies inside the buffer
    pub fn check_range(&self, offset: usize, count: usize) -> DeviceResult<()> {
        let end = offset.checked_add(count).unwrap_or(usize::MAX);
        if end > self.len {
            return Err(DeviceError::OutOfBounds {
                offset,
                end,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Copy the buffer to the host.
    ///
    /// Not ordered against queued kernels; drain the queue first.
    pub fn read(&self) -> Vec<f32> {
        self.data.read().clone()
    }

    /// Copy `[offset, offset + count)` to the host (see [`DeviceBuffer::read`])
    pub fn read_range(&self, offset: usize, count: usize) -> DeviceResult<Vec<f32>> {
        self.check_range(offset, count)?;
        Ok(self.data.read()[offset..offset + count].to_vec())
    }

    /// Shared access for a running kernel
    pub fn lock_read(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.data.read()
    }

    /// Exclusive access for a running kernel
    pub fn lock_write(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.data.write()
    }

    /// Queue a host-to-device copy into `[offset, offset + data.len())`
    pub fn enqueue_write(&self, queue: &Queue, offset: usize, data: Vec<f32>) -> DeviceResult<()> {
        self.check_range(offset, data.len())?;
        let target = self.clone();
        queue.submit("buffer_write", move || {
            let mut storage = target.lock_write();
            storage[offset..offset + data.len()].copy_from_slice(&data);
            Ok(())
        })
    }

    /// Queue a fill of the whole buffer with `value`
    pub fn enqueue_fill(&self, queue: &Queue, value: f32) -> DeviceResult<()> {
        let target = self.clone();
        queue.submit("buffer_fill", move || {
            target.lock_write().fill(value);
            Ok(())
        })
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer").field("len", &self.len).finish()
    }
}
