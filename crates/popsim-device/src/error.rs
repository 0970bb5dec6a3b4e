// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for device operations

/// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Host data does not match the buffer it is written into
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Access outside a buffer
    #[error("Out of bounds: [{offset}, {end}) exceeds buffer length {len}")]
    OutOfBounds { offset: usize, end: usize, len: usize },

    /// A queued kernel reported a failure while executing
    #[error("Kernel '{label}' failed: {reason}")]
    KernelFailed { label: &'static str, reason: String },

    /// The worker thread could not be started
    #[error("Failed to spawn queue worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The queue no longer accepts commands (worker gone)
    #[error("Queue '{0}' is closed")]
    QueueClosed(String),

    /// The worker went away while a drain was waiting on it
    #[error("Queue '{0}' disconnected during finish")]
    Disconnected(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
