// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # popsim Device Abstraction
//!
//! The compute "device" every popsim simulation runs on:
//! - **Queue**: an ordered, asynchronous command stream with an explicit
//!   `finish()` drain. Each queue owns one worker thread; commands run in
//!   submission order, so submission order is the only ordering primitive.
//! - **DeviceBuffer**: a device-resident `f32` vector shared between kernels
//!   and the host.
//!
//! ## Usage
//!
//! ```rust
//! use popsim_device::{DeviceBuffer, Queue};
//!
//! let queue = Queue::new("example").unwrap();
//! let buffer = DeviceBuffer::zeros(4);
//! buffer.enqueue_write(&queue, 1, vec![2.0, 3.0]).unwrap();
//! queue.finish().unwrap();
//! assert_eq!(buffer.read(), vec![0.0, 2.0, 3.0, 0.0]);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod buffer;
pub mod error;
pub mod queue;

pub use buffer::DeviceBuffer;
pub use error::{DeviceError, DeviceResult};
pub use queue::{Kernel, Queue, QueueId};
