// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # popsim-observability
//!
//! Logging setup shared by every popsim binary and test harness, with
//! per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: timestamped `run_*` log folders with retention

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

// Re-export commonly used items
pub use cli::*;
pub use config::*;
pub use init::*;

/// Known popsim crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "popsim",
    "popsim-device",
    "popsim-engine",
    "popsim-config",
    "popsim-observability",
];
