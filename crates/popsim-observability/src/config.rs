// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Observability configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Console line format
    pub format: LogFormat,

    /// File output; `None` logs to stderr only
    pub file: Option<FileLoggingConfig>,
}

/// Console line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Timestamp, level, target and fields
    #[default]
    Full,
    /// One short line per event
    Compact,
}

/// Timestamped run folders under `dir`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// Base directory for `run_*` folders
    pub dir: PathBuf,

    /// Delete runs older than this many days
    pub retention_days: u64,

    /// Keep at most this many runs
    pub retention_runs: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
            file: None,
        }
    }
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}

impl ObservabilityConfig {
    /// Console-only config at `level`
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }
}
