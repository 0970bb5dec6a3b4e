// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `popsim.toml`. Every section is optional; missing keys take the defaults
//! below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PopsimConfig {
    pub simulation: SimulationConfig,
    pub batching: BatchingConfig,
    pub plan: PlanSettings,
    pub logging: LoggingConfig,
}

/// Simulation-wide settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for randomly initialised connections (None = thread RNG)
    pub seed: Option<u64>,
}

/// Connection batching
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    /// Smallest same-kind group that is batched (must be >= 2)
    pub min_batch_size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_batch_size: 2,
        }
    }
}

/// Strategy name as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    #[default]
    Auto,
    Serial,
    Parallel,
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyName::Auto => write!(f, "auto"),
            StrategyName::Serial => write!(f, "serial"),
            StrategyName::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for StrategyName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(StrategyName::Auto),
            "serial" => Ok(StrategyName::Serial),
            "parallel" => Ok(StrategyName::Parallel),
            _ => Err(format!(
                "unknown plan strategy '{}' (expected auto, serial or parallel)",
                s
            )),
        }
    }
}

/// Plan selection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanSettings {
    pub strategy: StrategyName,
    /// Minimum `batch × m × n` before `auto` goes parallel
    pub parallel_threshold: usize,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyName::Auto,
            parallel_threshold: 65_536,
        }
    }
}

/// Logging
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
