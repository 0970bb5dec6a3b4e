// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)
//!
//! Override values that fail to parse are ignored; the previous tier's value
//! stays in place.

use crate::{ConfigError, ConfigResult, PopsimConfig, StrategyName};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// File name searched for when no path is given
pub const CONFIG_FILE_NAME: &str = "popsim.toml";

/// Find the popsim configuration file
///
/// Search order:
/// 1. `POPSIM_CONFIG_PATH` environment variable
/// 2. Current working directory: `./popsim.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("POPSIM_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by POPSIM_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "popsim configuration file '{}' not found in any of these locations:\n{}\n\nSet POPSIM_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides keyed by dotted path
///   (e.g. `"plan.strategy"`)
///
/// Validation is left to the caller ([`crate::validate_config`]).
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<PopsimConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: PopsimConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Set one dotted-path key; returns false when the key or value is not understood
fn apply_override(config: &mut PopsimConfig, key: &str, value: &str) -> bool {
    match key {
        "simulation.seed" => match value.parse::<u64>() {
            Ok(seed) => config.simulation.seed = Some(seed),
            Err(_) => return false,
        },
        "batching.enabled" => match parse_bool(value) {
            Some(enabled) => config.batching.enabled = enabled,
            None => return false,
        },
        "batching.min_batch_size" => match value.parse::<usize>() {
            Ok(size) => config.batching.min_batch_size = size,
            Err(_) => return false,
        },
        "plan.strategy" => match value.parse::<StrategyName>() {
            Ok(strategy) => config.plan.strategy = strategy,
            Err(_) => return false,
        },
        "plan.parallel_threshold" => match value.parse::<usize>() {
            Ok(threshold) => config.plan.parallel_threshold = threshold,
            Err(_) => return false,
        },
        "logging.level" => config.logging.level = value.to_string(),
        _ => return false,
    }
    true
}

/// Environment variable → dotted config key
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("POPSIM_SEED", "simulation.seed"),
    ("POPSIM_BATCHING_ENABLED", "batching.enabled"),
    ("POPSIM_MIN_BATCH_SIZE", "batching.min_batch_size"),
    ("POPSIM_PLAN_STRATEGY", "plan.strategy"),
    ("POPSIM_PARALLEL_THRESHOLD", "plan.parallel_threshold"),
    ("POPSIM_LOG_LEVEL", "logging.level"),
];

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `POPSIM_SEED` -> `simulation.seed`
/// - `POPSIM_BATCHING_ENABLED` -> `batching.enabled`
/// - `POPSIM_MIN_BATCH_SIZE` -> `batching.min_batch_size`
/// - `POPSIM_PLAN_STRATEGY` -> `plan.strategy`
/// - `POPSIM_PARALLEL_THRESHOLD` -> `plan.parallel_threshold`
/// - `POPSIM_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut PopsimConfig) {
    for (var, key) in ENV_OVERRIDES {
        if let Ok(value) = env::var(var) {
            apply_override(config, key, &value);
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap keyed by dotted path (e.g., `{"plan.strategy": "serial"}`)
pub fn apply_cli_overrides(config: &mut PopsimConfig, cli_args: &HashMap<String, String>) {
    for (key, value) in cli_args {
        apply_override(config, key, value);
    }
}
