// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks every section and reports all problems at once.

use crate::{ConfigError, ConfigResult, PopsimConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    OutOfRange {
        field: String,
        value: String,
        expected: String,
    },
    InvalidValue {
        field: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                expected,
            } => {
                write!(f, "{} = {} is out of range (expected {})", field, value, expected)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - `batching.min_batch_size >= 2`
/// - `plan.parallel_threshold >= 1`
/// - `logging.level` is a known level
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every failed check
pub fn validate_config(config: &PopsimConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_batching(config, &mut errors);
    validate_plan(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_batching(config: &PopsimConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.batching.min_batch_size < 2 {
        errors.push(ConfigValidationError::OutOfRange {
            field: "batching.min_batch_size".to_string(),
            value: config.batching.min_batch_size.to_string(),
            expected: ">= 2".to_string(),
        });
    }
}

fn validate_plan(config: &PopsimConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.plan.parallel_threshold == 0 {
        errors.push(ConfigValidationError::OutOfRange {
            field: "plan.parallel_threshold".to_string(),
            value: "0".to_string(),
            expected: ">= 1".to_string(),
        });
    }
}

fn validate_logging(config: &PopsimConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!(
                "'{}' is not one of {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&PopsimConfig::default()).is_ok());
    }

    #[test]
    fn test_min_batch_size_below_two() {
        let mut config = PopsimConfig::default();
        config.batching.min_batch_size = 1;

        let result = validate_config(&config);
        assert!(result.is_err());

        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("batching.min_batch_size"));
            assert!(msg.contains(">= 2"));
        }
    }

    #[test]
    fn test_all_problems_reported_together() {
        let mut config = PopsimConfig::default();
        config.batching.min_batch_size = 0;
        config.plan.parallel_threshold = 0;
        config.logging.level = "loud".to_string();

        match validate_config(&config) {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains("batching.min_batch_size"));
                assert!(msg.contains("plan.parallel_threshold"));
                assert!(msg.contains("logging.level"));
                assert_eq!(msg.matches("  - ").count(), 3);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = PopsimConfig::default();
        config.logging.level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
