// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for popsim
//!
//! Console output always; with the `file-logging` feature, an additional
//! plain-text log inside a timestamped run folder, with retention.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, ObservabilityConfig};

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Keeps file writers alive; logs are flushed when this is dropped
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder receiving file logs, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Filter from a base level plus per-crate debug flags
pub fn build_filter(level: &str, debug_flags: &CrateDebugFlags) -> Result<EnvFilter> {
    let directives = debug_flags.to_filter_string(&level.to_lowercase());
    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter: {}", directives))
}

/// Install the global subscriber
///
/// Fails if the level is not a valid filter, if a global subscriber is
/// already installed, or if file logging is requested without the
/// `file-logging` feature.
pub fn init_logging(
    config: &ObservabilityConfig,
    debug_flags: &CrateDebugFlags,
) -> Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let console_layer = match config.format {
        LogFormat::Full => console_layer
            .with_filter(build_filter(&config.level, debug_flags)?)
            .boxed(),
        LogFormat::Compact => console_layer
            .compact()
            .with_filter(build_filter(&config.level, debug_flags)?)
            .boxed(),
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let mut file_guards = Vec::new();
    #[cfg_attr(not(feature = "file-logging"), allow(unused_mut))]
    let mut log_dir = None;

    if let Some(file) = &config.file {
        #[cfg(feature = "file-logging")]
        {
            let now = Utc::now();
            // Leave room for the run being created
            cleanup_old_logs(
                &file.dir,
                now,
                file.retention_days,
                file.retention_runs.saturating_sub(1),
            )?;
            let run_folder = create_run_folder(&file.dir, now)?;

            let appender = tracing_appender::rolling::never(&run_folder, "popsim.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            file_guards.push(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(build_filter(&config.level, debug_flags)?)
                .boxed();
            layers.push(file_layer);
            log_dir = Some(run_folder);
        }

        #[cfg(not(feature = "file-logging"))]
        {
            anyhow::bail!(
                "File logging to {} requires the `file-logging` feature",
                file.dir.display()
            );
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir,
    })
}

/// Console logging at `level` with flags from the command line and `POPSIM_DEBUG`
pub fn init_logging_default(level: &str) -> Result<LoggingGuard> {
    init_logging(
        &ObservabilityConfig::with_level(level),
        &crate::cli::parse_debug_flags(),
    )
}

/// Create `base/run_<timestamp>`
pub fn create_run_folder(base: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let run_folder = base.join(format!("{}{}", RUN_PREFIX, now.format(RUN_TIMESTAMP_FORMAT)));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

/// Timestamp encoded in a `run_*` folder name
fn run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
    let timestamp = dir_name.strip_prefix(RUN_PREFIX)?;
    NaiveDateTime::parse_from_str(timestamp, RUN_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Runs to delete: older than `retention_days`, then the oldest beyond `retention_runs`
///
/// A `retention_days` too large to represent disables the age cutoff.
pub fn runs_to_remove(
    runs: &[(PathBuf, DateTime<Utc>)],
    now: DateTime<Utc>,
    retention_days: u64,
    retention_runs: usize,
) -> Vec<PathBuf> {
    let cutoff = i64::try_from(retention_days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|age| now.checked_sub_signed(age));
    let mut sorted: Vec<&(PathBuf, DateTime<Utc>)> = runs.iter().collect();
    sorted.sort_by_key(|(_, dt)| *dt);

    let (expired, kept): (Vec<_>, Vec<_>) = sorted
        .into_iter()
        .partition(|(_, dt)| cutoff.is_some_and(|cutoff| *dt < cutoff));
    let excess = kept.len().saturating_sub(retention_runs);

    expired
        .into_iter()
        .chain(kept.into_iter().take(excess))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Apply the retention policy to `run_*` folders under `base`
///
/// Returns the folders removed. Folders that cannot be removed are reported
/// on stderr and skipped.
pub fn cleanup_old_logs(
    base: &Path,
    now: DateTime<Utc>,
    retention_days: u64,
    retention_runs: usize,
) -> Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in std::fs::read_dir(base)
        .with_context(|| format!("Failed to list log directory: {}", base.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(dt) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(run_timestamp)
        {
            runs.push((path, dt));
        }
    }

    let mut removed = Vec::new();
    for path in runs_to_remove(&runs, now, retention_days, retention_runs) {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed.push(path),
            Err(e) => eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_build_filter() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-popsim-engine".to_string()]);
        let filter = build_filter("WARN", &flags).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("popsim_engine=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn test_run_timestamp_round_trip() {
        let name = format!("{}{}", RUN_PREFIX, at(4, 13).format(RUN_TIMESTAMP_FORMAT));
        assert_eq!(run_timestamp(&name), Some(at(4, 13)));
        assert_eq!(run_timestamp("run_garbage"), None);
        assert_eq!(run_timestamp("notes"), None);
    }

    #[test]
    fn test_runs_to_remove_by_age_and_count() {
        let runs: Vec<(PathBuf, DateTime<Utc>)> = (1..=6)
            .map(|day| (PathBuf::from(format!("run_{}", day)), at(day, 0)))
            .collect();

        // Day 1 and 2 are older than 3 days at day 5 noon; then keep 2 of the rest
        let removed = runs_to_remove(&runs, at(5, 12), 3, 2);
        assert_eq!(
            removed,
            vec![
                PathBuf::from("run_1"),
                PathBuf::from("run_2"),
                PathBuf::from("run_3"),
                PathBuf::from("run_4"),
            ]
        );

        assert!(runs_to_remove(&runs, at(6, 0), 30, 10).is_empty());
    }

    #[test]
    fn test_huge_retention_days_keeps_everything() {
        let runs: Vec<(PathBuf, DateTime<Utc>)> = (1..=5)
            .map(|day| (PathBuf::from(format!("run_{}", day)), at(day, 0)))
            .collect();

        assert!(runs_to_remove(&runs, at(10, 0), u64::MAX, 100).is_empty());
        assert!(runs_to_remove(&runs, at(10, 0), 1_000_000_000, 100).is_empty());
        // Count limit still applies without an age cutoff
        assert_eq!(
            runs_to_remove(&runs, at(10, 0), u64::MAX, 3),
            vec![PathBuf::from("run_1"), PathBuf::from("run_2")]
        );
    }

    #[test]
    fn test_cleanup_with_huge_retention_on_disk() {
        let dir = tempdir().unwrap();
        for day in 1..=3 {
            create_run_folder(dir.path(), at(day, 0)).unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), Utc::now(), 1_000_000_000, 10).unwrap();
        assert!(removed.is_empty());
        let removed = cleanup_old_logs(dir.path(), at(10, 0), u64::MAX, 10).unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("run_20250301_000000").exists());
    }

    #[test]
    fn test_cleanup_old_logs_on_disk() {
        let dir = tempdir().unwrap();
        for day in 1..=4 {
            create_run_folder(dir.path(), at(day, 0)).unwrap();
        }
        std::fs::create_dir(dir.path().join("keep-me")).unwrap();

        let removed = cleanup_old_logs(dir.path(), at(4, 1), 30, 2).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("keep-me").exists());
        assert!(!dir.path().join("run_20250301_000000").exists());
        assert!(dir.path().join("run_20250304_000000").exists());
    }

    #[test]
    fn test_cleanup_missing_base_is_noop() {
        let dir = tempdir().unwrap();
        let removed = cleanup_old_logs(&dir.path().join("absent"), Utc::now(), 1, 1).unwrap();
        assert!(removed.is_empty());
    }
}
