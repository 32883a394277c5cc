//! Structured logging: console plus a daily rolling file.

use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::diagnostics::{self, LOG_FILE_PREFIX};

const DEFAULT_FILTER: &str = "info,caja_pos_lib=debug";

/// Line format of the rolling log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Install the global subscriber. Old files are pruned before the appender
/// opens today's file. Keep the returned guard alive for the lifetime of the
/// process; dropping it flushes and stops the file writer.
pub fn init(log_dir: &Path, format: LogFormat) -> anyhow::Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let (text_file_layer, json_file_layer) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_current_span(false)
                    .with_target(true),
            ),
        ),
    };
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file_layer)
        .with(json_file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    let build = diagnostics::build_info();
    tracing::info!(
        version = build.version,
        git_sha = build.git_sha,
        log_dir = %log_dir.display(),
        format = ?format,
        "logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MAX_LOG_FILES;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_init_prunes_then_writes_json_file() {
        let root = std::env::temp_dir().join(format!("caja-init-{}", uuid::Uuid::new_v4()));
        let log_dir = root.join("nested").join("logs");
        fs::create_dir_all(&log_dir).unwrap();
        for day in 1..=10 {
            fs::write(log_dir.join(format!("{LOG_FILE_PREFIX}.2020-01-{day:02}")), "old").unwrap();
        }

        let guard = init(&log_dir, LogFormat::Json).unwrap();
        tracing::info!(caja_id = "c1", "after init");
        drop(guard);

        let names: Vec<String> = fs::read_dir(&log_dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        let seeded = names
            .iter()
            .filter(|n| n.starts_with(&format!("{LOG_FILE_PREFIX}.2020-")))
            .count();
        assert_eq!(seeded, MAX_LOG_FILES);

        let today = log_dir.join(format!(
            "{LOG_FILE_PREFIX}.{}",
            chrono::Utc::now().format("%Y-%m-%d")
        ));
        let contents = fs::read_to_string(&today).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(events
            .iter()
            .any(|e| e["fields"]["message"] == "logging initialized"));
        assert!(events.iter().any(|e| e["fields"]["caja_id"] == "c1"));

        // The global subscriber can only be installed once.
        assert!(init(&log_dir, LogFormat::Text).is_err());
        let _ = fs::remove_dir_all(&root);
    }
}
