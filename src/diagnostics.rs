//! Build metadata and log housekeeping.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Log file prefix used by the rolling appender.
pub const LOG_FILE_PREFIX: &str = "caja";

/// Number of daily log files kept on disk.
pub(crate) const MAX_LOG_FILES: usize = 7;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        git_sha: env!("BUILD_GIT_SHA"),
    }
}

/// Delete all but the newest [`MAX_LOG_FILES`] log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    if log_files.len() <= MAX_LOG_FILES {
        return;
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in log_files.into_iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(&path) {
            Ok(()) => info!("Pruned old log file {}", path.display()),
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_has_version() {
        let info = build_info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_sha.is_empty());
    }

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = std::env::temp_dir().join(format!("caja-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for day in 1..=10 {
            fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2026-01-{day:02}")), "x").unwrap();
        }
        fs::write(dir.join("other.txt"), "keep").unwrap();

        prune_old_logs(&dir);

        let remaining: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|n| n.starts_with(LOG_FILE_PREFIX))
            .collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES);
        assert!(dir.join("other.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
