//! Runtime configuration.
//!
//! Values come from environment variables; hosted-store credentials fall
//! back to the OS keyring (see [`crate::storage`]). Business parameters such
//! as the justification threshold are not configured here: they live in the
//! store's `parametros` table.

use std::path::PathBuf;
use tracing::info;

use crate::error::{CajaError, Result};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::logging::LogFormat;
use crate::storage;

pub const ENV_DATA_DIR: &str = "CAJA_DATA_DIR";
pub const ENV_LOG_DIR: &str = "CAJA_LOG_DIR";
pub const ENV_LOG_FORMAT: &str = "CAJA_LOG_FORMAT";
pub const ENV_BACKEND: &str = "CAJA_BACKEND";
pub const ENV_HISTORY_LIMIT: &str = "CAJA_HISTORY_LIMIT";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

const APP_DIR_NAME: &str = "caja-pos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite database in the data directory.
    Local,
    /// Hosted PostgREST endpoint.
    Supabase,
}

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Format of the rolling log file; the console is always text.
    pub log_format: LogFormat,
    pub history_limit: usize,
    pub supabase: Option<SupabaseConfig>,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for variable access. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend = match var(ENV_BACKEND).as_deref().map(str::to_lowercase).as_deref() {
            None | Some("local") | Some("sqlite") => Backend::Local,
            Some("supabase") | Some("remote") => Backend::Supabase,
            Some(other) => {
                return Err(CajaError::validation(format!(
                    "{ENV_BACKEND} must be 'local' or 'supabase', got '{other}'"
                )))
            }
        };

        let data_dir = var(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let log_dir = var(ENV_LOG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        let log_format = match var(ENV_LOG_FORMAT).as_deref().map(str::to_lowercase).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(CajaError::validation(format!(
                    "{ENV_LOG_FORMAT} must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let history_limit = match var(ENV_HISTORY_LIMIT) {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CajaError::validation(format!(
                        "{ENV_HISTORY_LIMIT} must be a positive integer, got '{raw}'"
                    ))
                })?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        let supabase = if backend == Backend::Supabase {
            let url = var(ENV_SUPABASE_URL)
                .or_else(|| storage::get_credential(storage::KEY_SUPABASE_URL))
                .ok_or_else(|| CajaError::validation("Supabase not configured: missing URL"))?;
            let anon_key = var(ENV_SUPABASE_ANON_KEY)
                .or_else(|| storage::get_credential(storage::KEY_SUPABASE_ANON_KEY))
                .ok_or_else(|| {
                    CajaError::validation("Supabase not configured: missing anon key")
                })?;
            Some(SupabaseConfig { url, anon_key })
        } else {
            None
        };

        let config = Self {
            backend,
            data_dir,
            log_dir,
            log_format,
            history_limit,
            supabase,
        };
        info!(
            backend = ?config.backend,
            data_dir = %config.data_dir.display(),
            history_limit = config.history_limit,
            "configuration loaded"
        );
        Ok(config)
    }
}

/// Platform data directory for the app.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_local_backend() {
        let config = Config::from_lookup(lookup(&[(ENV_DATA_DIR, "/tmp/caja")])).unwrap();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/caja"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/caja/logs"));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert!(config.supabase.is_none());
    }

    #[test]
    fn test_supabase_backend_reads_credentials() {
        let config = Config::from_lookup(lookup(&[
            (ENV_BACKEND, "Supabase"),
            (ENV_SUPABASE_URL, "https://abc.supabase.co"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_HISTORY_LIMIT, "20"),
        ]))
        .unwrap();
        assert_eq!(config.backend, Backend::Supabase);
        assert_eq!(config.history_limit, 20);
        let supabase = config.supabase.unwrap();
        assert_eq!(supabase.url, "https://abc.supabase.co");
        assert!(!format!("{supabase:?}").contains("anon\""));
    }

    #[test]
    fn test_log_format_json() {
        let config = Config::from_lookup(lookup(&[(ENV_LOG_FORMAT, "JSON")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_are_validation_errors() {
        let err = Config::from_lookup(lookup(&[(ENV_BACKEND, "mysql")])).unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));
        let err = Config::from_lookup(lookup(&[(ENV_HISTORY_LIMIT, "0")])).unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));
        let err = Config::from_lookup(lookup(&[(ENV_LOG_FORMAT, "xml")])).unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/caja-env");
        std::env::set_var(ENV_BACKEND, "local");
        let config = Config::from_env().unwrap();
        std::env::remove_var(ENV_DATA_DIR);
        std::env::remove_var(ENV_BACKEND);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/caja-env"));
        assert_eq!(config.backend, Backend::Local);
    }
}
