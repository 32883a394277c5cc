//! Caja POS backend
//!
//! Cash-register shift lifecycle: open a shift with a starting amount,
//! reconcile the counted cash at close, move the cash to another register
//! and browse the merged operations history. Controllers are generic over
//! [`store::CajaStore`]; the local SQLite store and the hosted PostgREST
//! store both implement it. A UI shell calls the handlers in [`commands`].

pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod history;
mod local_store;
pub mod logging;
pub mod models;
pub mod money;
pub mod remote;
pub mod shifts;
pub mod storage;
pub mod store;
pub mod transfers;

use anyhow::Context;
use tracing::info;

use crate::auth::AuthState;
use crate::config::{Backend, Config};
use crate::db::DbState;
use crate::remote::SupabaseStore;
use crate::store::CajaStore;

/// Everything a command handler needs: configuration, the store and the
/// auth state.
pub struct CajaApp<S: CajaStore> {
    pub config: Config,
    pub store: S,
    pub auth: AuthState,
}

impl<S: CajaStore> CajaApp<S> {
    pub fn new(config: Config, store: S, auth: AuthState) -> Self {
        Self {
            config,
            store,
            auth,
        }
    }
}

impl CajaApp<DbState> {
    /// Open (and migrate) the local database in the configured data dir.
    pub fn bootstrap(config: Config) -> anyhow::Result<Self> {
        if config.backend != Backend::Local {
            anyhow::bail!("bootstrap opens the local backend; use bootstrap_remote");
        }
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
        let store = db::init(&config.data_dir).context("open local database")?;
        info!(db_path = %store.db_path.display(), "local backend ready");
        Ok(Self::new(config, store, AuthState::new()))
    }
}

impl CajaApp<SupabaseStore> {
    /// Connect to the hosted PostgREST backend.
    pub fn bootstrap_remote(config: Config) -> anyhow::Result<Self> {
        let supabase = config
            .supabase
            .as_ref()
            .context("Supabase backend selected but not configured")?;
        let store = SupabaseStore::new(supabase).context("build Supabase client")?;
        info!(url = %supabase.url, "hosted backend ready");
        Ok(Self::new(config, store, AuthState::new()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_creates_database_in_data_dir() {
        let dir = std::env::temp_dir().join(format!("caja-boot-{}", uuid::Uuid::new_v4()));
        let config = Config::from_lookup(|key| match key {
            config::ENV_DATA_DIR => Some(dir.display().to_string()),
            _ => None,
        })
        .unwrap();
        let app = CajaApp::bootstrap(config).unwrap();
        assert!(app.store.db_path.exists());
        assert!(app.auth.get_session().is_none());
        drop(app);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bootstrap_rejects_remote_config() {
        let config = Config::from_lookup(|key| match key {
            config::ENV_BACKEND => Some("supabase".into()),
            config::ENV_SUPABASE_URL => Some("https://abc.supabase.co".into()),
            config::ENV_SUPABASE_ANON_KEY => Some("anon".into()),
            _ => None,
        })
        .unwrap();
        assert!(CajaApp::bootstrap(config.clone()).is_err());
        let app = CajaApp::bootstrap_remote(config).unwrap();
        assert_eq!(app.config.backend, Backend::Supabase);
    }
}
