//! Local SQLite database layer for Caja POS.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, parameter
//! helpers, the transaction wrapper used by every multi-write operation,
//! and the managed state shared by the controllers.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{CajaError, Result};
use crate::models::PARAM_UMBRAL_DIFERENCIA;

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to a store error.
    pub fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CajaError::store(format!("db lock poisoned: {e}")))
    }

    /// Open a migrated in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/caja.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On open failure, deletes the file and
/// retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| CajaError::store(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("caja.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| {
                CajaError::store(format!("Database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: registers, shifts, openings, reconciliations, transfers.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            nombre_completo TEXT NOT NULL,
            rol TEXT NOT NULL DEFAULT 'cajero',
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cajas (
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            ubicacion TEXT,
            es_principal INTEGER NOT NULL DEFAULT 0,
            activa INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS turnos (
            id TEXT PRIMARY KEY,
            usuario_id TEXT NOT NULL REFERENCES profiles(id),
            caja_id TEXT NOT NULL REFERENCES cajas(id),
            fecha TEXT NOT NULL,
            hora_inicio TEXT NOT NULL,
            hora_fin TEXT,
            estado TEXT NOT NULL DEFAULT 'abierto'
                CHECK (estado IN ('abierto', 'cerrado')),
            created_at TEXT NOT NULL
        );

        -- One opening per shift
        CREATE TABLE IF NOT EXISTS aperturas (
            id TEXT PRIMARY KEY,
            turno_id TEXT NOT NULL UNIQUE REFERENCES turnos(id),
            monto_inicial TEXT NOT NULL,
            cerrada INTEGER NOT NULL DEFAULT 0,
            fecha_hora TEXT NOT NULL
        );

        -- One reconciliation per opening
        CREATE TABLE IF NOT EXISTS arqueos (
            id TEXT PRIMARY KEY,
            apertura_id TEXT NOT NULL UNIQUE REFERENCES aperturas(id),
            monto_contado TEXT NOT NULL,
            monto_esperado TEXT NOT NULL,
            diferencia TEXT NOT NULL,
            comentario TEXT,
            fecha_hora TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS traslados (
            id TEXT PRIMARY KEY,
            arqueo_id TEXT NOT NULL UNIQUE REFERENCES arqueos(id),
            caja_origen_id TEXT NOT NULL REFERENCES cajas(id),
            caja_destino_id TEXT NOT NULL REFERENCES cajas(id),
            monto TEXT NOT NULL,
            estado TEXT NOT NULL DEFAULT 'en_transito'
                CHECK (estado IN ('en_transito', 'recibido', 'observado')),
            fecha_hora_envio TEXT NOT NULL,
            comentario TEXT
        );

        CREATE TABLE IF NOT EXISTS recepciones (
            id TEXT PRIMARY KEY,
            traslado_id TEXT NOT NULL UNIQUE REFERENCES traslados(id),
            usuario_receptor_id TEXT NOT NULL REFERENCES profiles(id),
            monto_recibido TEXT NOT NULL,
            diferencia TEXT NOT NULL,
            comentario TEXT,
            fecha_hora TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS parametros (
            clave TEXT PRIMARY KEY,
            valor TEXT NOT NULL,
            descripcion TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_turnos_usuario_estado ON turnos(usuario_id, estado);
        CREATE INDEX IF NOT EXISTS idx_aperturas_fecha ON aperturas(fecha_hora);
        CREATE INDEX IF NOT EXISTS idx_arqueos_fecha ON arqueos(fecha_hora);
        CREATE INDEX IF NOT EXISTS idx_traslados_fecha ON traslados(fecha_hora_envio);
        CREATE INDEX IF NOT EXISTS idx_traslados_destino_estado ON traslados(caja_destino_id, estado);
        CREATE INDEX IF NOT EXISTS idx_recepciones_fecha ON recepciones(fecha_hora);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        CajaError::store(format!("migration v1: {e}"))
    })?;
    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: seed the difference-justification threshold.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO parametros (clave, valor, descripcion)
         VALUES (?1, '2.00', 'Diferencia máxima sin comentario obligatorio')",
        params![PARAM_UMBRAL_DIFERENCIA],
    )
    .and_then(|_| conn.execute("INSERT INTO schema_version (version) VALUES (2)", []))
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        CajaError::store(format!("migration v2: {e}"))
    })?;
    info!("Applied migration v2");
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`. Any error rolls back every
/// write `f` made, so callers never observe a half-applied unit.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| CajaError::store(format!("begin transaction: {e}")))?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| CajaError::store(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                error!("rollback failed: {rb}");
            }
            warn!(error = %e, "transaction rolled back");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Read a parameter value by key.
pub fn get_parametro(conn: &Connection, clave: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT valor FROM parametros WHERE clave = ?1",
            params![clave],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Insert or update a parameter.
pub fn set_parametro(conn: &Connection, clave: &str, valor: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO parametros (clave, valor, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(clave) DO UPDATE SET
            valor = excluded.valor,
            updated_at = excluded.updated_at",
        params![clave, valor],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Canonical timestamp encoding: RFC 3339, UTC, millisecond precision.
/// Lexicographic order equals chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = test_db();
        run_migrations_for_test(&conn);
        let tables = table_names(&conn);
        for expected in [
            "aperturas",
            "arqueos",
            "cajas",
            "parametros",
            "profiles",
            "recepciones",
            "schema_version",
            "traslados",
            "turnos",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing table {expected}"
            );
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations_for_test(&conn);
        run_migrations_for_test(&conn);
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_threshold_is_seeded() {
        let conn = test_db();
        run_migrations_for_test(&conn);
        assert_eq!(
            get_parametro(&conn, PARAM_UMBRAL_DIFERENCIA).unwrap(),
            Some("2.00".to_string())
        );
        set_parametro(&conn, PARAM_UMBRAL_DIFERENCIA, "5.00").unwrap();
        assert_eq!(
            get_parametro(&conn, PARAM_UMBRAL_DIFERENCIA).unwrap(),
            Some("5.00".to_string())
        );
        assert_eq!(get_parametro(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let conn = test_db();
        run_migrations_for_test(&conn);

        let result: Result<()> = with_transaction(&conn, |tx| {
            set_parametro(tx, "temporal", "1")?;
            Err(CajaError::store("boom"))
        });
        assert!(result.is_err());
        assert_eq!(get_parametro(&conn, "temporal").unwrap(), None);

        with_transaction(&conn, |tx| set_parametro(tx, "temporal", "2")).unwrap();
        assert_eq!(
            get_parametro(&conn, "temporal").unwrap(),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_init_creates_file_database() {
        let dir = std::env::temp_dir().join(format!("caja-db-test-{}", uuid::Uuid::new_v4()));
        let state = init(&dir).expect("init");
        assert!(state.db_path.exists());
        drop(state);
        let _ = fs::remove_dir_all(&dir);
    }
}
