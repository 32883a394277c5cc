//! Operations history.
//!
//! Pipeline: one fetch-and-normalize stage per operation kind, then a single
//! merge / sort / filter stage. Each stage is independent so a failing
//! source is reported on its own instead of vanishing into an empty list.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Offset, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::error::{CajaError, Result};
use crate::models::{
    AperturaHistoryRow, ArqueoHistoryRow, NormalizedOperation, OperationKind,
    RecepcionHistoryRow, TrasladoEstado, TrasladoHistoryRow,
};
use crate::store::CajaStore;

/// Rows fetched per operation kind.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(OperationKind),
}

impl TypeFilter {
    /// Accepts the Spanish UI values and their English equivalents.
    pub fn parse(raw: &str) -> Result<Self> {
        let filter = match raw.trim().to_lowercase().as_str() {
            "" | "todas" | "all" => Self::All,
            "aperturas" | "openings" => Self::Only(OperationKind::Apertura),
            "arqueos" | "reconciliations" => Self::Only(OperationKind::Arqueo),
            "traslados" | "transfers" => Self::Only(OperationKind::Traslado),
            "recepciones" | "receptions" => Self::Only(OperationKind::Recepcion),
            other => {
                return Err(CajaError::validation(format!(
                    "unknown operation type filter '{other}'"
                )))
            }
        };
        Ok(filter)
    }

    pub fn includes(&self, kind: OperationKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => *only == kind,
        }
    }
}

/// History filters. Dates are calendar days in `utc_offset`, the register's
/// wall clock, so an operation stamped 01:00 UTC at UTC-5 belongs to the
/// previous day. The offset defaults to UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilters {
    pub type_filter: TypeFilter,
    /// Inclusive, from local midnight.
    pub date_from: Option<NaiveDate>,
    /// Inclusive, through the end of the local day.
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive substring of the display status.
    pub status: Option<String>,
    pub utc_offset: FixedOffset,
}

impl Default for HistoryFilters {
    fn default() -> Self {
        Self {
            type_filter: TypeFilter::All,
            date_from: None,
            date_to: None,
            status: None,
            utc_offset: utc(),
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

impl HistoryFilters {
    /// Build filters from raw form values. Blank values and the
    /// `todas` / `todos` sentinels mean "no filter".
    pub fn from_raw(
        tipo: Option<&str>,
        fecha_inicio: Option<&str>,
        fecha_fin: Option<&str>,
        estado: Option<&str>,
    ) -> Result<Self> {
        let type_filter = match tipo {
            Some(raw) => TypeFilter::parse(raw)?,
            None => TypeFilter::All,
        };
        let date_from = parse_date(fecha_inicio)?;
        let date_to = parse_date(fecha_fin)?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(CajaError::validation(format!(
                    "fecha inicio {from} is after fecha fin {to}"
                )));
            }
        }
        let status = estado
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("todos"))
            .map(str::to_string);

        Ok(Self {
            type_filter,
            date_from,
            date_to,
            status,
            utc_offset: utc(),
        })
    }

    /// Interpret the date bounds in the given offset instead of UTC.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    fn local_midnight(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        day.and_hms_opt(0, 0, 0)?
            .and_local_timezone(self.utc_offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn lower_bound(&self) -> Option<DateTime<Utc>> {
        self.date_from.and_then(|d| self.local_midnight(d))
    }

    /// Exclusive upper bound: local midnight after `date_to`.
    fn upper_bound(&self) -> Option<DateTime<Utc>> {
        self.date_to
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(|d| self.local_midnight(d))
    }

    fn matches(&self, op: &NormalizedOperation) -> bool {
        if let Some(from) = self.lower_bound() {
            if op.timestamp < from {
                return false;
            }
        }
        if let Some(until) = self.upper_bound() {
            if op.timestamp >= until {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if !op.status.to_lowercase().contains(&status.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| CajaError::validation(format!("invalid date '{s}': {e}"))),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Status derivation
// ---------------------------------------------------------------------------

pub fn opening_status(cerrada: bool) -> &'static str {
    if cerrada {
        "Cerrada"
    } else {
        "Activa"
    }
}

pub fn difference_status(diferencia: Decimal) -> &'static str {
    if diferencia.is_zero() {
        "Sin diferencia"
    } else {
        "Con diferencia"
    }
}

pub fn transfer_status(estado: TrasladoEstado) -> &'static str {
    match estado {
        TrasladoEstado::EnTransito => "En tránsito",
        TrasladoEstado::Recibido => "Recibido",
        TrasladoEstado::Observado => "Observado",
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn from_apertura(row: AperturaHistoryRow) -> NormalizedOperation {
    NormalizedOperation {
        id: row.id,
        kind: OperationKind::Apertura,
        timestamp: row.fecha_hora,
        amount: row.monto_inicial,
        difference: None,
        status: opening_status(row.cerrada).to_string(),
        register: row.caja_nombre,
        user: row.usuario_nombre,
    }
}

fn from_arqueo(row: ArqueoHistoryRow) -> NormalizedOperation {
    NormalizedOperation {
        id: row.id,
        kind: OperationKind::Arqueo,
        timestamp: row.fecha_hora,
        amount: row.monto_contado,
        difference: Some(row.diferencia),
        status: difference_status(row.diferencia).to_string(),
        register: row.caja_nombre,
        user: row.usuario_nombre,
    }
}

fn from_traslado(row: TrasladoHistoryRow) -> NormalizedOperation {
    NormalizedOperation {
        id: row.id,
        kind: OperationKind::Traslado,
        timestamp: row.fecha_hora_envio,
        amount: row.monto,
        difference: None,
        status: transfer_status(row.estado).to_string(),
        register: format!("{} → {}", row.caja_origen_nombre, row.caja_destino_nombre),
        user: row.usuario_nombre,
    }
}

fn from_recepcion(row: RecepcionHistoryRow) -> NormalizedOperation {
    NormalizedOperation {
        id: row.id,
        kind: OperationKind::Recepcion,
        timestamp: row.fecha_hora,
        amount: row.monto_recibido,
        difference: Some(row.diferencia),
        status: difference_status(row.diferencia).to_string(),
        register: row.caja_destino_nombre,
        user: row.usuario_nombre,
    }
}

/// Fetch-and-normalize stage for one operation kind.
pub async fn fetch_kind<S: CajaStore>(
    store: &S,
    kind: OperationKind,
    limit: usize,
) -> Result<Vec<NormalizedOperation>> {
    let ops = match kind {
        OperationKind::Apertura => store
            .recent_aperturas(limit)
            .await?
            .into_iter()
            .map(from_apertura)
            .collect(),
        OperationKind::Arqueo => store
            .recent_arqueos(limit)
            .await?
            .into_iter()
            .map(from_arqueo)
            .collect(),
        OperationKind::Traslado => store
            .recent_traslados(limit)
            .await?
            .into_iter()
            .map(from_traslado)
            .collect(),
        OperationKind::Recepcion => store
            .recent_recepciones(limit)
            .await?
            .into_iter()
            .map(from_recepcion)
            .collect(),
    };
    Ok(ops)
}

/// Merge stage: newest first, then date and status filters.
pub fn merge_and_filter(
    sources: Vec<Vec<NormalizedOperation>>,
    filters: &HistoryFilters,
) -> Vec<NormalizedOperation> {
    let mut ops: Vec<NormalizedOperation> = sources.into_iter().flatten().collect();
    ops.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    ops.retain(|op| filters.matches(op));
    ops
}

/// Load the operations history.
///
/// A failure of any enabled source aborts the whole load with an error
/// naming the source; a partial list is never returned as if complete.
pub async fn load_history<S: CajaStore>(
    store: &S,
    filters: &HistoryFilters,
    limit: usize,
) -> Result<Vec<NormalizedOperation>> {
    let mut sources = Vec::new();
    for kind in OperationKind::ALL {
        if !filters.type_filter.includes(kind) {
            continue;
        }
        match fetch_kind(store, kind, limit).await {
            Ok(ops) => {
                debug!(kind = %kind, count = ops.len(), "history source loaded");
                sources.push(ops);
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "history source failed");
                return Err(CajaError::store(format!(
                    "history source '{kind}' failed: {e}"
                )));
            }
        }
    }
    Ok(merge_and_filter(sources, filters))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbState;
    use crate::local_store::fixtures::*;
    use rusqlite::params;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Three days of activity on Caja 1, transferred to the main register.
    fn seeded() -> DbState {
        let db = DbState::open_in_memory().unwrap();
        seed_user(&db, "u1", "Ana Pérez");
        seed_user(&db, "u2", "Luis Gómez");
        seed_caja(&db, "c1", "Caja 1", false);
        seed_caja(&db, "cp", "Caja Principal", true);

        seed_shift(&db, "t1", "u1", "c1", "100.00", "2026-03-01T08:00:00.000Z", true);
        seed_shift(&db, "t2", "u1", "c1", "100.00", "2026-03-02T08:00:00.000Z", true);
        seed_shift(&db, "t3", "u1", "c1", "100.00", "2026-03-03T08:00:00.000Z", false);

        let conn = db.conn.lock().unwrap();
        for (id, apertura, contado, dif, ts) in [
            ("ar1", "ap-t1", "100.00", "0.00", "2026-03-01T17:00:00.000Z"),
            ("ar2", "ap-t2", "97.00", "-3.00", "2026-03-02T23:59:59.500Z"),
        ] {
            conn.execute(
                "INSERT INTO arqueos (id, apertura_id, monto_contado, monto_esperado,
                    diferencia, comentario, fecha_hora)
                 VALUES (?1, ?2, ?3, '100.00', ?4, NULL, ?5)",
                params![id, apertura, contado, dif, ts],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO traslados (id, arqueo_id, caja_origen_id, caja_destino_id, monto,
                estado, fecha_hora_envio)
             VALUES ('tr1', 'ar1', 'c1', 'cp', '100.00', 'recibido', '2026-03-01T17:30:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO traslados (id, arqueo_id, caja_origen_id, caja_destino_id, monto,
                estado, fecha_hora_envio)
             VALUES ('tr2', 'ar2', 'c1', 'cp', '97.00', 'en_transito', '2026-03-03T07:00:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO recepciones (id, traslado_id, usuario_receptor_id, monto_recibido,
                diferencia, fecha_hora)
             VALUES ('re1', 'tr1', 'u2', '100.00', '0.00', '2026-03-01T18:00:00.000Z')",
            [],
        )
        .unwrap();
        drop(conn);
        db
    }

    #[test]
    fn test_type_filter_parse() {
        assert_eq!(TypeFilter::parse("todas").unwrap(), TypeFilter::All);
        assert_eq!(
            TypeFilter::parse("Aperturas").unwrap(),
            TypeFilter::Only(OperationKind::Apertura)
        );
        assert_eq!(
            TypeFilter::parse("receptions").unwrap(),
            TypeFilter::Only(OperationKind::Recepcion)
        );
        assert!(TypeFilter::parse("ventas").is_err());
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(opening_status(true), "Cerrada");
        assert_eq!(opening_status(false), "Activa");
        assert_eq!(difference_status(d("0.00")), "Sin diferencia");
        assert_eq!(difference_status(d("-0.01")), "Con diferencia");
        assert_eq!(transfer_status(TrasladoEstado::EnTransito), "En tránsito");
        assert_eq!(transfer_status(TrasladoEstado::Recibido), "Recibido");
        assert_eq!(transfer_status(TrasladoEstado::Observado), "Observado");
    }

    #[test]
    fn test_from_raw_rejects_inverted_range() {
        assert!(HistoryFilters::from_raw(None, Some("2026-03-02"), Some("2026-03-01"), None).is_err());
        assert!(HistoryFilters::from_raw(None, Some("02/03/2026"), None, None).is_err());
        let f = HistoryFilters::from_raw(Some("todas"), Some(""), None, Some("todos")).unwrap();
        assert_eq!(f, HistoryFilters::default());
    }

    #[tokio::test]
    async fn test_all_kinds_merged_newest_first() {
        let db = seeded();
        let ops = load_history(&db, &HistoryFilters::default(), DEFAULT_HISTORY_LIMIT)
            .await
            .unwrap();
        assert_eq!(ops.len(), 3 + 2 + 2 + 1);
        assert!(ops.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(ops[0].id, "ap-t3");

        let tr1 = ops.iter().find(|o| o.id == "tr1").unwrap();
        assert_eq!(tr1.register, "Caja 1 → Caja Principal");
        assert_eq!(tr1.user, "Ana Pérez");
        assert_eq!(tr1.status, "Recibido");

        let re1 = ops.iter().find(|o| o.id == "re1").unwrap();
        assert_eq!(re1.kind, OperationKind::Recepcion);
        assert_eq!(re1.register, "Caja Principal");
        assert_eq!(re1.user, "Luis Gómez");
        assert_eq!(re1.status, "Sin diferencia");
    }

    #[tokio::test]
    async fn test_type_filter_returns_single_kind() {
        let db = seeded();
        let filters = HistoryFilters::from_raw(Some("aperturas"), None, None, None).unwrap();
        let ops = load_history(&db, &filters, DEFAULT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|o| o.kind == OperationKind::Apertura));
        assert_eq!(ops[0].status, "Activa");
    }

    #[tokio::test]
    async fn test_date_range_is_inclusive_through_end_of_day() {
        let db = seeded();
        let filters =
            HistoryFilters::from_raw(None, Some("2026-03-02"), Some("2026-03-02"), None).unwrap();
        let ops = load_history(&db, &filters, DEFAULT_HISTORY_LIMIT).await.unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.id.as_str()).collect();
        // ar2 at 23:59:59.500 is still inside the day
        assert_eq!(ids, vec!["ar2", "ap-t2"]);

        let from = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        for op in &ops {
            let day = op.timestamp.date_naive();
            assert!(day >= from && day <= to);
        }
    }

    #[tokio::test]
    async fn test_date_range_follows_local_day() {
        let db = seeded();
        // 2026-03-02T01:00Z is still March 1st on a UTC-5 register.
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE arqueos SET fecha_hora = '2026-03-02T01:00:00.000Z' WHERE id = 'ar1'",
                [],
            )
            .unwrap();
        let bogota = FixedOffset::west_opt(5 * 3600).unwrap();

        let march_first = HistoryFilters::from_raw(Some("arqueos"), None, Some("2026-03-01"), None)
            .unwrap()
            .with_utc_offset(bogota);
        let ops = load_history(&db, &march_first, DEFAULT_HISTORY_LIMIT).await.unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ar1"]);

        let from_second = HistoryFilters::from_raw(Some("arqueos"), Some("2026-03-02"), None, None)
            .unwrap()
            .with_utc_offset(bogota);
        let ops = load_history(&db, &from_second, DEFAULT_HISTORY_LIMIT).await.unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.id.as_str()).collect();
        // ar2 at 23:59:59Z on the 2nd is 18:59 local, still inside the range
        assert_eq!(ids, vec!["ar2"]);

        // Under UTC the same stamp falls on the 2nd.
        let utc_second =
            HistoryFilters::from_raw(Some("arqueos"), Some("2026-03-02"), Some("2026-03-02"), None)
                .unwrap();
        let ops = load_history(&db, &utc_second, DEFAULT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[tokio::test]
    async fn test_status_filter_is_case_insensitive_substring() {
        let db = seeded();
        let filters = HistoryFilters::from_raw(None, None, None, Some("CON DIF")).unwrap();
        let ops = load_history(&db, &filters, DEFAULT_HISTORY_LIMIT).await.unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ar2"]);
    }

    #[tokio::test]
    async fn test_limit_applies_per_kind() {
        let db = seeded();
        let ops = load_history(&db, &HistoryFilters::default(), 1).await.unwrap();
        assert_eq!(ops.len(), 4);
    }

    #[tokio::test]
    async fn test_failing_source_is_reported_not_swallowed() {
        let db = seeded();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE traslados;")
                .unwrap();
        }

        let err = load_history(&db, &HistoryFilters::default(), DEFAULT_HISTORY_LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, CajaError::Store(_)));
        assert!(err.to_string().contains("Traslado"), "{err}");

        // Sources that still work are isolated from the broken one.
        let filters = HistoryFilters::from_raw(Some("arqueos"), None, None, None).unwrap();
        let ops = load_history(&db, &filters, DEFAULT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(ops.len(), 2);
    }
}
