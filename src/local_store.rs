//! [`CajaStore`] backed by the local SQLite database.
//!
//! Multi-write operations go through [`db::with_transaction`], so a failure
//! in any step leaves no partial state behind.

use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{self, format_ts, DbState};
use crate::error::{CajaError, Result};
use crate::models::{
    Apertura, AperturaHistoryRow, Arqueo, ArqueoHistoryRow, Caja, NewRecepcion, NewShift,
    NewTraslado, OpenTurno, Profile, Recepcion, RecepcionHistoryRow, ShiftClosure, Traslado,
    TrasladoEstado, TrasladoHistoryRow, Turno, TurnoEstado,
};
use crate::store::{CajaStore, ProfileCredentials};

// ---------------------------------------------------------------------------
// Column decoding
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn dec_col(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn date_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

fn turno_estado_col(row: &Row, idx: usize) -> rusqlite::Result<TurnoEstado> {
    let raw: String = row.get(idx)?;
    TurnoEstado::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown turno estado '{raw}'").into(),
        )
    })
}

fn traslado_estado_col(row: &Row, idx: usize) -> rusqlite::Result<TrasladoEstado> {
    let raw: String = row.get(idx)?;
    Ok(TrasladoEstado::parse(&raw))
}

// Column lists paired with the row mappers below.
const CAJA_COLS: &str = "id, nombre, ubicacion, es_principal, activa";
const ARQUEO_COLS: &str =
    "id, apertura_id, monto_contado, monto_esperado, diferencia, comentario, fecha_hora";
const TRASLADO_COLS: &str = "id, arqueo_id, caja_origen_id, caja_destino_id, monto, estado,
                             fecha_hora_envio, comentario";

fn caja_at(row: &Row, base: usize) -> rusqlite::Result<Caja> {
    Ok(Caja {
        id: row.get(base)?,
        nombre: row.get(base + 1)?,
        ubicacion: row.get(base + 2)?,
        es_principal: row.get(base + 3)?,
        activa: row.get(base + 4)?,
    })
}

fn turno_at(row: &Row, base: usize) -> rusqlite::Result<Turno> {
    Ok(Turno {
        id: row.get(base)?,
        usuario_id: row.get(base + 1)?,
        caja_id: row.get(base + 2)?,
        fecha: date_col(row, base + 3)?,
        hora_inicio: row.get(base + 4)?,
        hora_fin: row.get(base + 5)?,
        estado: turno_estado_col(row, base + 6)?,
        created_at: ts_col(row, base + 7)?,
    })
}

fn apertura_at(row: &Row, base: usize) -> rusqlite::Result<Apertura> {
    Ok(Apertura {
        id: row.get(base)?,
        turno_id: row.get(base + 1)?,
        monto_inicial: dec_col(row, base + 2)?,
        cerrada: row.get(base + 3)?,
        fecha_hora: ts_col(row, base + 4)?,
    })
}

fn arqueo_row(row: &Row) -> rusqlite::Result<Arqueo> {
    Ok(Arqueo {
        id: row.get(0)?,
        apertura_id: row.get(1)?,
        monto_contado: dec_col(row, 2)?,
        monto_esperado: dec_col(row, 3)?,
        diferencia: dec_col(row, 4)?,
        comentario: row.get(5)?,
        fecha_hora: ts_col(row, 6)?,
    })
}

fn traslado_row(row: &Row) -> rusqlite::Result<Traslado> {
    Ok(Traslado {
        id: row.get(0)?,
        arqueo_id: row.get(1)?,
        caja_origen_id: row.get(2)?,
        caja_destino_id: row.get(3)?,
        monto: dec_col(row, 4)?,
        estado: traslado_estado_col(row, 5)?,
        fecha_hora_envio: ts_col(row, 6)?,
        comentario: row.get(7)?,
    })
}

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: impl FnMut(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn load_arqueo(conn: &Connection, arqueo_id: &str) -> Result<Option<Arqueo>> {
    let sql = format!("SELECT {ARQUEO_COLS} FROM arqueos WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![arqueo_id], arqueo_row)
        .optional()?)
}

fn load_traslado(conn: &Connection, traslado_id: &str) -> Result<Option<Traslado>> {
    let sql = format!("SELECT {TRASLADO_COLS} FROM traslados WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![traslado_id], traslado_row)
        .optional()?)
}

// ---------------------------------------------------------------------------
// CajaStore
// ---------------------------------------------------------------------------

impl CajaStore for DbState {
    async fn get_parametro(&self, clave: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        db::get_parametro(&conn, clave)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let conn = self.lock()?;
        let profile = conn
            .query_row(
                "SELECT id, email, nombre_completo, rol FROM profiles WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        nombre_completo: row.get(2)?,
                        rol: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<ProfileCredentials>> {
        let conn = self.lock()?;
        let creds = conn
            .query_row(
                "SELECT id, email, nombre_completo, rol, password_hash
                 FROM profiles WHERE lower(email) = lower(?1)",
                params![email],
                |row| {
                    Ok(ProfileCredentials {
                        profile: Profile {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            nombre_completo: row.get(2)?,
                            rol: row.get(3)?,
                        },
                        password_hash: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(creds)
    }

    async fn insert_profile(&self, profile: &Profile, password_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO profiles (id, email, nombre_completo, rol, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.id,
                profile.email,
                profile.nombre_completo,
                profile.rol,
                password_hash,
                db::now_ts(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CajaError::validation(format!("email already registered: {}", profile.email))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn get_caja(&self, caja_id: &str) -> Result<Option<Caja>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CAJA_COLS} FROM cajas WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![caja_id], |row| caja_at(row, 0))
            .optional()?)
    }

    async fn list_cajas(&self) -> Result<Vec<Caja>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CAJA_COLS} FROM cajas ORDER BY es_principal DESC, nombre");
        query_list(&conn, &sql, [], |row| caja_at(row, 0))
    }

    async fn open_turnos_for_user(&self, user_id: &str) -> Result<Vec<OpenTurno>> {
        let conn = self.lock()?;
        query_list(
            &conn,
            "SELECT t.id, t.usuario_id, t.caja_id, t.fecha, t.hora_inicio, t.hora_fin,
                    t.estado, t.created_at,
                    c.id, c.nombre, c.ubicacion, c.es_principal, c.activa,
                    a.id, a.turno_id, a.monto_inicial, a.cerrada, a.fecha_hora
             FROM turnos t
             JOIN cajas c ON c.id = t.caja_id
             LEFT JOIN aperturas a ON a.turno_id = t.id
             WHERE t.usuario_id = ?1 AND t.estado = 'abierto'
             ORDER BY t.created_at DESC, t.rowid DESC",
            params![user_id],
            |row| {
                let apertura_id: Option<String> = row.get(13)?;
                let apertura = match apertura_id {
                    Some(_) => Some(apertura_at(row, 13)?),
                    None => None,
                };
                Ok(OpenTurno {
                    turno: turno_at(row, 0)?,
                    caja: caja_at(row, 8)?,
                    apertura,
                })
            },
        )
    }

    async fn open_shift(&self, shift: &NewShift) -> Result<(Turno, Apertura)> {
        let conn = self.lock()?;
        let now = Utc::now();
        let local = Local::now();

        let turno = Turno {
            id: Uuid::new_v4().to_string(),
            usuario_id: shift.usuario_id.clone(),
            caja_id: shift.caja_id.clone(),
            fecha: local.date_naive(),
            hora_inicio: local.format("%H:%M").to_string(),
            hora_fin: None,
            estado: TurnoEstado::Abierto,
            created_at: now,
        };
        let apertura = Apertura {
            id: Uuid::new_v4().to_string(),
            turno_id: turno.id.clone(),
            monto_inicial: shift.monto_inicial,
            cerrada: false,
            fecha_hora: now,
        };

        db::with_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO turnos (id, usuario_id, caja_id, fecha, hora_inicio, estado, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'abierto', ?6)",
                params![
                    turno.id,
                    turno.usuario_id,
                    turno.caja_id,
                    turno.fecha.format("%Y-%m-%d").to_string(),
                    turno.hora_inicio,
                    format_ts(turno.created_at),
                ],
            )?;
            tx.execute(
                "INSERT INTO aperturas (id, turno_id, monto_inicial, cerrada, fecha_hora)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![
                    apertura.id,
                    apertura.turno_id,
                    apertura.monto_inicial.to_string(),
                    format_ts(apertura.fecha_hora),
                ],
            )?;
            Ok(())
        })?;

        info!(turno_id = %turno.id, apertura_id = %apertura.id, "shift opened");
        Ok((turno, apertura))
    }

    async fn close_shift(&self, closure: &ShiftClosure) -> Result<Arqueo> {
        let conn = self.lock()?;
        let arqueo = Arqueo {
            id: Uuid::new_v4().to_string(),
            apertura_id: closure.apertura_id.clone(),
            monto_contado: closure.monto_contado,
            monto_esperado: closure.monto_esperado,
            diferencia: closure.diferencia,
            comentario: closure.comentario.clone(),
            fecha_hora: Utc::now(),
        };

        db::with_transaction(&conn, |tx| {
            // (1) reconciliation
            tx.execute(
                "INSERT INTO arqueos (id, apertura_id, monto_contado, monto_esperado,
                    diferencia, comentario, fecha_hora)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    arqueo.id,
                    arqueo.apertura_id,
                    arqueo.monto_contado.to_string(),
                    arqueo.monto_esperado.to_string(),
                    arqueo.diferencia.to_string(),
                    arqueo.comentario,
                    format_ts(arqueo.fecha_hora),
                ],
            )?;

            // (2) opening
            let closed = tx.execute(
                "UPDATE aperturas SET cerrada = 1
                 WHERE id = ?1 AND turno_id = ?2 AND cerrada = 0",
                params![closure.apertura_id, closure.turno_id],
            )?;
            if closed == 0 {
                return Err(CajaError::not_found(format!(
                    "open apertura {} for turno {}",
                    closure.apertura_id, closure.turno_id
                )));
            }

            // (3) shift
            let closed = tx.execute(
                "UPDATE turnos SET estado = 'cerrado', hora_fin = ?2
                 WHERE id = ?1 AND estado = 'abierto'",
                params![closure.turno_id, closure.hora_fin],
            )?;
            if closed == 0 {
                return Err(CajaError::not_found(format!(
                    "open turno {}",
                    closure.turno_id
                )));
            }
            Ok(())
        })?;

        info!(
            turno_id = %closure.turno_id,
            arqueo_id = %arqueo.id,
            diferencia = %arqueo.diferencia,
            "shift closed"
        );
        Ok(arqueo)
    }

    async fn get_arqueo(&self, arqueo_id: &str) -> Result<Option<Arqueo>> {
        let conn = self.lock()?;
        load_arqueo(&conn, arqueo_id)
    }

    async fn caja_of_arqueo(&self, arqueo_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT t.caja_id
                 FROM arqueos ar
                 JOIN aperturas a ON a.id = ar.apertura_id
                 JOIN turnos t ON t.id = a.turno_id
                 WHERE ar.id = ?1",
                params![arqueo_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn traslado_for_arqueo(&self, arqueo_id: &str) -> Result<Option<Traslado>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {TRASLADO_COLS} FROM traslados WHERE arqueo_id = ?1");
        Ok(conn
            .query_row(&sql, params![arqueo_id], traslado_row)
            .optional()?)
    }

    async fn insert_traslado(&self, traslado: &NewTraslado) -> Result<Traslado> {
        let conn = self.lock()?;
        let record = Traslado {
            id: Uuid::new_v4().to_string(),
            arqueo_id: traslado.arqueo_id.clone(),
            caja_origen_id: traslado.caja_origen_id.clone(),
            caja_destino_id: traslado.caja_destino_id.clone(),
            monto: traslado.monto,
            estado: TrasladoEstado::EnTransito,
            fecha_hora_envio: Utc::now(),
            comentario: traslado.comentario.clone(),
        };
        conn.execute(
            "INSERT INTO traslados (id, arqueo_id, caja_origen_id, caja_destino_id, monto,
                estado, fecha_hora_envio, comentario)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.arqueo_id,
                record.caja_origen_id,
                record.caja_destino_id,
                record.monto.to_string(),
                record.estado.as_str(),
                format_ts(record.fecha_hora_envio),
                record.comentario,
            ],
        )?;
        info!(traslado_id = %record.id, monto = %record.monto, "transfer sent");
        Ok(record)
    }

    async fn get_traslado(&self, traslado_id: &str) -> Result<Option<Traslado>> {
        let conn = self.lock()?;
        load_traslado(&conn, traslado_id)
    }

    async fn pending_traslados(&self, caja_destino_id: &str) -> Result<Vec<Traslado>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TRASLADO_COLS} FROM traslados
             WHERE caja_destino_id = ?1 AND estado = 'en_transito'
             ORDER BY fecha_hora_envio DESC"
        );
        query_list(&conn, &sql, params![caja_destino_id], traslado_row)
    }

    async fn receive_traslado(&self, recepcion: &NewRecepcion) -> Result<Recepcion> {
        let conn = self.lock()?;
        let record = Recepcion {
            id: Uuid::new_v4().to_string(),
            traslado_id: recepcion.traslado_id.clone(),
            usuario_receptor_id: recepcion.usuario_receptor_id.clone(),
            monto_recibido: recepcion.monto_recibido,
            diferencia: recepcion.diferencia,
            comentario: recepcion.comentario.clone(),
            fecha_hora: Utc::now(),
        };

        db::with_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO recepciones (id, traslado_id, usuario_receptor_id, monto_recibido,
                    diferencia, comentario, fecha_hora)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.traslado_id,
                    record.usuario_receptor_id,
                    record.monto_recibido.to_string(),
                    record.diferencia.to_string(),
                    record.comentario,
                    format_ts(record.fecha_hora),
                ],
            )?;
            let settled = tx.execute(
                "UPDATE traslados SET estado = ?2 WHERE id = ?1 AND estado = 'en_transito'",
                params![record.traslado_id, recepcion.estado_final.as_str()],
            )?;
            if settled == 0 {
                return Err(CajaError::validation(format!(
                    "traslado {} is not in transit",
                    record.traslado_id
                )));
            }
            Ok(())
        })?;

        info!(
            traslado_id = %record.traslado_id,
            recepcion_id = %record.id,
            estado = recepcion.estado_final.as_str(),
            "transfer received"
        );
        Ok(record)
    }

    async fn recent_aperturas(&self, limit: usize) -> Result<Vec<AperturaHistoryRow>> {
        let conn = self.lock()?;
        let rows = query_list(
            &conn,
            "SELECT a.id, a.monto_inicial, a.fecha_hora, a.cerrada, c.nombre, p.nombre_completo
             FROM aperturas a
             JOIN turnos t ON t.id = a.turno_id
             JOIN cajas c ON c.id = t.caja_id
             JOIN profiles p ON p.id = t.usuario_id
             ORDER BY a.fecha_hora DESC
             LIMIT ?1",
            params![limit_param(limit)],
            |row| {
                Ok(AperturaHistoryRow {
                    id: row.get(0)?,
                    monto_inicial: dec_col(row, 1)?,
                    fecha_hora: ts_col(row, 2)?,
                    cerrada: row.get(3)?,
                    caja_nombre: row.get(4)?,
                    usuario_nombre: row.get(5)?,
                })
            },
        )?;
        debug!(count = rows.len(), "loaded apertura history");
        Ok(rows)
    }

    async fn recent_arqueos(&self, limit: usize) -> Result<Vec<ArqueoHistoryRow>> {
        let conn = self.lock()?;
        let rows = query_list(
            &conn,
            "SELECT ar.id, ar.monto_contado, ar.diferencia, ar.fecha_hora,
                    c.nombre, p.nombre_completo
             FROM arqueos ar
             JOIN aperturas a ON a.id = ar.apertura_id
             JOIN turnos t ON t.id = a.turno_id
             JOIN cajas c ON c.id = t.caja_id
             JOIN profiles p ON p.id = t.usuario_id
             ORDER BY ar.fecha_hora DESC
             LIMIT ?1",
            params![limit_param(limit)],
            |row| {
                Ok(ArqueoHistoryRow {
                    id: row.get(0)?,
                    monto_contado: dec_col(row, 1)?,
                    diferencia: dec_col(row, 2)?,
                    fecha_hora: ts_col(row, 3)?,
                    caja_nombre: row.get(4)?,
                    usuario_nombre: row.get(5)?,
                })
            },
        )?;
        debug!(count = rows.len(), "loaded arqueo history");
        Ok(rows)
    }

    async fn recent_traslados(&self, limit: usize) -> Result<Vec<TrasladoHistoryRow>> {
        let conn = self.lock()?;
        let rows = query_list(
            &conn,
            "SELECT tr.id, tr.monto, tr.estado, tr.fecha_hora_envio,
                    co.nombre, cd.nombre, p.nombre_completo
             FROM traslados tr
             JOIN cajas co ON co.id = tr.caja_origen_id
             JOIN cajas cd ON cd.id = tr.caja_destino_id
             JOIN arqueos ar ON ar.id = tr.arqueo_id
             JOIN aperturas a ON a.id = ar.apertura_id
             JOIN turnos t ON t.id = a.turno_id
             JOIN profiles p ON p.id = t.usuario_id
             ORDER BY tr.fecha_hora_envio DESC
             LIMIT ?1",
            params![limit_param(limit)],
            |row| {
                Ok(TrasladoHistoryRow {
                    id: row.get(0)?,
                    monto: dec_col(row, 1)?,
                    estado: traslado_estado_col(row, 2)?,
                    fecha_hora_envio: ts_col(row, 3)?,
                    caja_origen_nombre: row.get(4)?,
                    caja_destino_nombre: row.get(5)?,
                    usuario_nombre: row.get(6)?,
                })
            },
        )?;
        debug!(count = rows.len(), "loaded traslado history");
        Ok(rows)
    }

    async fn recent_recepciones(&self, limit: usize) -> Result<Vec<RecepcionHistoryRow>> {
        let conn = self.lock()?;
        let rows = query_list(
            &conn,
            "SELECT r.id, r.monto_recibido, r.diferencia, r.fecha_hora,
                    cd.nombre, p.nombre_completo
             FROM recepciones r
             JOIN profiles p ON p.id = r.usuario_receptor_id
             JOIN traslados tr ON tr.id = r.traslado_id
             JOIN cajas cd ON cd.id = tr.caja_destino_id
             ORDER BY r.fecha_hora DESC
             LIMIT ?1",
            params![limit_param(limit)],
            |row| {
                Ok(RecepcionHistoryRow {
                    id: row.get(0)?,
                    monto_recibido: dec_col(row, 1)?,
                    diferencia: dec_col(row, 2)?,
                    fecha_hora: ts_col(row, 3)?,
                    caja_destino_nombre: row.get(4)?,
                    usuario_nombre: row.get(5)?,
                })
            },
        )?;
        debug!(count = rows.len(), "loaded recepcion history");
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Test fixtures shared by controller tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
