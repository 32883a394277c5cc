//! Shift lifecycle for Caja POS.
//!
//! A shift moves `no-opening -> open/active -> closed`. Opening creates the
//! `turnos` row and its `aperturas` row; closing (the arqueo) inserts the
//! reconciliation and closes both, atomically, through the store. There is
//! no reopen.

use chrono::Local;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::auth::SessionContext;
use crate::error::{CajaError, Result};
use crate::models::{ActiveOpening, Arqueo, NewShift, ShiftClosure, PARAM_UMBRAL_DIFERENCIA};
use crate::money::{self, DifferencePreview};
use crate::store::CajaStore;

/// Input of [`close_shift`].
#[derive(Debug, Clone)]
pub struct CloseShiftRequest {
    pub apertura_id: String,
    pub turno_id: String,
    pub counted: Decimal,
    pub expected: Decimal,
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Justification threshold, `2.00` when the parameter is absent or invalid.
pub async fn load_threshold<S: CajaStore>(store: &S) -> Result<Decimal> {
    let raw = store.get_parametro(PARAM_UMBRAL_DIFERENCIA).await?;
    if let Some(value) = raw.as_deref() {
        if money::parse_amount(value).is_none() {
            warn!(valor = %value, "invalid umbral_diferencia, using default");
        }
    }
    Ok(money::parse_threshold(raw.as_deref()))
}

/// The user's open shift whose opening is not closed yet.
///
/// Open shifts are scanned most recent first; several open shifts for one
/// user is tolerated and the newest wins. `None` is not an error.
pub async fn find_active_opening<S: CajaStore>(
    store: &S,
    user_id: &str,
) -> Result<Option<ActiveOpening>> {
    let turnos = store.open_turnos_for_user(user_id).await?;
    if turnos.len() > 1 {
        warn!(user_id, open_turnos = turnos.len(), "user has several open shifts");
    }

    let active = turnos.into_iter().find_map(|open| {
        let apertura = open.apertura.filter(|a| !a.cerrada)?;
        Some(ActiveOpening {
            turno_id: open.turno.id,
            apertura_id: apertura.id,
            monto_inicial: apertura.monto_inicial,
            caja: open.caja,
            fecha: open.turno.fecha,
            hora_inicio: open.turno.hora_inicio,
        })
    });
    Ok(active)
}

async fn require_active_opening<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
) -> Result<ActiveOpening> {
    find_active_opening(store, &ctx.user_id)
        .await?
        .ok_or_else(|| CajaError::not_found("No hay apertura activa para realizar arqueo"))
}

/// Difference preview for the amount currently typed in the count form.
pub async fn preview_difference<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
    counted_input: &str,
) -> Result<DifferencePreview> {
    let opening = require_active_opening(store, ctx).await?;
    let threshold = load_threshold(store).await?;
    Ok(money::preview(counted_input, opening.monto_inicial, threshold))
}

// ---------------------------------------------------------------------------
// Open shift
// ---------------------------------------------------------------------------

/// Open a shift on `caja_id` with a starting cash amount.
pub async fn open_shift<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
    caja_id: &str,
    monto_inicial: Decimal,
) -> Result<ActiveOpening> {
    if monto_inicial.is_sign_negative() && !monto_inicial.is_zero() {
        return Err(CajaError::validation("monto_inicial must not be negative"));
    }
    let monto_inicial = money::round_currency(monto_inicial);

    let caja = store
        .get_caja(caja_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("caja {caja_id}")))?;
    if !caja.activa {
        return Err(CajaError::validation(format!("caja {} is inactive", caja.nombre)));
    }

    if let Some(existing) = find_active_opening(store, &ctx.user_id).await? {
        return Err(CajaError::validation(format!(
            "user already has an active opening ({})",
            existing.apertura_id
        )));
    }

    let (turno, apertura) = store
        .open_shift(&NewShift {
            usuario_id: ctx.user_id.clone(),
            caja_id: caja.id.clone(),
            monto_inicial,
        })
        .await?;

    info!(
        user_id = %ctx.user_id,
        turno_id = %turno.id,
        monto_inicial = %apertura.monto_inicial,
        "apertura registered"
    );

    Ok(ActiveOpening {
        turno_id: turno.id,
        apertura_id: apertura.id,
        monto_inicial: apertura.monto_inicial,
        caja,
        fecha: turno.fecha,
        hora_inicio: turno.hora_inicio,
    })
}

// ---------------------------------------------------------------------------
// Close shift
// ---------------------------------------------------------------------------

/// Reconcile the active opening and close the shift.
///
/// Every check runs before the store is touched. The three writes are one
/// atomic unit at the store boundary.
pub async fn close_shift<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
    req: &CloseShiftRequest,
) -> Result<Arqueo> {
    let opening = require_active_opening(store, ctx).await?;
    if opening.apertura_id != req.apertura_id || opening.turno_id != req.turno_id {
        return Err(CajaError::validation(
            "apertura/turno do not match the active opening",
        ));
    }
    if money::round_currency(req.expected) != opening.monto_inicial {
        return Err(CajaError::validation(format!(
            "expected amount {} does not match opening amount {}",
            req.expected, opening.monto_inicial
        )));
    }
    if req.counted.is_sign_negative() && !req.counted.is_zero() {
        return Err(CajaError::validation("counted amount must not be negative"));
    }

    let counted = money::round_currency(req.counted);
    let difference = money::compute_difference(counted, opening.monto_inicial);
    let threshold = load_threshold(store).await?;
    let comment = req
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    if money::requires_justification(difference, threshold) && comment.is_none() {
        return Err(CajaError::validation(format!(
            "comment required: difference {difference} exceeds threshold {threshold}"
        )));
    }

    let arqueo = store
        .close_shift(&ShiftClosure {
            apertura_id: opening.apertura_id,
            turno_id: opening.turno_id,
            monto_contado: counted,
            monto_esperado: opening.monto_inicial,
            diferencia: difference,
            comentario: comment,
            hora_fin: Local::now().format("%H:%M").to_string(),
        })
        .await?;

    info!(
        user_id = %ctx.user_id,
        arqueo_id = %arqueo.id,
        diferencia = %arqueo.diferencia,
        "arqueo completed, turno closed"
    );
    Ok(arqueo)
}

// ===========================================================================
// Tests
// ===========================================================================
