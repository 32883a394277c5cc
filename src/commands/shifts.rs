use serde::Deserialize;
use serde_json::{json, Value};

use super::{err_string, parse_payload, require_id, to_value, AmountInput, CommandResult};
use crate::error::CajaError;
use crate::shifts::{self as shift_service, CloseShiftRequest};
use crate::store::CajaStore;
use crate::CajaApp;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftOpenPayload {
    #[serde(alias = "caja_id", alias = "id")]
    caja_id: String,
    #[serde(alias = "monto_inicial", alias = "amount")]
    monto_inicial: AmountInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftPreviewPayload {
    #[serde(default, alias = "monto_contado", alias = "counted")]
    monto_contado: Option<AmountInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftClosePayload {
    #[serde(alias = "apertura_id")]
    apertura_id: String,
    #[serde(alias = "turno_id")]
    turno_id: String,
    #[serde(default, alias = "monto_contado", alias = "counted")]
    monto_contado: Option<AmountInput>,
    #[serde(alias = "monto_esperado", alias = "expected")]
    monto_esperado: AmountInput,
    #[serde(default, alias = "comment")]
    comentario: Option<String>,
}

/// Registers available for opening, main register first.
pub async fn cajas_list<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    let cajas = app.store.list_cajas().await.map_err(err_string)?;
    let active: Vec<_> = cajas.into_iter().filter(|c| c.activa).collect();
    to_value(&active)
}

pub async fn shift_open<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: ShiftOpenPayload = parse_payload(arg0, "cajaId", "shift open")?;
    let caja_id = require_id(&payload.caja_id, "cajaId")?;
    let monto = payload.monto_inicial.parse("montoInicial")?;
    let ctx = app.auth.require_context().map_err(err_string)?;
    let opening = shift_service::open_shift(&app.store, &ctx, &caja_id, monto)
        .await
        .map_err(err_string)?;
    Ok(json!({ "success": true, "opening": to_value(&opening)? }))
}

/// The signed-in user's active opening, or `null`.
pub async fn shift_get_active<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    let ctx = app.auth.require_context().map_err(err_string)?;
    let opening = shift_service::find_active_opening(&app.store, &ctx.user_id)
        .await
        .map_err(err_string)?;
    to_value(&opening)
}

pub async fn shift_preview_difference<S: CajaStore>(
    app: &CajaApp<S>,
    arg0: Option<Value>,
) -> CommandResult {
    let payload: ShiftPreviewPayload = parse_payload(arg0, "montoContado", "preview")?;
    let counted = payload
        .monto_contado
        .as_ref()
        .map(AmountInput::as_text)
        .unwrap_or_default();
    let ctx = app.auth.require_context().map_err(err_string)?;
    let preview = shift_service::preview_difference(&app.store, &ctx, &counted)
        .await
        .map_err(err_string)?;
    to_value(&preview)
}

pub async fn shift_close<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: ShiftClosePayload = parse_payload(arg0, "aperturaId", "shift close")?;
    let counted = match payload.monto_contado.as_ref() {
        Some(amount) => amount.parse("montoContado")?,
        None => return Err(err_string(CajaError::validation("montoContado is required"))),
    };
    let req = CloseShiftRequest {
        apertura_id: require_id(&payload.apertura_id, "aperturaId")?,
        turno_id: require_id(&payload.turno_id, "turnoId")?,
        counted,
        expected: payload.monto_esperado.parse("montoEsperado")?,
        comment: payload.comentario,
    };
    let ctx = app.auth.require_context().map_err(err_string)?;
    let arqueo = shift_service::close_shift(&app.store, &ctx, &req)
        .await
        .map_err(err_string)?;
    Ok(json!({ "success": true, "arqueo": to_value(&arqueo)? }))
}
