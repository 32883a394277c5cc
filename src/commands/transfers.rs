use serde::Deserialize;
use serde_json::{json, Value};

use super::{err_string, parse_payload, require_id, to_value, AmountInput, CommandResult};
use crate::store::CajaStore;
use crate::transfers;
use crate::CajaApp;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferCreatePayload {
    #[serde(alias = "arqueo_id")]
    arqueo_id: String,
    #[serde(alias = "caja_destino_id")]
    caja_destino_id: String,
    #[serde(alias = "amount")]
    monto: AmountInput,
    #[serde(default, alias = "comment")]
    comentario: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferReceivePayload {
    #[serde(alias = "traslado_id", alias = "id")]
    traslado_id: String,
    #[serde(alias = "monto_recibido", alias = "amount")]
    monto_recibido: AmountInput,
    #[serde(default, alias = "comment")]
    comentario: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferPendingPayload {
    #[serde(alias = "caja_id", alias = "id")]
    caja_id: String,
}

pub async fn transfer_create<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: TransferCreatePayload = parse_payload(arg0, "arqueoId", "transfer")?;
    let arqueo_id = require_id(&payload.arqueo_id, "arqueoId")?;
    let destino = require_id(&payload.caja_destino_id, "cajaDestinoId")?;
    let monto = payload.monto.parse("monto")?;
    let ctx = app.auth.require_context().map_err(err_string)?;
    let traslado = transfers::create_transfer(
        &app.store,
        &ctx,
        &arqueo_id,
        &destino,
        monto,
        payload.comentario.as_deref(),
    )
    .await
    .map_err(err_string)?;
    Ok(json!({ "success": true, "traslado": to_value(&traslado)? }))
}

pub async fn transfer_receive<S: CajaStore>(
    app: &CajaApp<S>,
    arg0: Option<Value>,
) -> CommandResult {
    let payload: TransferReceivePayload = parse_payload(arg0, "trasladoId", "reception")?;
    let traslado_id = require_id(&payload.traslado_id, "trasladoId")?;
    let monto = payload.monto_recibido.parse("montoRecibido")?;
    let ctx = app.auth.require_context().map_err(err_string)?;
    let recepcion = transfers::receive_transfer(
        &app.store,
        &ctx,
        &traslado_id,
        monto,
        payload.comentario.as_deref(),
    )
    .await
    .map_err(err_string)?;
    Ok(json!({ "success": true, "recepcion": to_value(&recepcion)? }))
}

/// Transfers still in transit towards a register.
pub async fn transfer_list_pending<S: CajaStore>(
    app: &CajaApp<S>,
    arg0: Option<Value>,
) -> CommandResult {
    let payload: TransferPendingPayload = parse_payload(arg0, "cajaId", "pending transfers")?;
    let caja_id = require_id(&payload.caja_id, "cajaId")?;
    app.auth.require_context().map_err(err_string)?;
    let pending = transfers::pending_transfers(&app.store, &caja_id)
        .await
        .map_err(err_string)?;
    to_value(&pending)
}
