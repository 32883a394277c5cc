//! Cash transfers (traslados) between registers and their receptions.
//!
//! A reconciled shift's cash is sent from its register to a destination
//! register (usually the main one) and stays `en_transito` until the
//! destination counts it. The reception settles the transfer as `recibido`
//! when the count matches, `observado` otherwise.

use rust_decimal::Decimal;
use tracing::info;

use crate::auth::SessionContext;
use crate::error::{CajaError, Result};
use crate::models::{NewRecepcion, NewTraslado, Recepcion, Traslado, TrasladoEstado};
use crate::money;
use crate::shifts::load_threshold;
use crate::store::CajaStore;

fn normalize_comment(comment: Option<&str>) -> Option<String> {
    comment
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Send the cash of a reconciliation to `caja_destino_id`.
pub async fn create_transfer<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
    arqueo_id: &str,
    caja_destino_id: &str,
    monto: Decimal,
    comment: Option<&str>,
) -> Result<Traslado> {
    let monto = money::round_currency(monto);
    if monto <= Decimal::ZERO {
        return Err(CajaError::validation("monto must be greater than zero"));
    }

    store
        .get_arqueo(arqueo_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("arqueo {arqueo_id}")))?;
    let caja_origen_id = store
        .caja_of_arqueo(arqueo_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("caja of arqueo {arqueo_id}")))?;
    let destino = store
        .get_caja(caja_destino_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("caja {caja_destino_id}")))?;

    if destino.id == caja_origen_id {
        return Err(CajaError::validation(
            "destination register must differ from origin",
        ));
    }
    if !destino.activa {
        return Err(CajaError::validation(format!(
            "caja {} is inactive",
            destino.nombre
        )));
    }
    if let Some(existing) = store.traslado_for_arqueo(arqueo_id).await? {
        return Err(CajaError::validation(format!(
            "arqueo {arqueo_id} was already transferred ({})",
            existing.id
        )));
    }

    let traslado = store
        .insert_traslado(&NewTraslado {
            arqueo_id: arqueo_id.to_string(),
            caja_origen_id,
            caja_destino_id: destino.id,
            monto,
            comentario: normalize_comment(comment),
        })
        .await?;

    info!(
        user_id = %ctx.user_id,
        traslado_id = %traslado.id,
        monto = %traslado.monto,
        "traslado en tránsito"
    );
    Ok(traslado)
}

/// Count a transfer at its destination and settle it.
pub async fn receive_transfer<S: CajaStore>(
    store: &S,
    ctx: &SessionContext,
    traslado_id: &str,
    monto_recibido: Decimal,
    comment: Option<&str>,
) -> Result<Recepcion> {
    if monto_recibido.is_sign_negative() && !monto_recibido.is_zero() {
        return Err(CajaError::validation("monto_recibido must not be negative"));
    }
    let monto_recibido = money::round_currency(monto_recibido);

    let traslado = store
        .get_traslado(traslado_id)
        .await?
        .ok_or_else(|| CajaError::not_found(format!("traslado {traslado_id}")))?;
    if traslado.estado != TrasladoEstado::EnTransito {
        return Err(CajaError::validation(format!(
            "traslado {traslado_id} is {}, not en_transito",
            traslado.estado.as_str()
        )));
    }

    let diferencia = money::compute_difference(monto_recibido, traslado.monto);
    let threshold = load_threshold(store).await?;
    let comentario = normalize_comment(comment);
    if money::requires_justification(diferencia, threshold) && comentario.is_none() {
        return Err(CajaError::validation(format!(
            "comment required: difference {diferencia} exceeds threshold {threshold}"
        )));
    }

    let estado_final = if diferencia.is_zero() {
        TrasladoEstado::Recibido
    } else {
        TrasladoEstado::Observado
    };

    let recepcion = store
        .receive_traslado(&NewRecepcion {
            traslado_id: traslado.id,
            usuario_receptor_id: ctx.user_id.clone(),
            monto_recibido,
            diferencia,
            comentario,
            estado_final,
        })
        .await?;

    info!(
        user_id = %ctx.user_id,
        recepcion_id = %recepcion.id,
        diferencia = %recepcion.diferencia,
        "recepción registered"
    );
    Ok(recepcion)
}

/// Transfers waiting to be received at `caja_id`.
pub async fn pending_transfers<S: CajaStore>(store: &S, caja_id: &str) -> Result<Vec<Traslado>> {
    store.pending_traslados(caja_id).await
}
