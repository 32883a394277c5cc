use chrono::{Local, Offset};
use serde::Deserialize;
use serde_json::Value;

use super::{err_string, parse_payload, to_value, CommandResult};
use crate::history::{self, HistoryFilters};
use crate::store::CajaStore;
use crate::CajaApp;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    #[serde(default, alias = "type", alias = "tipo_operacion")]
    tipo: Option<String>,
    #[serde(default, alias = "fecha_inicio", alias = "dateFrom", alias = "date_from")]
    fecha_inicio: Option<String>,
    #[serde(default, alias = "fecha_fin", alias = "dateTo", alias = "date_to")]
    fecha_fin: Option<String>,
    #[serde(default, alias = "status")]
    estado: Option<String>,
}

/// Merged operations history, newest first, filtered by the form values.
/// Dates are days on this machine's local clock, matching `hora_fin`.
pub async fn history_load<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: HistoryPayload = parse_payload(arg0, "tipo", "history")?;
    let filters = HistoryFilters::from_raw(
        payload.tipo.as_deref(),
        payload.fecha_inicio.as_deref(),
        payload.fecha_fin.as_deref(),
        payload.estado.as_deref(),
    )
    .map_err(err_string)?
    .with_utc_offset(Local::now().offset().fix());
    app.auth.require_context().map_err(err_string)?;
    let operations = history::load_history(&app.store, &filters, app.config.history_limit)
        .await
        .map_err(err_string)?;
    to_value(&operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::shifts::{shift_close, shift_open};
    use crate::commands::test_helpers::signed_in_app;
    use serde_json::json;

    #[tokio::test]
    async fn test_history_lists_opening_and_reconciliation() {
        let app = signed_in_app().await;
        let opening = shift_open(&app, Some(json!({"cajaId": "c1", "montoInicial": "100"})))
            .await
            .unwrap()["opening"]
            .clone();
        shift_close(
            &app,
            Some(json!({
                "aperturaId": opening["aperturaId"],
                "turnoId": opening["turnoId"],
                "montoContado": "99",
                "montoEsperado": "100",
            })),
        )
        .await
        .unwrap();

        let all = history_load(&app, None).await.unwrap();
        let ops = all.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op["user"] == "Ana Pérez"));

        let only_arqueos = history_load(&app, Some(json!({"tipo": "arqueos"})))
            .await
            .unwrap();
        let ops = only_arqueos.as_array().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0]["kind"], "arqueo");
        assert_eq!(ops[0]["difference"], "-1.00");
    }

    #[tokio::test]
    async fn test_inverted_date_range_is_validation() {
        let app = signed_in_app().await;
        let err = history_load(
            &app,
            Some(json!({"fecha_inicio": "2026-03-05", "fecha_fin": "2026-03-01"})),
        )
        .await
        .unwrap_err();
        assert!(err.starts_with("Validation error"));
    }
}
