//! JSON command boundary.
//!
//! Each handler takes the UI payload as an optional JSON value (object with
//! camelCase or snake_case keys, or a bare string for single-id commands)
//! and returns a JSON value or the error's display string.

pub mod auth;
pub mod history;
pub mod settings;
pub mod shifts;
pub mod transfers;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CajaError;
use crate::money;

pub type CommandResult = Result<Value, String>;

/// Normalize `arg0`: a bare string becomes `{ <shorthand_key>: s }`, a
/// missing payload becomes `{}`.
pub(crate) fn payload_object(arg0: Option<Value>, shorthand_key: &str) -> Value {
    match arg0 {
        Some(Value::String(s)) => serde_json::json!({ shorthand_key: s }),
        Some(Value::Null) | None => serde_json::json!({}),
        Some(v) => v,
    }
}

pub(crate) fn parse_payload<T: DeserializeOwned>(
    arg0: Option<Value>,
    shorthand_key: &str,
    what: &str,
) -> Result<T, String> {
    serde_json::from_value(payload_object(arg0, shorthand_key))
        .map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// Trimmed, non-empty id or a validation error naming the field.
pub(crate) fn require_id(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CajaError::validation(format!("Missing {field}")).to_string());
    }
    Ok(trimmed.to_string())
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> CommandResult {
    serde_json::to_value(value).map_err(|e| format!("serialize response: {e}"))
}

pub(crate) fn err_string(e: CajaError) -> String {
    e.to_string()
}

/// Amount as typed in a form: a JSON number or a string with `.` / `,`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum AmountInput {
    Number(serde_json::Number),
    Text(String),
}

impl AmountInput {
    pub(crate) fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub(crate) fn parse(&self, field: &str) -> Result<Decimal, String> {
        money::parse_amount(&self.as_text()).ok_or_else(|| {
            CajaError::validation(format!("{field} must be a non-negative amount")).to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_object_wraps_bare_string() {
        assert_eq!(
            payload_object(Some(json!("c1")), "cajaId"),
            json!({"cajaId": "c1"})
        );
        assert_eq!(payload_object(None, "cajaId"), json!({}));
        assert_eq!(
            payload_object(Some(json!({"caja_id": "c1"})), "cajaId"),
            json!({"caja_id": "c1"})
        );
    }

    #[test]
    fn test_amount_input_accepts_number_and_comma_text() {
        let n: AmountInput = serde_json::from_value(json!(102.5)).unwrap();
        assert_eq!(n.parse("monto").unwrap().to_string(), "102.50");
        let t: AmountInput = serde_json::from_value(json!("99,00")).unwrap();
        assert_eq!(t.parse("monto").unwrap().to_string(), "99.00");
        let neg: AmountInput = serde_json::from_value(json!(-1)).unwrap();
        assert!(neg.parse("monto").unwrap_err().starts_with("Validation error"));
    }

    #[test]
    fn test_require_id_trims() {
        assert_eq!(require_id("  t1 ", "turnoId").unwrap(), "t1");
        assert!(require_id("  ", "turnoId").unwrap_err().contains("Missing turnoId"));
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use serde_json::json;

    use crate::db::DbState;
    use crate::local_store::fixtures::seed_caja;
    use crate::test_support::memory_app;
    use crate::CajaApp;

    /// App with two registers and a signed-in cashier "Ana Pérez".
    pub async fn signed_in_app() -> CajaApp<DbState> {
        let app = memory_app();
        seed_caja(&app.store, "c1", "Caja 1", false);
        seed_caja(&app.store, "c0", "Caja Principal", true);
        super::auth::auth_sign_up(
            &app,
            Some(json!({
                "email": "ana@caja.test",
                "password": "secreto1",
                "nombreCompleto": "Ana Pérez"
            })),
        )
        .await
        .unwrap();
        super::auth::auth_sign_in(
            &app,
            Some(json!({"email": "ana@caja.test", "password": "secreto1"})),
        )
        .await
        .unwrap();
        app
    }
}
