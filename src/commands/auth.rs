use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use zeroize::Zeroizing;

use super::{err_string, parse_payload, to_value, CommandResult};
use crate::auth;
use crate::store::CajaStore;
use crate::CajaApp;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpPayload {
    email: String,
    password: String,
    #[serde(alias = "nombre_completo", alias = "fullName", alias = "name")]
    nombre_completo: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInPayload {
    email: String,
    password: String,
}

pub async fn auth_sign_up<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: SignUpPayload = parse_payload(arg0, "email", "sign-up")?;
    let profile = app
        .auth
        .sign_up(
            &app.store,
            &payload.email,
            Zeroizing::new(payload.password),
            &payload.nombre_completo,
        )
        .await
        .map_err(err_string)?;
    Ok(json!({ "success": true, "user": to_value(&profile)? }))
}

pub async fn auth_sign_in<S: CajaStore>(app: &CajaApp<S>, arg0: Option<Value>) -> CommandResult {
    let payload: SignInPayload = parse_payload(arg0, "email", "sign-in")?;
    let ctx = app
        .auth
        .sign_in(&app.store, &payload.email, Zeroizing::new(payload.password))
        .await
        .map_err(err_string)?;
    let session = app.auth.get_session();
    Ok(json!({
        "success": true,
        "context": to_value(&ctx)?,
        "session": to_value(&session)?,
    }))
}

pub async fn auth_sign_out<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    app.store.end_session().await;
    app.auth.sign_out();
    info!("sign-out requested from UI");
    Ok(json!({ "success": true }))
}

pub async fn auth_get_current_user<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    to_value(&app.auth.get_current_user())
}

pub async fn auth_get_session<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    to_value(&app.auth.get_session())
}

/// Profile of the signed-in user, re-read from the store.
pub async fn profile_get<S: CajaStore>(app: &CajaApp<S>) -> CommandResult {
    let ctx = app.auth.require_context().map_err(err_string)?;
    let profile = auth::load_profile(&app.store, &ctx)
        .await
        .map_err(err_string)?;
    to_value(&profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_app;

    #[tokio::test]
    async fn test_sign_up_then_sign_in_and_out() {
        let app = memory_app();
        let created = auth_sign_up(
            &app,
            Some(json!({
                "email": "ana@caja.test",
                "password": "secreto1",
                "nombre_completo": "Ana Pérez"
            })),
        )
        .await
        .unwrap();
        assert_eq!(created["user"]["nombre_completo"], "Ana Pérez");

        assert_eq!(auth_get_session(&app).await.unwrap(), Value::Null);

        let signed = auth_sign_in(
            &app,
            Some(json!({"email": "ana@caja.test", "password": "secreto1"})),
        )
        .await
        .unwrap();
        assert_eq!(signed["context"]["nombreCompleto"], "Ana Pérez");
        assert!(signed["session"]["sessionId"].is_string());

        let user = auth_get_current_user(&app).await.unwrap();
        assert_eq!(user["email"], "ana@caja.test");
        let profile = profile_get(&app).await.unwrap();
        assert_eq!(profile["id"], user["id"]);

        auth_sign_out(&app).await.unwrap();
        assert_eq!(auth_get_current_user(&app).await.unwrap(), Value::Null);
        let err = profile_get(&app).await.unwrap_err();
        assert!(err.contains("no session"));
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password_is_auth_error() {
        let app = memory_app();
        auth_sign_up(
            &app,
            Some(json!({"email": "luis@caja.test", "password": "secreto1", "fullName": "Luis"})),
        )
        .await
        .unwrap();
        let err = auth_sign_in(
            &app,
            Some(json!({"email": "luis@caja.test", "password": "otra-cosa"})),
        )
        .await
        .unwrap_err();
        assert!(err.starts_with("Auth error"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let app = memory_app();
        let err = auth_sign_in(&app, Some(json!({"email": "x@y.z"})))
            .await
            .unwrap_err();
        assert!(err.contains("Invalid sign-in payload"));
    }
}
