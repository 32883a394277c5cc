use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{err_string, parse_payload, CommandResult};
use crate::error::CajaError;
use crate::remote::normalize_base_url;
use crate::storage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupabaseCredentialsPayload {
    #[serde(default, alias = "supabase_url", alias = "supabaseUrl")]
    url: String,
    #[serde(default, alias = "anon_key", alias = "supabaseAnonKey")]
    anon_key: String,
}

fn parse_credentials_payload(arg0: Option<Value>) -> Result<(String, String), String> {
    let payload: SupabaseCredentialsPayload = parse_payload(arg0, "url", "credentials")?;
    let url = payload.url.trim();
    let anon_key = payload.anon_key.trim();
    if url.is_empty() {
        return Err(err_string(CajaError::validation("Missing Supabase URL")));
    }
    if anon_key.is_empty() {
        return Err(err_string(CajaError::validation("Missing Supabase anon key")));
    }
    Ok((normalize_base_url(url), anon_key.to_string()))
}

/// Persist the hosted backend connection in the OS keyring. Picked up by
/// `Config::from_env` when the environment does not set them.
pub async fn settings_set_supabase_credentials(arg0: Option<Value>) -> CommandResult {
    let (url, anon_key) = parse_credentials_payload(arg0)?;
    storage::set_credential(storage::KEY_SUPABASE_URL, &url)?;
    storage::set_credential(storage::KEY_SUPABASE_ANON_KEY, &anon_key)?;
    info!(url = %url, "supabase credentials stored");
    Ok(json!({ "success": true, "url": url }))
}

pub async fn settings_get_supabase_status() -> CommandResult {
    let url = storage::get_credential(storage::KEY_SUPABASE_URL);
    let has_key = storage::get_credential(storage::KEY_SUPABASE_ANON_KEY).is_some();
    Ok(json!({ "configured": url.is_some() && has_key, "url": url }))
}

/// Forget every stored credential.
pub async fn settings_clear_credentials() -> CommandResult {
    storage::clear_all();
    info!("stored credentials cleared");
    Ok(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_payload_normalizes_url() {
        let (url, key) = parse_credentials_payload(Some(json!({
            "supabase_url": " abc.supabase.co/ ",
            "anonKey": " anon "
        })))
        .unwrap();
        assert_eq!(url, "https://abc.supabase.co");
        assert_eq!(key, "anon");
    }

    #[tokio::test]
    async fn test_missing_values_are_rejected_before_keyring() {
        let err = settings_set_supabase_credentials(Some(json!({"url": "abc.supabase.co"})))
            .await
            .unwrap_err();
        assert!(err.contains("Missing Supabase anon key"));
        let err = settings_set_supabase_credentials(None).await.unwrap_err();
        assert!(err.contains("Missing Supabase URL"));
    }

    #[tokio::test]
    async fn test_clear_credentials_always_succeeds() {
        let result = settings_clear_credentials().await.unwrap();
        assert_eq!(result["success"], true);
    }
}
