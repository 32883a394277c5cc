//! Secure credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the hosted-store connection
//! settings so they never sit in a plain config file.

use keyring::Entry;
use tracing::{info, warn};

const SERVICE_NAME: &str = "caja-pos";

pub const KEY_SUPABASE_URL: &str = "supabase_url";
pub const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_SUPABASE_URL, KEY_SUPABASE_ANON_KEY];

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    if !ALL_KEYS.contains(&key) {
        return Err(format!("unknown credential key: {key}"));
    }
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    info!(key, "keyring: credential stored");
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Remove every credential this app stored.
pub fn clear_all() {
    for key in ALL_KEYS {
        if let Err(e) = delete_credential(key) {
            warn!(key, error = %e, "keyring: failed to delete credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_is_rejected_before_touching_keyring() {
        let err = set_credential("pos_api_key", "x").unwrap_err();
        assert!(err.contains("unknown credential key"));
    }
}
