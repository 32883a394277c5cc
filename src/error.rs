//! Error taxonomy shared by controllers, stores and the command boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CajaError {
    /// A required field is missing or invalid. Raised before any write.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote or local store failure (constraint violation, network fault, ...).
    #[error("Store error: {0}")]
    Store(String),

    #[error("Auth error: {0}")]
    Auth(String),
}

impl CajaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Stable machine-readable code for the command boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store",
            Self::Auth(_) => "auth",
        }
    }
}

impl From<rusqlite::Error> for CajaError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(format!("sqlite: {e}"))
    }
}

impl From<reqwest::Error> for CajaError {
    fn from(e: reqwest::Error) -> Self {
        Self::Store(format!("http: {e}"))
    }
}

impl From<serde_json::Error> for CajaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, CajaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_map_to_store() {
        let err: CajaError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.code(), "store");
        assert!(err.to_string().starts_with("Store error: sqlite"));
    }

    #[test]
    fn test_display_includes_message() {
        let err = CajaError::validation("comment required");
        assert_eq!(err.to_string(), "Validation error: comment required");
        assert_eq!(err.code(), "validation");
    }
}
