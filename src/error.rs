// Error taxonomy for the fleet control plane, tenant node runtime, and gateway.
//
// Kinds map onto the HTTP status codes in spec section 7: NotFound -> 404,
// AlreadyExists -> 409, PermissionDenied/Unauthenticated -> 403/401,
// QuotaExceeded -> 507/429, Unavailable -> 503, everything else -> 502/500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("storage quota exceeded: {0}")]
    StorageQuotaExceeded(String),

    #[error("api quota exceeded: {0}")]
    ApiQuotaExceeded(String),

    #[error("user quota exceeded: {0}")]
    UserQuotaExceeded(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("transient error, retry: {0}")]
    Transient(String),

    #[error("fatal configuration error: {0}")]
    Fatal(String),

    #[error("not leader, redirect to {leader_addr:?}: {reason}")]
    NotLeader {
        leader_addr: Option<String>,
        reason: String,
    },

    #[error("new database (no snapshot present)")]
    NewDatabase,

    #[error("restore in progress for tenant {0}")]
    RestoreInProgress(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RdbError>;

impl RdbError {
    /// HTTP status code this error should surface as, per spec section 7.
    pub fn status_code(&self) -> u16 {
        match self {
            RdbError::NotFound(_) => 404,
            RdbError::AlreadyExists(_) => 409,
            RdbError::PermissionDenied(_) => 403,
            RdbError::Unauthenticated(_) => 401,
            RdbError::StorageQuotaExceeded(_) => 507,
            RdbError::ApiQuotaExceeded(_) => 429,
            RdbError::UserQuotaExceeded(_) => 403,
            RdbError::Unavailable(_) | RdbError::NotLeader { .. } => 503,
            RdbError::RestoreInProgress(_) => 202,
            RdbError::InvalidInput(_) => 400,
            RdbError::Transient(_) => 503,
            RdbError::Fatal(_) => 500,
            _ => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RdbError::Transient(_) | RdbError::Unavailable(_) | RdbError::NotLeader { .. }
        )
    }

    pub fn with_context(self, key: &str, value: &str) -> Self {
        match self {
            RdbError::Internal(msg) => RdbError::Internal(format!("{msg} ({key}={value})")),
            RdbError::Network(msg) => RdbError::Network(format!("{msg} ({key}={value})")),
            other => other,
        }
    }
}

impl IntoResponse for RdbError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(RdbError::NotFound("t1".into()).status_code(), 404);
        assert_eq!(RdbError::AlreadyExists("d".into()).status_code(), 409);
        assert_eq!(RdbError::StorageQuotaExceeded("t1".into()).status_code(), 507);
        assert_eq!(RdbError::ApiQuotaExceeded("t1".into()).status_code(), 429);
        assert_eq!(RdbError::Unavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn retryable_kinds() {
        assert!(RdbError::Transient("x".into()).is_retryable());
        assert!(!RdbError::NotFound("x".into()).is_retryable());
    }
}
