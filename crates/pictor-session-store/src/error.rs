//! Error taxonomy for the session store.
//!
//! Every public operation funnels backend failures and malformed data
//! through this one surface: a typed error carrying a machine-readable
//! code and a severity callers can branch on. Backend connectivity
//! failures are `critical`, domain-contract violations are `error`, and
//! metadata-schema gate failures are `warning`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::traits::BackendError;

/// Convenience result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Machine-readable error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    SessionAlreadyExists,
    InvalidMetadata,
    ImageNotInSession,
    MetadataNotFound,
    BackendOperationFailed,
    InvalidJsonData,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionAlreadyExists => "SESSION_ALREADY_EXISTS",
            ErrorCode::InvalidMetadata => "INVALID_METADATA",
            ErrorCode::ImageNotInSession => "IMAGE_NOT_IN_SESSION",
            ErrorCode::MetadataNotFound => "METADATA_NOT_FOUND",
            ErrorCode::BackendOperationFailed => "BACKEND_OPERATION_FAILED",
            ErrorCode::InvalidJsonData => "INVALID_JSON_DATA",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad it is: `Critical` means the backend itself is unhealthy,
/// `Error` means the caller violated the store's contract, `Warning`
/// means an advisory validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
}

/// Unified error type for all session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} already exists")]
    SessionAlreadyExists(String),

    #[error("session {0} does not exist")]
    SessionNotFound(String),

    #[error("metadata missing recognized sections (expected one of exif, iptc, xmp)")]
    InvalidMetadata,

    #[error("image {hash} not associated with session {session_id}")]
    ImageNotInSession { session_id: String, hash: String },

    #[error("metadata not found for image {0}")]
    MetadataNotFound(String),

    #[error("invalid JSON data in store: {0}")]
    InvalidJsonData(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            StoreError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            StoreError::InvalidMetadata => ErrorCode::InvalidMetadata,
            StoreError::ImageNotInSession { .. } => ErrorCode::ImageNotInSession,
            StoreError::MetadataNotFound(_) => ErrorCode::MetadataNotFound,
            StoreError::InvalidJsonData(_) => ErrorCode::InvalidJsonData,
            StoreError::Backend(_) => ErrorCode::BackendOperationFailed,
            StoreError::Unexpected(_) => ErrorCode::UnexpectedError,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Backend(_) => Severity::Critical,
            StoreError::InvalidMetadata => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Snapshot this error as a structured envelope for logging or wire
    /// translation.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code(),
            severity: self.severity(),
            message: self.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Structured form of a [`StoreError`], ready for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake_case() {
        let json = serde_json::to_value(ErrorCode::SessionNotFound).unwrap();
        assert_eq!(json, serde_json::json!("SESSION_NOT_FOUND"));
        assert_eq!(ErrorCode::ImageNotInSession.as_str(), "IMAGE_NOT_IN_SESSION");
    }

    #[test]
    fn severity_follows_error_class() {
        let backend = StoreError::Backend(BackendError::Connection("refused".into()));
        assert_eq!(backend.severity(), Severity::Critical);

        let contract = StoreError::SessionNotFound("s1".into());
        assert_eq!(contract.severity(), Severity::Error);

        let stale = StoreError::MetadataNotFound("abc".into());
        assert_eq!(stale.severity(), Severity::Error);

        let advisory = StoreError::InvalidMetadata;
        assert_eq!(advisory.severity(), Severity::Warning);
    }

    #[test]
    fn envelope_carries_code_and_timestamp() {
        let err = StoreError::SessionAlreadyExists("s1".into());
        let envelope = err.envelope();
        assert_eq!(envelope.code, ErrorCode::SessionAlreadyExists);
        assert_eq!(envelope.severity, Severity::Error);
        assert!(envelope.message.contains("s1"));

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], "SESSION_ALREADY_EXISTS");
        assert_eq!(json["severity"], "error");
        assert!(json["timestamp"].is_string());
    }
}
