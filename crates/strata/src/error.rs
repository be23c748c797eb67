//! Error types for Strata

use std::time::Duration;

use thiserror::Error;

/// Main error type for Strata operations.
///
/// A missing key is never an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum StrataError {
    /// Backend unreachable, connection dropped or retry budget exhausted
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// A backend call exceeded its bounded timeout
    #[error("Timed out after {after:?}: {operation}")]
    Timeout { operation: String, after: Duration },

    /// Credentials rejected by the backend
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Backend quota or batch-size limit violated
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// Tier is a declared stub, not initialized, or cannot serve the request
    #[error("Degraded capability: {0}")]
    DegradedCapability(String),

    /// Non-transient backend errors (bad query, schema mismatch, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding collaborator errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration policy violations
    #[error("Migration error: {0}")]
    Migration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StrataError {
    /// Transient errors are retried with backoff at the pool layer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StrataError::ConnectionFailure(_) | StrataError::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StrataError::Timeout { .. })
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        StrataError::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(e: serde_json::Error) -> Self {
        StrataError::SerializationFailure(e.to_string())
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StrataError::ConnectionFailure("refused".into()).is_transient());
        assert!(StrataError::timeout("GET", Duration::from_millis(5)).is_transient());
        assert!(!StrataError::AuthenticationFailure("bad password".into()).is_transient());
        assert!(!StrataError::SerializationFailure("eof".into()).is_transient());
        assert!(!StrataError::DegradedCapability("stub".into()).is_transient());
    }

    #[test]
    fn test_timeout_is_distinguished() {
        let err = StrataError::timeout("GET user:42", Duration::from_secs(1));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("GET user:42"));
        assert!(!StrataError::ConnectionFailure("x".into()).is_timeout());
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization_failure() {
        let err: StrataError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, StrataError::SerializationFailure(_)));
    }
}
