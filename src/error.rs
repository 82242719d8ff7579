//! Error types for the Themis triage engine
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for error propagation at the binary edge.

use thiserror::Error;

/// Main error type for Themis operations
#[derive(Error, Debug)]
pub enum ThemisError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Model API request failed
    #[error("Model API error: {0}")]
    ModelApi(String),

    /// Invalid identifier format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// Item not found
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Rule not found
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Batch card not found
    #[error("Batch card not found: {0}")]
    CardNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid operation (e.g., resolving a confirmed card)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Themis operations
pub type Result<T> = std::result::Result<T, ThemisError>;

/// Convert anyhow::Error to ThemisError
impl From<anyhow::Error> for ThemisError {
    fn from(err: anyhow::Error) -> Self {
        ThemisError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ThemisError::ItemNotFound("test-id".to_string());
        assert_eq!(err.to_string(), "Item not found: test-id");
    }

    #[test]
    fn test_error_conversion() {
        let uuid_err = uuid::Uuid::parse_str("invalid");
        assert!(uuid_err.is_err());

        let themis_err: ThemisError = uuid_err.unwrap_err().into();
        assert!(matches!(themis_err, ThemisError::InvalidId(_)));
    }
}
