//! Error types for the orchestration core
//!
//! These are internal errors raised by stores, collaborators and configuration.
//! Failures surfaced to callers go through [`crate::categorize`] instead.

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum WindflowError {
    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Geocoding error: {0}")]
    Geocoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WindflowError {
    fn from(e: serde_json::Error) -> Self {
        WindflowError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for WindflowError {
    fn from(e: rusqlite::Error) -> Self {
        WindflowError::StoreUnavailable(e.to_string())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, WindflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = WindflowError::from(err);
        assert!(matches!(err, WindflowError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error"));
    }
}
