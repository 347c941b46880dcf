//! Error types for Cropgate

use hyper::StatusCode;

/// Main error type for Cropgate operations
#[derive(Debug, thiserror::Error)]
pub enum CropgateError {
    /// Request rejected before any external call (missing image, missing crop)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entitlement exhausted; no oracle call was made
    #[error("{0}")]
    QuotaExceeded(String),

    /// The external diagnosis oracle failed (network, provider error, missing content)
    #[error("Diagnosis failed: {0}")]
    OracleFailure(String),

    /// Local persistence could not be completed even after degradation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Lookup found no matching document (webhook email, history id)
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CropgateError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            Self::OracleFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP responses
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for CropgateError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CropgateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for CropgateError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for CropgateError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for CropgateError {
    fn from(err: reqwest::Error) -> Self {
        Self::OracleFailure(err.to_string())
    }
}

/// Result type alias for Cropgate operations
pub type Result<T> = std::result::Result<T, CropgateError>;
