//! Error types for the audit pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Connector error: {0}")]
    ConnectorError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Analysis error: {0}")]
    AnalysisError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
