//! Error types for the relationship copilot

use thiserror::Error;

/// Result type alias for copilot operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Missing client or record. Surfaced, operation aborts.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structured agent failed (upstream error, timeout, or output that
    /// does not validate against the target schema).
    #[error("Generation error in {agent}: {message}")]
    Generation { agent: String, message: String },

    /// Malformed request input, rejected before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Derived/secondary update failure. Logged and swallowed by callers.
    #[error("Best-effort update failed: {0}")]
    BestEffort(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

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

impl OrchestrationError {
    pub fn generation(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in structured error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Generation { .. } => "generation_error",
            Self::Validation(_) => "validation_error",
            Self::BestEffort(_) => "best_effort_error",
            Self::Storage(_) | Self::IoError(_) | Self::DatabaseError(_) => "storage_error",
            Self::Notification(_) => "notification_error",
            Self::Config(_) => "config_error",
            Self::SerializationError(_) => "serialization_error",
            Self::HttpError(_) => "http_error",
        }
    }
}
