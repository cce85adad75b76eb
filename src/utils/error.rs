//! Error Handling
//!
//! Unified error type for the engine.
//! Uses thiserror for ergonomic error definitions.

use plan_mode_core::CoreError;
use plan_mode_llm::LlmError;
use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation errors (bad transitions, malformed input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Model invocation errors (provider failures, capability failures)
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invocation error
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => Self::Io(e),
            CoreError::Serialization(e) => Self::Serialization(e),
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::InvalidArguments(msg) => Self::Validation(msg),
            other => Self::Invocation(other.to_string()),
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        Self::Invocation(err.to_string())
    }
}

/// Convert AppError to a plain message
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::validation("step 3 is already completed");
        assert_eq!(
            err.to_string(),
            "Validation error: step 3 is already completed"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err = AppError::config("text_flush_threshold must be greater than zero");
        let msg: String = err.into();
        assert!(msg.contains("Configuration error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_core_error_conversion() {
        let app_err: AppError = CoreError::not_found("Capability not found: x").into();
        assert!(matches!(app_err, AppError::NotFound(_)));

        let app_err: AppError = CoreError::execution("disk full").into();
        assert!(matches!(app_err, AppError::Invocation(_)));
    }

    #[test]
    fn test_llm_error_conversion() {
        let app_err: AppError = LlmError::NetworkError {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(
            app_err.to_string(),
            "Invocation error: Network error: connection reset"
        );
    }
}
