//! # Application Error Types
//!
//! This module defines common error types used throughout the spendscan core.
//! It provides structured error handling for the recognition pipeline and
//! categorization components.

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// Validation errors (image bytes, merchant names, amounts)
    Validation(String),
    /// Recognition pipeline errors (OCR engine, scheduled task failures)
    Recognition(String),
    /// Cache operation errors
    Cache(String),
    /// Worker pool scheduling errors (shutdown, rejected waiters)
    Pool(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Validation(msg) => write!(f, "[VALIDATION] {}", msg),
            AppError::Recognition(msg) => write!(f, "[RECOGNITION] {}", msg),
            AppError::Cache(msg) => write!(f, "[CACHE] {}", msg),
            AppError::Pool(msg) => write!(f, "[POOL] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Standardized error logging utilities for consistent error reporting across the application
pub mod error_logging {
    use tracing::error;

    /// Log recognition pipeline errors with image and timing context
    pub fn log_recognition_error(
        error: &impl std::fmt::Display,
        operation: &str,
        image_size: Option<usize>,
        processing_duration: Option<std::time::Duration>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            image_size_bytes = ?image_size,
            processing_duration_ms = ?processing_duration.map(|d| d.as_millis()),
            "Recognition processing failed"
        );
    }

    /// Log cache operation errors with key context
    pub fn log_cache_error(error: &impl std::fmt::Display, operation: &str, key: &str) {
        error!(
            error = %error,
            operation = %operation,
            key = %key,
            "Cache operation failed"
        );
    }

    /// Log category prediction errors with merchant context
    pub fn log_prediction_error(error: &impl std::fmt::Display, merchant: &str, user_id: &str) {
        error!(
            error = %error,
            merchant = %merchant,
            user_id = %user_id,
            "Category prediction failed, degrading to unconfident prediction"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_tags() {
        assert_eq!(
            AppError::Config("bad value".to_string()).to_string(),
            "[CONFIG] bad value"
        );
        assert_eq!(
            AppError::Pool("shutting down".to_string()).to_string(),
            "[POOL] shutting down"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err, AppError::Internal("boom".to_string()));
    }
}
