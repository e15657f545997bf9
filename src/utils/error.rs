//! Error types and handling
//!
//! Common error types used across the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Capability missing or refused. Recoverable: the user can grant and retry.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A device track ended while recording. Fatal to the current session only.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Invalid trim range: start={start}s end={end}s duration={duration}s")]
    InvalidRange { start: f64, end: f64, duration: f64 },

    /// Trim could not complete. The source blob is untouched.
    #[error("Trim failed: {0}")]
    TrimFailed(#[source] crate::media::MediaError),

    /// Refresh failed; stored credentials have been cleared.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Another {0} is already in progress")]
    Busy(&'static str),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service has been disposed")]
    Disposed,
}

impl AppError {
    /// Stable code for the frontend
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::PermissionDenied(_) => "PERMISSION_DENIED",
            AppError::DeviceLost(_) => "DEVICE_LOST",
            AppError::InvalidRange { .. } => "INVALID_RANGE",
            AppError::TrimFailed(_) => "TRIM_FAILED",
            AppError::RefreshFailed(_) => "REFRESH_FAILED",
            AppError::Cancelled => "CANCELLED",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::Busy(_) => "BUSY",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Disposed => "DISPOSED",
        }
    }
}

/// Error response for frontend
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response: ErrorResponse = AppError::PermissionDenied("camera".to_string()).into();
        assert_eq!(response.code, "PERMISSION_DENIED");
        assert!(response.message.contains("camera"));

        let response: ErrorResponse = AppError::InvalidRange {
            start: 5.0,
            end: 2.0,
            duration: 10.0,
        }
        .into();
        assert_eq!(response.code, "INVALID_RANGE");
    }
}
