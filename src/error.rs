use std::path::PathBuf;

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error on `{field}`: expected {expected}, got {actual}")]
    Validation {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{0} has not been fitted")]
    NotFitted(&'static str),

    #[error("Transaction source error: {message}")]
    ExternalSource { message: String, retryable: bool },

    #[error("No model artifact found at {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("Model artifact at {} is unreadable: {reason}", path.display())]
    ArtifactUnreadable { path: PathBuf, reason: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn validation(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        AppError::Validation {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for source failures worth retrying (network, rate limit, 5xx).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ExternalSource { retryable: true, .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::NotFitted(_) | AppError::ArtifactNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::ExternalSource { .. } if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalSource { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_source_errors_are_retryable() {
        let transient = AppError::ExternalSource {
            message: "Max rate limit reached".to_string(),
            retryable: true,
        };
        let fatal = AppError::ExternalSource {
            message: "Invalid API Key".to_string(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
        assert!(!AppError::NotFitted("outlier model").is_retryable());
        assert_eq!(transient.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(fatal.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_artifact_maps_to_bad_request() {
        let err = AppError::ArtifactNotFound {
            path: PathBuf::from("models/isolation_forest.json"),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let corrupt = AppError::ArtifactUnreadable {
            path: PathBuf::from("models/scaler.json"),
            reason: "EOF".to_string(),
        };
        assert_eq!(corrupt.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_message_names_field() {
        let err = AppError::validation("gasPrice", "a column present in the batch", "missing");
        assert!(err.to_string().contains("gasPrice"));
    }
}
