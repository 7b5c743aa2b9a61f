use async_openai::error::OpenAIError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The uploaded bytes are not delimited text with a consistent column count.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("{0}")]
    NotFound(String),

    /// A required external-service credential is missing. Operator error, never retried.
    #[error("Service not configured: {0}")]
    Unconfigured(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Upstream service timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn dataset_not_found() -> Self {
        AppError::NotFound("Dataset not found.".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unconfigured(_)
            | AppError::Storage(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::MalformedInput(err.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl From<OpenAIError> for AppError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(ref e) if e.is_timeout() => AppError::UpstreamTimeout(err.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, self);
        } else {
            tracing::warn!("Request rejected with {}: {}", status, self);
        }

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(AppError::MalformedInput("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::dataset_not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unconfigured("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Upstream("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(AppError::UpstreamTimeout("x".into()).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn not_found_message_is_user_facing() {
        assert_eq!(AppError::dataset_not_found().to_string(), "Dataset not found.");
    }
}
