//! Error types for the gateway and their API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors surfaced by the registry, the lifecycle manager and the API
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Model '{model}' not found")]
    ModelNotFound { model: String },

    #[error("Failed to load model '{model}': {source:#}")]
    ModelLoadFailed {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Model loading is disabled, cannot activate '{model}'")]
    ModelLoadingDisabled { model: String },

    #[error("Model '{model}' uses unsupported backend type '{backend}'")]
    UnsupportedBackendType { model: String, backend: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Inference failed: {message}")]
    Inference { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status the transport reports for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ModelLoadingDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ModelLoadFailed { .. }
            | Self::UnsupportedBackendType { .. }
            | Self::Inference { .. }
            | Self::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
