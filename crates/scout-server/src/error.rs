use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use scout_core::error::{AppError, GENERIC_FAILURE_MESSAGE};

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
///
/// Only caller mistakes and quota rejections are described to the client.
/// Everything else is logged and answered with a generic failure.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::InvalidRequest(_) | AppError::SerializationError(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "LIMIT_REACHED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "SEARCH_FAILED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self.0 {
            AppError::SerializationError(e) => format!("Malformed request body: {e}"),
            other if status.is_server_error() => {
                tracing::error!(error = %other, "Request failed");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            other => other.public_message(),
        };

        let body = ErrorResponse {
            error: code.to_string(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Shorthand for handlers that answer with a plain error body.
pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: code.to_string(),
        message: message.into(),
    };
    (status, axum::Json(body)).into_response()
}
