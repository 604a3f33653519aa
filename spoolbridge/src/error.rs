//! HTTP error type for the spoolbridge service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500), e.g. a blocking task that panicked
    #[error("Internal server error: {0}")]
    Internal(String),

    /// spoolbridge-common error
    #[error("Common error: {0}")]
    Common(#[from] spoolbridge_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                let code = match err {
                    spoolbridge_common::Error::Persistence { .. } => "PERSISTENCE_ERROR",
                    _ => "COMMON_ERROR",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let persistence = ApiError::from(spoolbridge_common::Error::persistence(
            "/data/filament_mapping.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        ));
        assert_eq!(persistence.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bad = ApiError::BadRequest("source_id is required".to_string());
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let internal = ApiError::Internal("task failed".to_string());
        assert_eq!(internal.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
