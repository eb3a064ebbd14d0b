use crate::sandbox::SandboxError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::response::ErrorResponse;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Not found (404)
    NotFound(String),

    /// Internal server error (500)
    InternalError(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Underlying error message
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::InternalError(msg) => msg,
        }
    }

    /// Message shown to the client: 5xx detail is replaced by the status reason
    pub fn public_message(&self) -> String {
        let status = self.status_code();
        if status.is_server_error() {
            status.canonical_reason().unwrap_or("Error").to_string()
        } else {
            self.message().to_string()
        }
    }

    pub fn unsupported_space(space: &str) -> Self {
        Self::NotFound(format!(
            "space {:?} not found: currently only {:?} is supported",
            space,
            super::routes::SUPPORTED_SPACE
        ))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (
            status,
            axum::Json(ErrorResponse {
                message: self.public_message(),
            }),
        )
            .into_response();

        // The logging middleware reports the real cause
        if status.is_server_error() {
            response.extensions_mut().insert(ErrorDetail(self.message().to_string()));
        }
        response
    }
}

/// Unredacted 5xx cause, carried to the logging middleware in response extensions
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::NotFound { .. } => Self::NotFound(err.to_string()),
            SandboxError::EmptySpace => Self::BadRequest(err.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::BadRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InternalError("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_errors_are_redacted() {
        let err = ApiError::InternalError("create: docker: socket refused".into());
        assert_eq!(err.public_message(), "Internal Server Error");
        assert_eq!(err.message(), "create: docker: socket refused");

        let err = ApiError::NotFound("sandbox not found: default.x".into());
        assert_eq!(err.public_message(), "sandbox not found: default.x");
    }

    #[test]
    fn test_from_sandbox_error() {
        let err: ApiError = SandboxError::NotFound {
            resource: "default.x".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = SandboxError::Cancelled.into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unsupported_space_message() {
        let err = ApiError::unsupported_space("other");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message().contains("\"other\""));
    }
}
