use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error. Every variant renders as `{"detail": "..."}` with the
/// matching status code.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(message) => Self::NotFound(message),
            AppError::Validation(message) => Self::BadRequest(message),
            AppError::UnsupportedFileType(extension) => {
                Self::BadRequest(format!("Unsupported file type: {extension}"))
            }
            other => {
                tracing::error!(error = %other, "internal error");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of<T: IntoResponse>(response: T) -> StatusCode {
        response.into_response().status()
    }

    #[test]
    fn app_errors_map_to_expected_status_codes() {
        assert_eq!(
            status_of(ApiError::from(AppError::NotFound("chat".to_string()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::from(AppError::Validation("bad".to_string()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::from(AppError::UnsupportedFileType("xlsx".to_string()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::from(AppError::Processing("boom".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let error = ApiError::from(AppError::Processing("db password wrong".to_string()));
        assert_eq!(error.to_string(), "Internal server error");
    }
}
