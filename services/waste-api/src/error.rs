use crate::filters::FilterError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Invalid payloads will not succeed on retry. A missing edge box or
    /// segment may still be registered later, so `NotFound` is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

/// Errors returned to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

/// Error envelope body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status_code: &'static str,
    pub status_description: String,
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "non-matching-query",
            ApiError::BadRequest(_) => "bad-request",
            ApiError::Internal(_) => "server-error",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "No matching data found",
            ApiError::BadRequest(_) => "Bad request",
            ApiError::Internal(_) => "Internal server error",
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                status_code: self.code(),
                status_description: self.description().to_string(),
                detail: self.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(detail) => ApiError::NotFound(detail),
            StoreError::Validation(detail) => ApiError::BadRequest(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope() {
        let err = ApiError::NotFound("event abc not found".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(body["error"]["status_code"], "non-matching-query");
        assert_eq!(body["error"]["detail"], "event abc not found");
    }

    #[test]
    fn test_status_codes() {
        let bad = ApiError::BadRequest("x".to_string());
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.code(), "bad-request");

        let internal = ApiError::Internal("x".to_string());
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.code(), "server-error");

        let response = ApiError::BadRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_error_conversion() {
        let api: ApiError = StoreError::NotFound("missing".to_string()).into();
        assert!(matches!(api, ApiError::NotFound(_)));

        let api: ApiError = StoreError::Validation("bad".to_string()).into();
        assert!(matches!(api, ApiError::BadRequest(_)));

        let api: ApiError = StoreError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(api, ApiError::Internal(_)));
    }

    #[test]
    fn test_filter_error_is_bad_request() {
        let api: ApiError = FilterError::MissingValue("event".to_string()).into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_permanent_errors() {
        assert!(StoreError::Validation("x".to_string()).is_permanent());
        assert!(!StoreError::NotFound("segment".to_string()).is_permanent());
        assert!(!StoreError::Database(sqlx::Error::PoolTimedOut).is_permanent());
    }
}
