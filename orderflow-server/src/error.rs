//! Error types for the service, storage, and HTTP layers

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Storage-layer error
///
/// The repository maps "no rows" on the root order read to [`StoreError::NotFound`];
/// everything else propagates as a database error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Outcome of handling a single log message
///
/// The consumer treats every variant uniformly as "do not commit"; the
/// distinction exists for logging and for the breaker bookkeeping done by the
/// handler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("bad json")]
    BadJson,
    #[error("upsert failed")]
    UpsertFailed,
}

/// HTTP-facing error: status code plus a plaintext body
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("order id required")]
    MissingOrderId,
    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,
    #[error("bad json")]
    BadJson,
    #[error("{0}")]
    Validation(String),
    #[error("no order with this id")]
    NotFound,
    #[error("service error")]
    Service,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingOrderId | Self::BadJson | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Service => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Db(db_err) => {
                tracing::error!(error = %db_err, "storage error");
                ApiError::Service
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_codes() {
        assert_eq!(ApiError::MissingOrderId.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UnsupportedMediaType.status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Service.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let api: ApiError = StoreError::NotFound.into();
        assert!(matches!(api, ApiError::NotFound));
    }
}
