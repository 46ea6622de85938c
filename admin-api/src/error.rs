use axum::http::StatusCode;
use catalog_client::CatalogError;
use http_common::RequestError;
use refresh::RefreshError;
use task_engine::planner::PlannerError;

/// API-level error with the HTTP status mapping: invalid arguments and
/// unknown tables are the caller's fault, everything else is ours.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl RequestError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("metadata db error: {e}"))
    }
}

impl From<metadata_db::Error> for ApiError {
    fn from(e: metadata_db::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<PlannerError> for ApiError {
    fn from(e: PlannerError) -> Self {
        match e {
            PlannerError::InvalidArgument(message) => ApiError::InvalidArgument(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::Catalog(CatalogError::TableNotFound(table)) => {
                ApiError::NotFound(format!("table {table} not found in catalog"))
            }
            RefreshError::Catalog(inner @ CatalogError::UnknownTransform(_)) => {
                ApiError::InvalidArgument(inner.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
