use axum::extract::{Query, State};
use axum::Json;
use http_common::BoxRequestError;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{ApiError, ServiceState};

#[derive(Debug, Serialize)]
pub(crate) struct RefreshStatusResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshTableQuery {
    table: Option<String>,
}

#[instrument(skip_all, err)]
pub(crate) async fn refresh_full(
    State(state): State<ServiceState>,
) -> Result<Json<RefreshStatusResponse>, BoxRequestError> {
    state.refresh.refresh_all().await.map_err(ApiError::from)?;

    Ok(Json(RefreshStatusResponse { status: "ok" }))
}

#[instrument(skip_all, err)]
pub(crate) async fn refresh_table(
    State(state): State<ServiceState>,
    Query(query): Query<RefreshTableQuery>,
) -> Result<Json<RefreshStatusResponse>, BoxRequestError> {
    let table = query
        .table
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("table query parameter is required".into()))?;

    state
        .refresh
        .refresh_table_full(&table)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(RefreshStatusResponse { status: "ok" }))
}
