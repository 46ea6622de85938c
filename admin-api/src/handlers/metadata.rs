use axum::extract::{Query, State};
use axum::Json;
use http_common::BoxRequestError;
use metadata_db::{partitions, partitions::PartitionRow, snapshots, snapshots::SnapshotRow};
use serde::Deserialize;
use tracing::instrument;

use crate::{ApiError, ServiceState};

#[derive(Debug, Deserialize)]
pub(crate) struct TableQuery {
    table: Option<String>,
}

impl TableQuery {
    fn table(self) -> Result<String, ApiError> {
        self.table
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidArgument("table query parameter is required".into()))
    }
}

#[instrument(skip_all, err)]
pub(crate) async fn list_partitions(
    State(state): State<ServiceState>,
    Query(query): Query<TableQuery>,
) -> Result<Json<Vec<PartitionRow>>, BoxRequestError> {
    let table = query.table()?;
    let rows = partitions::list_for_table(state.db.pool(), &table)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rows))
}

#[instrument(skip_all, err)]
pub(crate) async fn list_snapshots(
    State(state): State<ServiceState>,
    Query(query): Query<TableQuery>,
) -> Result<Json<Vec<SnapshotRow>>, BoxRequestError> {
    let table = query.table()?;
    let rows = snapshots::list_for_table(state.db.pool(), &table)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rows))
}
