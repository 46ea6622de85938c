use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common::model::PartitionLevel;
use http_common::BoxRequestError;
use metadata_db::{
    partitions::{self, DrillDownRow},
    snapshots,
    tables::{self, TableRow},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{ApiError, ServiceState};

#[derive(Debug, Serialize)]
pub(crate) struct TableSummary {
    name: String,
    partitions: Vec<PartitionLevel>,
    snapshot_count: i64,
    partition_count: i64,
    file_count: i64,
    record_count: i64,
    total_data_file_size_in_bytes: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ListTablesResponse {
    tables: Vec<TableSummary>,
}

#[instrument(skip_all, err)]
pub(crate) async fn list_tables(
    State(state): State<ServiceState>,
) -> Result<Json<ListTablesResponse>, BoxRequestError> {
    let rows = tables::list(state.db.pool())
        .await
        .map_err(ApiError::from)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(summarize(&state, row).await?);
    }

    Ok(Json(ListTablesResponse { tables: items }))
}

#[instrument(skip(state), err)]
pub(crate) async fn table_summary(
    State(state): State<ServiceState>,
    Path(table): Path<String>,
) -> Result<Json<TableSummary>, BoxRequestError> {
    let row = tables::get(state.db.pool(), &table)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("table {table} not found")))?;

    Ok(Json(summarize(&state, row).await?))
}

async fn summarize(state: &ServiceState, row: TableRow) -> Result<TableSummary, ApiError> {
    let rollup = partitions::rollup(state.db.pool(), &row.name).await?;
    let snapshot_count = snapshots::count_for_table(state.db.pool(), &row.name).await?;

    Ok(TableSummary {
        name: row.name,
        partitions: row.partitions.0,
        snapshot_count,
        partition_count: rollup.partition_count,
        file_count: rollup.file_count,
        record_count: rollup.record_count,
        total_data_file_size_in_bytes: rollup.total_data_file_size_in_bytes,
        updated_at: row.updated_at,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListPartitionsRequest {
    /// Already-selected partition levels; the response groups on the next
    /// level.
    #[serde(default)]
    partitions: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ListPartitionsResponse {
    partitions: Vec<DrillDownRow>,
}

#[instrument(skip(state, request), err)]
pub(crate) async fn list_partitions(
    State(state): State<ServiceState>,
    Path(table): Path<String>,
    Json(request): Json<ListPartitionsRequest>,
) -> Result<Json<ListPartitionsResponse>, BoxRequestError> {
    let row = tables::get(state.db.pool(), &table)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("table {table} not found")))?;

    let levels = row.partitions.0;
    let depth = request.partitions.len();

    // Unpartitioned tables and drill-downs past the last level have nothing
    // to group on.
    if levels.is_empty() || depth >= levels.len() {
        return Ok(Json(ListPartitionsResponse {
            partitions: Vec::new(),
        }));
    }

    let group_level = &levels[depth].name;
    let groups = partitions::drill_down(state.db.pool(), &table, group_level, &request.partitions)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ListPartitionsResponse { partitions: groups }))
}
