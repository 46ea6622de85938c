use axum::extract::{Path, Query, State};
use axum::Json;
use common::FlexDateTime;
use http_common::BoxRequestError;
use metadata_db::tasks::{self, Task, TaskCounts, TaskFilter, TaskId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{ApiError, ServiceState};

#[derive(Debug, Deserialize)]
pub(crate) struct ExpireSnapshotsRequest {
    #[serde(default)]
    retention_days: i64,
    #[serde(default)]
    retain_last: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoveOrphanFilesRequest {
    #[serde(default)]
    retention_days: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OptimizeRequest {
    #[serde(default)]
    file_size_threshold_mb: i64,
    #[serde(default)]
    from: FlexDateTime,
    #[serde(default)]
    to: FlexDateTime,
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskQueuedResponse {
    task_id: TaskId,
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct OptimizeTasksQueuedResponse {
    task_ids: Vec<TaskId>,
    status: &'static str,
}

#[instrument(skip(state, request), err)]
pub(crate) async fn expire_snapshots(
    State(state): State<ServiceState>,
    Path(table): Path<String>,
    Json(request): Json<ExpireSnapshotsRequest>,
) -> Result<Json<TaskQueuedResponse>, BoxRequestError> {
    let task_id = state
        .planner
        .enqueue_expire_snapshots(&table, request.retention_days, request.retain_last)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(TaskQueuedResponse {
        task_id,
        status: "queued",
    }))
}

#[instrument(skip(state, request), err)]
pub(crate) async fn remove_orphan_files(
    State(state): State<ServiceState>,
    Path(table): Path<String>,
    Json(request): Json<RemoveOrphanFilesRequest>,
) -> Result<Json<TaskQueuedResponse>, BoxRequestError> {
    let task_id = state
        .planner
        .enqueue_remove_orphan_files(&table, request.retention_days)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(TaskQueuedResponse {
        task_id,
        status: "queued",
    }))
}

#[instrument(skip(state, request), err)]
pub(crate) async fn optimize(
    State(state): State<ServiceState>,
    Path(table): Path<String>,
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizeTasksQueuedResponse>, BoxRequestError> {
    let task_ids = state
        .planner
        .enqueue_optimize(
            &table,
            request.file_size_threshold_mb,
            request.from,
            request.to,
        )
        .await
        .map_err(ApiError::from)?;

    Ok(Json(OptimizeTasksQueuedResponse {
        task_ids,
        status: "queued",
    }))
}

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedTasks {
    items: Vec<Task>,
    total: i64,
}

/// `kind` and `status` are repeatable, so the query string is folded by hand.
fn parse_list_filter(params: Vec<(String, String)>) -> Result<TaskFilter, ApiError> {
    let mut filter = TaskFilter::default();

    for (key, value) in params {
        match key.as_str() {
            "table" => {
                if !value.is_empty() {
                    filter.table = Some(value);
                }
            }
            "kind" => filter.kinds.push(value),
            "status" => filter.statuses.push(value),
            "limit" => {
                filter.limit = value.parse().map_err(|_| {
                    ApiError::InvalidArgument(format!("invalid limit {value:?}"))
                })?;
            }
            "offset" => {
                filter.offset = value.parse().map_err(|_| {
                    ApiError::InvalidArgument(format!("invalid offset {value:?}"))
                })?;
            }
            _ => {}
        }
    }

    Ok(filter)
}

#[instrument(skip_all, err)]
pub(crate) async fn list_tasks(
    State(state): State<ServiceState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<PaginatedTasks>, BoxRequestError> {
    let filter = parse_list_filter(params)?;
    let (items, total) = tasks::list(state.db.pool(), &filter)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(PaginatedTasks { items, total }))
}

#[instrument(skip_all, err)]
pub(crate) async fn task_counts(
    State(state): State<ServiceState>,
) -> Result<Json<TaskCounts>, BoxRequestError> {
    let counts = tasks::counts(state.db.pool())
        .await
        .map_err(ApiError::from)?;

    Ok(Json(counts))
}

#[derive(Debug, Serialize)]
pub(crate) struct FlushedResponse {
    deleted: u64,
}

#[instrument(skip_all, err)]
pub(crate) async fn flush_tasks(
    State(state): State<ServiceState>,
) -> Result<Json<FlushedResponse>, BoxRequestError> {
    let deleted = tasks::flush(state.db.pool())
        .await
        .map_err(ApiError::from)?;

    Ok(Json(FlushedResponse { deleted }))
}
