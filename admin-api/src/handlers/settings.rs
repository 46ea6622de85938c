use axum::extract::State;
use axum::Json;
use http_common::BoxRequestError;
use metadata_db::settings::{self, TASK_CONCURRENCY};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{ApiError, ServiceState};

#[derive(Debug, Serialize)]
pub(crate) struct TaskConcurrencyResponse {
    value: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetTaskConcurrencyRequest {
    value: i64,
}

#[instrument(skip_all, err)]
pub(crate) async fn get_task_concurrency(
    State(state): State<ServiceState>,
) -> Result<Json<TaskConcurrencyResponse>, BoxRequestError> {
    let value = settings::get_int(state.db.pool(), TASK_CONCURRENCY)
        .await
        .map_err(ApiError::from)?
        .unwrap_or(state.default_worker_count);

    Ok(Json(TaskConcurrencyResponse { value }))
}

/// Persists the setting and resizes the live worker gate; running tasks are
/// not interrupted.
#[instrument(skip_all, err)]
pub(crate) async fn set_task_concurrency(
    State(state): State<ServiceState>,
    Json(request): Json<SetTaskConcurrencyRequest>,
) -> Result<Json<TaskConcurrencyResponse>, BoxRequestError> {
    if request.value < 1 {
        return Err(ApiError::InvalidArgument(
            "task concurrency must be at least 1".to_string(),
        )
        .into());
    }

    settings::set(
        state.db.pool(),
        TASK_CONCURRENCY,
        &request.value.to_string(),
    )
    .await
    .map_err(ApiError::from)?;

    state.gate.set_capacity(request.value as usize);
    info!("updated task concurrency to {}", request.value);

    Ok(Json(TaskConcurrencyResponse {
        value: request.value,
    }))
}
