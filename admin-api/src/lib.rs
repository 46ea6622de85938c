//! HTTP API for the lakehouse control plane

mod error;
mod handlers;

pub use error::ApiError;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use common::BoxResult;
use metadata_db::MetadataDb;
use refresh::RefreshService;
use task_engine::{TaskPlanner, WorkerGate};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ServiceState {
    pub db: MetadataDb,
    pub planner: TaskPlanner,
    pub refresh: Arc<RefreshService>,
    pub gate: WorkerGate,
    pub default_worker_count: i64,
}

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/api/browse/tables", get(handlers::browse::list_tables))
        .route("/api/browse/{table}", get(handlers::browse::table_summary))
        .route(
            "/api/browse/{table}/partitions",
            post(handlers::browse::list_partitions),
        )
        .route(
            "/api/metadata/partitions",
            get(handlers::metadata::list_partitions),
        )
        .route(
            "/api/metadata/snapshots",
            get(handlers::metadata::list_snapshots),
        )
        .route(
            "/api/tasks/{table}/expire-snapshots",
            post(handlers::tasks::expire_snapshots),
        )
        .route(
            "/api/tasks/{table}/remove-orphan-files",
            post(handlers::tasks::remove_orphan_files),
        )
        .route("/api/tasks/{table}/optimize", post(handlers::tasks::optimize))
        .route(
            "/api/tasks",
            get(handlers::tasks::list_tasks).delete(handlers::tasks::flush_tasks),
        )
        .route("/api/tasks/counts", get(handlers::tasks::task_counts))
        .route(
            "/api/settings/task-concurrency",
            get(handlers::settings::get_task_concurrency)
                .put(handlers::settings::set_task_concurrency),
        )
        .route("/api/refresh/full", get(handlers::refresh::refresh_full))
        .route("/api/refresh/table", get(handlers::refresh::refresh_table))
        .with_state(state)
}

pub async fn serve(
    at: SocketAddr,
    state: ServiceState,
    shutdown: broadcast::Receiver<()>,
) -> BoxResult<(SocketAddr, impl Future<Output = BoxResult<()>>)> {
    http_common::serve_at(at, router(state), shutdown).await
}
