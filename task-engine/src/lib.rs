//! Maintenance task planning and execution
//!
//! The planner validates user requests and expands them into queued tasks;
//! the worker polls the queue, limits in-flight work with a resizable gate,
//! and dispatches per-kind handlers against the engine.

pub mod executor;
pub mod gate;
pub mod input;
pub mod planner;
pub mod worker;

pub use executor::{
    EngineExecutor, ExpireSnapshotsOutcome, OptimizeOutcome, RemoveOrphanFilesOutcome,
};
pub use gate::{GatePermit, WorkerGate};
pub use planner::TaskPlanner;
pub use worker::TaskWorker;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::BoxError;
use metadata_db::{
    tasks::{self, Task, TaskId},
    MetadataDb,
};
use serde_json::Value as JsonValue;

/// Queue operations the worker consumes.
#[async_trait]
pub trait TaskClaimer: Send + Sync {
    async fn claim(&self) -> Result<Option<Task>, BoxError>;

    async fn complete(
        &self,
        id: TaskId,
        result: Option<JsonValue>,
        error_message: Option<String>,
    ) -> Result<(), BoxError>;
}

/// Execute-capability against the external engine.
#[async_trait]
pub trait MaintenanceExecutor: Send + Sync {
    async fn expire_snapshots(
        &self,
        table: &str,
        retention_days: i64,
        retain_last: i64,
    ) -> Result<ExpireSnapshotsOutcome, BoxError>;

    async fn remove_orphan_files(
        &self,
        table: &str,
        retention_days: i64,
    ) -> Result<RemoveOrphanFilesOutcome, BoxError>;

    async fn optimize(
        &self,
        table: &str,
        file_size_threshold_mb: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<OptimizeOutcome, BoxError>;
}

/// The follow-up snapshot refresh the worker runs after an expire. Injected
/// as a capability so the worker carries no reference to the full refresh
/// pipeline.
#[async_trait]
pub trait SnapshotRefresher: Send + Sync {
    async fn refresh_snapshots(&self, table: &str) -> Result<(), BoxError>;
}

#[async_trait]
impl SnapshotRefresher for refresh::RefreshService {
    async fn refresh_snapshots(&self, table: &str) -> Result<(), BoxError> {
        refresh::RefreshService::refresh_snapshots(self, table)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

/// The database-backed task queue.
#[derive(Clone)]
pub struct TaskQueue {
    db: MetadataDb,
}

impl TaskQueue {
    pub fn new(db: MetadataDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskClaimer for TaskQueue {
    async fn claim(&self) -> Result<Option<Task>, BoxError> {
        tasks::claim(self.db.pool()).await.map_err(Into::into)
    }

    async fn complete(
        &self,
        id: TaskId,
        result: Option<JsonValue>,
        error_message: Option<String>,
    ) -> Result<(), BoxError> {
        tasks::complete(self.db.pool(), id, result.as_ref(), error_message.as_deref())
            .await
            .map_err(Into::into)
    }
}
