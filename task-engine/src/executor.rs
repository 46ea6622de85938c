//! Runs maintenance statements on the engine

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{model, BoxError};
use engine_client::{sql, EngineClient, EngineError};
use metadata_db::{tables, MetadataDb};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use crate::MaintenanceExecutor;

#[derive(Debug, Clone, Serialize)]
pub struct ExpireSnapshotsOutcome {
    pub table: String,
    pub retention_days: i64,
    pub retain_last: i64,
    pub clean_expired_metadata: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveOrphanFilesOutcome {
    pub table: String,
    pub retention_days: i64,
    pub metrics: BTreeMap<String, JsonValue>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeOutcome {
    pub table: String,
    pub file_size_threshold_mb: i64,
    #[serde(rename = "where")]
    pub where_clause: String,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("could not get table metadata for {0}")]
    UnknownTable(String),

    #[error("no suitable day-partition column found for optimization")]
    NoDayPartitionColumn,

    #[error("could not expire snapshots for table {table}: {source}")]
    ExpireFailed {
        table: String,
        #[source]
        source: EngineError,
    },

    #[error("could not remove orphan files for table {table}: {source}")]
    RemoveOrphansFailed {
        table: String,
        #[source]
        source: EngineError,
    },

    #[error("could not optimize table {table} (range {where_clause}): {source}")]
    OptimizeFailed {
        table: String,
        where_clause: String,
        #[source]
        source: EngineError,
    },

    #[error("metadata db error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Maintenance executor backed by the engine client and the stored table
/// descriptors.
#[derive(Clone)]
pub struct EngineExecutor {
    engine: EngineClient,
    db: MetadataDb,
}

impl EngineExecutor {
    pub fn new(engine: EngineClient, db: MetadataDb) -> Self {
        Self { engine, db }
    }

    /// The column to build the optimize predicate on, from the stored
    /// descriptor.
    async fn day_partition_column(&self, table: &str) -> Result<String, ExecutorError> {
        let row = tables::get(self.db.pool(), table)
            .await?
            .ok_or_else(|| ExecutorError::UnknownTable(table.to_string()))?;

        model::day_partition_column(&row.partitions.0)
            .map(str::to_string)
            .ok_or(ExecutorError::NoDayPartitionColumn)
    }
}

#[async_trait]
impl MaintenanceExecutor for EngineExecutor {
    #[instrument(skip(self), err)]
    async fn expire_snapshots(
        &self,
        table: &str,
        retention_days: i64,
        retain_last: i64,
    ) -> Result<ExpireSnapshotsOutcome, BoxError> {
        if retention_days < 1 {
            return Err(
                ExecutorError::InvalidArgument("retention days must be at least 1".to_string())
                    .into(),
            );
        }
        if retain_last < 1 {
            return Err(
                ExecutorError::InvalidArgument("retain last must be at least 1".to_string()).into(),
            );
        }

        let statement = sql::expire_snapshots_statement(
            &self.engine.qualified_table_name(table),
            retention_days,
            retain_last,
        );
        self.engine
            .execute(&statement)
            .await
            .map_err(|source| ExecutorError::ExpireFailed {
                table: table.to_string(),
                source,
            })?;

        Ok(ExpireSnapshotsOutcome {
            table: table.to_string(),
            retention_days,
            retain_last,
            clean_expired_metadata: true,
            status: "ok".to_string(),
        })
    }

    #[instrument(skip(self), err)]
    async fn remove_orphan_files(
        &self,
        table: &str,
        retention_days: i64,
    ) -> Result<RemoveOrphanFilesOutcome, BoxError> {
        if retention_days < 1 {
            return Err(
                ExecutorError::InvalidArgument("retention days must be at least 1".to_string())
                    .into(),
            );
        }

        let statement = sql::remove_orphan_files_statement(
            &self.engine.qualified_table_name(table),
            retention_days,
        );
        let rows = self
            .engine
            .query_rows(&statement)
            .await
            .map_err(|source| ExecutorError::RemoveOrphansFailed {
                table: table.to_string(),
                source,
            })?;

        let mut metrics = BTreeMap::new();
        for row in rows {
            let (Some(JsonValue::String(name)), Some(value)) =
                (row.get("metric_name"), row.get("metric_value"))
            else {
                continue;
            };
            metrics.insert(name.clone(), value.clone());
        }

        Ok(RemoveOrphanFilesOutcome {
            table: table.to_string(),
            retention_days,
            metrics,
            status: "ok".to_string(),
        })
    }

    #[instrument(skip(self), err)]
    async fn optimize(
        &self,
        table: &str,
        file_size_threshold_mb: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<OptimizeOutcome, BoxError> {
        if file_size_threshold_mb < 1 {
            return Err(ExecutorError::InvalidArgument(
                "file size threshold must be at least 1".to_string(),
            )
            .into());
        }
        if from > to {
            return Err(ExecutorError::InvalidArgument(
                "from date must be before or equal to to date".to_string(),
            )
            .into());
        }

        let day_column = self.day_partition_column(table).await?;

        let (statement, where_clause) = sql::optimize_statement(
            &self.engine.qualified_table_name(table),
            file_size_threshold_mb,
            &day_column,
            from,
            to,
        );

        info!("optimizing table {table} range {from} to {to}");

        self.engine
            .execute(&statement)
            .await
            .map_err(|source| ExecutorError::OptimizeFailed {
                table: table.to_string(),
                where_clause: where_clause.clone(),
                source,
            })?;

        Ok(OptimizeOutcome {
            table: table.to_string(),
            file_size_threshold_mb,
            where_clause,
            status: "ok".to_string(),
        })
    }
}
