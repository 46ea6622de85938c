//! Expands user maintenance requests into queued tasks

use chrono::NaiveDate;
use common::FlexDateTime;
use metadata_db::{
    partitions,
    tasks::{self, TaskId, TaskKind},
    MetadataDb,
};
use tracing::instrument;

use crate::input::{ExpireSnapshotsInput, OptimizeInput, RemoveOrphanFilesInput};

pub const MIN_RETENTION_DAYS: i64 = 7;
pub const MIN_RETAIN_LAST: i64 = 10;
pub const DEFAULT_FILE_SIZE_THRESHOLD_MB: i64 = 128;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("could not parse partition date {0:?}")]
    InvalidPartitionDate(String),

    #[error("could not encode task input: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("could not plan maintenance task: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct TaskPlanner {
    db: MetadataDb,
}

impl TaskPlanner {
    pub fn new(db: MetadataDb) -> Self {
        Self { db }
    }

    /// Enqueue a snapshot-expiration task. Retention is clamped to at least
    /// [`MIN_RETENTION_DAYS`] days and [`MIN_RETAIN_LAST`] retained
    /// snapshots; the clamped values are what gets stored.
    #[instrument(skip(self), err)]
    pub async fn enqueue_expire_snapshots(
        &self,
        table: &str,
        retention_days: i64,
        retain_last: i64,
    ) -> Result<TaskId, PlannerError> {
        let input = ExpireSnapshotsInput {
            retention_days: retention_days.max(MIN_RETENTION_DAYS),
            retain_last: retain_last.max(MIN_RETAIN_LAST),
        };

        let id = tasks::enqueue(
            self.db.pool(),
            table,
            TaskKind::ExpireSnapshots,
            &serde_json::to_value(&input)?,
        )
        .await?;

        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub async fn enqueue_remove_orphan_files(
        &self,
        table: &str,
        retention_days: i64,
    ) -> Result<TaskId, PlannerError> {
        let input = RemoveOrphanFilesInput {
            retention_days: retention_days.max(MIN_RETENTION_DAYS),
        };

        let id = tasks::enqueue(
            self.db.pool(),
            table,
            TaskKind::RemoveOrphanFiles,
            &serde_json::to_value(&input)?,
        )
        .await?;

        Ok(id)
    }

    /// Fan out one optimize task per partition that needs compaction inside
    /// `[from, to]`.
    ///
    /// Each task gets a single-day window on its partition's date, and the
    /// returned ids follow ascending partition date. No qualifying partition
    /// is a success with an empty id list.
    #[instrument(skip(self), err)]
    pub async fn enqueue_optimize(
        &self,
        table: &str,
        file_size_threshold_mb: i64,
        from: FlexDateTime,
        to: FlexDateTime,
    ) -> Result<Vec<TaskId>, PlannerError> {
        let file_size_threshold_mb = if file_size_threshold_mb < 1 {
            DEFAULT_FILE_SIZE_THRESHOLD_MB
        } else {
            file_size_threshold_mb
        };

        let (Some(from), Some(to)) = (from.date_naive(), to.date_naive()) else {
            return Err(PlannerError::InvalidArgument(
                "from and to dates are required for optimize".to_string(),
            ));
        };
        if from > to {
            return Err(PlannerError::InvalidArgument(
                "from date must be before or equal to the to date".to_string(),
            ));
        }

        let candidates = partitions::needs_optimize_dates(
            self.db.pool(),
            table,
            &from.format("%Y-%m-%d").to_string(),
            &to.format("%Y-%m-%d").to_string(),
        )
        .await?;

        let mut task_ids = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            // Older rows may carry un-padded month/day values; parsing is
            // lenient about the padding.
            let date_str = format!("{}-{}-{}", candidate.year, candidate.month, candidate.day);
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|_| PlannerError::InvalidPartitionDate(date_str.clone()))?;

            let input = OptimizeInput {
                file_size_threshold_mb,
                from: FlexDateTime::from_date(date),
                to: FlexDateTime::from_date(date),
            };

            let id = tasks::enqueue(
                self.db.pool(),
                table,
                TaskKind::Optimize,
                &serde_json::to_value(&input)?,
            )
            .await?;
            task_ids.push(id);
        }

        Ok(task_ids)
    }
}
