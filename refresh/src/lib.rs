//! Projects catalog state into the metadata store
//!
//! A full refresh runs three steps in order: table descriptor, partition
//! stats, snapshot history. Each step commits in its own transaction, so the
//! outer call is not atomic; the delete-then-insert model keeps retries
//! idempotent.

pub mod periodic;
pub mod projection;

pub use periodic::PeriodicRefresh;

use std::sync::Arc;

use catalog_client::{CatalogError, CatalogGateway};
use chrono::{DateTime, Utc};
use metadata_db::{partitions, snapshots, snapshots::SnapshotRow, tables, MetadataDb};
use sqlx::types::Json;
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("metadata db error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct RefreshService {
    db: MetadataDb,
    catalog: Arc<dyn CatalogGateway>,
}

impl RefreshService {
    pub fn new(db: MetadataDb, catalog: Arc<dyn CatalogGateway>) -> Self {
        Self { db, catalog }
    }

    /// Tables known to the catalog.
    pub async fn list_tables(&self) -> Result<Vec<String>, RefreshError> {
        Ok(self.catalog.list_tables().await?)
    }

    /// When the stored descriptor of a table was last refreshed.
    pub async fn last_updated_at(
        &self,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>, RefreshError> {
        let row = tables::get(self.db.pool(), table).await?;
        Ok(row.map(|r| r.updated_at))
    }

    /// Describe the table in the catalog and upsert-replace its descriptor.
    #[instrument(skip(self), err)]
    pub async fn refresh_table(&self, table: &str) -> Result<(), RefreshError> {
        let desc = self.catalog.describe_table(table).await?;
        tables::upsert(self.db.pool(), &desc.name, &desc.columns, &desc.partitions).await?;

        info!("refreshed table {table}");
        Ok(())
    }

    /// Replace the stored partition stats of a table from a fresh data-file
    /// scan.
    #[instrument(skip(self), err)]
    pub async fn refresh_partitions(&self, table: &str) -> Result<usize, RefreshError> {
        let scan = self.catalog.scan_data_files(table).await?;
        let rows = projection::project_partitions(table, &scan);

        let mut tx = self.db.pool().begin().await?;
        partitions::replace_all(&mut tx, table, &rows).await?;
        tx.commit().await?;

        info!("refreshed {} partitions for table {table}", rows.len());
        Ok(rows.len())
    }

    /// Replace the stored snapshot history of a table.
    #[instrument(skip(self), err)]
    pub async fn refresh_snapshots(&self, table: &str) -> Result<usize, RefreshError> {
        let snapshots_info = self.catalog.list_snapshots(table).await?;

        let rows: Vec<SnapshotRow> = snapshots_info
            .into_iter()
            .map(|snapshot| SnapshotRow {
                table: table.to_string(),
                snapshot_id: snapshot.snapshot_id,
                parent_id: snapshot.parent_id,
                committed_at: DateTime::from_timestamp_millis(snapshot.timestamp_ms)
                    .unwrap_or(DateTime::UNIX_EPOCH),
                operation: if snapshot.operation.is_empty() {
                    "unknown".to_string()
                } else {
                    snapshot.operation
                },
                manifest_list: snapshot.manifest_list,
                summary: Json(snapshot.summary),
            })
            .collect();

        let mut tx = self.db.pool().begin().await?;
        snapshots::replace_all(&mut tx, table, &rows).await?;
        tx.commit().await?;

        info!("refreshed {} snapshots for table {table}", rows.len());
        Ok(rows.len())
    }

    /// Full refresh of one table: descriptor, then partitions, then
    /// snapshots. A step failure aborts the remaining steps; rows written by
    /// earlier steps stay in place and the next attempt replaces them.
    #[instrument(skip(self), err)]
    pub async fn refresh_table_full(&self, table: &str) -> Result<(), RefreshError> {
        self.refresh_table(table).await?;
        self.refresh_partitions(table).await?;
        self.refresh_snapshots(table).await?;
        Ok(())
    }

    /// Full refresh of every table the catalog lists. Fails on the first
    /// table that cannot be refreshed.
    #[instrument(skip(self), err)]
    pub async fn refresh_all(&self) -> Result<Vec<String>, RefreshError> {
        let tables = self.catalog.list_tables().await?;
        info!("starting full refresh for {} tables", tables.len());

        for table in &tables {
            self.refresh_table_full(table).await?;
        }

        info!("completed full refresh for {} tables", tables.len());
        Ok(tables)
    }
}
