//! Read-only gateway to the Iceberg catalog
//!
//! The gateway enumerates tables, describes schemas and partition specs,
//! lists snapshots, and walks the current snapshot's manifests for per-file
//! statistics. It never writes to the catalog.

pub mod rest;
pub mod types;

pub use rest::RestCatalogGateway;
pub use types::{
    DataFileInfo, DataFileScan, PartitionTransform, PartitionValue, SnapshotInfo, SpecField,
    TableDescriptor,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("table {0} not found in catalog")]
    TableNotFound(String),

    #[error("unknown partition transform: {0}")]
    UnknownTransform(String),

    #[error("could not find source field with id {source_id} for partition field {name}")]
    MissingSourceField { source_id: i32, name: String },

    #[error("invalid partition value for field {field}: {reason}")]
    InvalidPartitionValue { field: String, reason: String },

    #[error("catalog request failed: {0}")]
    Catalog(#[source] iceberg::Error),
}

impl CatalogError {
    /// Whether retrying the same call can reasonably succeed. Malformed
    /// metadata and unsupported specs are permanent; I/O against the catalog
    /// or the object store is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Catalog(e) => matches!(e.kind(), iceberg::ErrorKind::Unexpected),
            _ => false,
        }
    }
}

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Unqualified names of all tables in the configured database.
    async fn list_tables(&self) -> Result<Vec<String>, CatalogError>;

    /// Schema and logical partition levels of a table.
    ///
    /// Fails permanently with [`CatalogError::UnknownTransform`] when the
    /// partition spec uses a transform other than identity, `day`, `month` or
    /// `year`.
    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, CatalogError>;

    async fn list_snapshots(&self, table: &str) -> Result<Vec<SnapshotInfo>, CatalogError>;

    /// Per-data-file statistics of the current snapshot, with the raw
    /// partition tuple keyed by partition field id.
    async fn scan_data_files(&self, table: &str) -> Result<DataFileScan, CatalogError>;
}
