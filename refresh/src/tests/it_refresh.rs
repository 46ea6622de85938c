//! In-tree DB integration tests for the refresh service

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use catalog_client::{
    CatalogError, CatalogGateway, DataFileInfo, DataFileScan, PartitionTransform, PartitionValue,
    SnapshotInfo, SpecField, TableDescriptor,
};
use chrono::NaiveDate;
use common::model::{PartitionLevel, TableColumn, TimeUnit};
use metadata_db::{partitions, snapshots, tables, test_utils::connect_with_retry, MetadataDb};
use pgtemp::PgTempDB;

use crate::{projection::SMALL_FILE_THRESHOLD_BYTES, RefreshService};

/// Gateway double serving canned catalog state.
#[derive(Default)]
struct FakeCatalog {
    tables: Vec<String>,
    descriptors: HashMap<String, TableDescriptor>,
    scans: HashMap<String, DataFileScan>,
    snapshots: HashMap<String, Vec<SnapshotInfo>>,
    fail_scans: bool,
}

#[async_trait]
impl CatalogGateway for FakeCatalog {
    async fn list_tables(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.tables.clone())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, CatalogError> {
        self.descriptors
            .get(table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    async fn list_snapshots(&self, table: &str) -> Result<Vec<SnapshotInfo>, CatalogError> {
        Ok(self.snapshots.get(table).cloned().unwrap_or_default())
    }

    async fn scan_data_files(&self, table: &str) -> Result<DataFileScan, CatalogError> {
        if self.fail_scans {
            return Err(CatalogError::TableNotFound(table.to_string()));
        }
        Ok(self.scans.get(table).cloned().unwrap_or_else(DataFileScan::empty))
    }
}

fn day_spec() -> Vec<SpecField> {
    vec![SpecField {
        field_id: 1000,
        source_column: "event_time".to_string(),
        transform: PartitionTransform::Day,
    }]
}

fn events_descriptor() -> TableDescriptor {
    TableDescriptor {
        name: "events".to_string(),
        columns: vec![
            TableColumn {
                name: "id".to_string(),
                column_type: "long".to_string(),
            },
            TableColumn {
                name: "event_time".to_string(),
                column_type: "timestamp".to_string(),
            },
        ],
        partitions: vec![
            PartitionLevel::hidden("year", "event_time", TimeUnit::Day),
            PartitionLevel::hidden("month", "event_time", TimeUnit::Day),
            PartitionLevel::hidden("day", "event_time", TimeUnit::Day),
        ],
    }
}

fn snapshot(id: i64, parent: Option<i64>, operation: &str) -> SnapshotInfo {
    SnapshotInfo {
        snapshot_id: id,
        parent_id: parent,
        timestamp_ms: 1_767_312_000_000 + id,
        operation: operation.to_string(),
        manifest_list: format!("s3://bucket/meta/snap-{id}.avro"),
        summary: BTreeMap::from([("added-data-files".to_string(), "1".to_string())]),
    }
}

fn day_file(date: NaiveDate, size: i64) -> DataFileInfo {
    DataFileInfo {
        partition: HashMap::from([(1000, PartitionValue::Date(date))]),
        spec_id: 0,
        record_count: 100,
        file_size_bytes: size,
    }
}

fn events_catalog() -> FakeCatalog {
    let scan = DataFileScan {
        spec: day_spec(),
        snapshot: Some(snapshot(77, None, "append")),
        files: vec![
            day_file(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), 1024),
            day_file(
                NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                SMALL_FILE_THRESHOLD_BYTES * 4,
            ),
            day_file(
                NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                SMALL_FILE_THRESHOLD_BYTES * 2,
            ),
        ],
    };

    FakeCatalog {
        tables: vec!["events".to_string()],
        descriptors: HashMap::from([("events".to_string(), events_descriptor())]),
        scans: HashMap::from([("events".to_string(), scan)]),
        snapshots: HashMap::from([(
            "events".to_string(),
            vec![snapshot(77, Some(76), "append"), snapshot(76, None, "")],
        )]),
        fail_scans: false,
    }
}

async fn temp_metadata_db(temp_db: &PgTempDB) -> MetadataDb {
    connect_with_retry(&temp_db.connection_uri())
        .await
        .expect("Failed to connect to metadata db")
}

#[tokio::test]
async fn full_refresh_materializes_all_three_subjects() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = temp_metadata_db(&temp_db).await;
    let service = RefreshService::new(db.clone(), Arc::new(events_catalog()));

    //* When
    service
        .refresh_table_full("events")
        .await
        .expect("Failed to refresh table");

    //* Then
    let table = tables::get(db.pool(), "events")
        .await
        .expect("Failed to get table")
        .expect("Table not found");
    assert_eq!(table.columns.0.len(), 2);
    assert_eq!(table.partitions.0.len(), 3);

    let stored = partitions::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list partitions");
    assert_eq!(stored.len(), 2);

    let jan2 = stored
        .iter()
        .find(|p| p.partition.0["day"] == serde_json::json!("02"))
        .expect("partition for Jan 2 should exist");
    assert_eq!(jan2.file_count, 2);
    assert!(jan2.needs_optimize);
    assert_eq!(jan2.needs_optimize_count, 1);
    assert_eq!(jan2.last_updated_snapshot_id, 77);

    let stored = snapshots::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list snapshots");
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn successive_refreshes_produce_equal_partition_sets() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = temp_metadata_db(&temp_db).await;
    let service = RefreshService::new(db.clone(), Arc::new(events_catalog()));

    //* When
    service
        .refresh_table_full("events")
        .await
        .expect("Failed to refresh table");
    let first = partitions::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list partitions");

    service
        .refresh_table_full("events")
        .await
        .expect("Failed to refresh table again");
    let second = partitions::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list partitions");

    //* Then
    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_snapshot_operation_is_coerced_to_unknown() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = temp_metadata_db(&temp_db).await;
    let service = RefreshService::new(db.clone(), Arc::new(events_catalog()));

    //* When
    service
        .refresh_snapshots("events")
        .await
        .expect("Failed to refresh snapshots");

    //* Then
    let stored = snapshots::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list snapshots");
    let oldest = stored
        .iter()
        .find(|s| s.snapshot_id == 76)
        .expect("snapshot 76 should exist");
    assert_eq!(oldest.operation, "unknown");
}

#[tokio::test]
async fn step_failure_keeps_rows_from_earlier_steps() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = temp_metadata_db(&temp_db).await;

    let mut catalog = events_catalog();
    catalog.fail_scans = true;
    let service = RefreshService::new(db.clone(), Arc::new(catalog));

    //* When
    let result = service.refresh_table_full("events").await;

    //* Then
    // The descriptor step committed before the partition step failed.
    assert!(result.is_err());
    let table = tables::get(db.pool(), "events")
        .await
        .expect("Failed to get table");
    assert!(table.is_some());
    let stored = partitions::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list partitions");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn refresh_all_covers_every_catalog_table() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = temp_metadata_db(&temp_db).await;

    let mut catalog = events_catalog();
    catalog.tables.push("sessions".to_string());
    catalog.descriptors.insert(
        "sessions".to_string(),
        TableDescriptor {
            name: "sessions".to_string(),
            columns: vec![TableColumn {
                name: "id".to_string(),
                column_type: "long".to_string(),
            }],
            partitions: vec![],
        },
    );
    let service = RefreshService::new(db.clone(), Arc::new(catalog));

    //* When
    let refreshed = service.refresh_all().await.expect("Failed to refresh all");

    //* Then
    assert_eq!(refreshed, ["events", "sessions"]);
    let all = tables::list(db.pool()).await.expect("Failed to list tables");
    assert_eq!(all.len(), 2);
}
