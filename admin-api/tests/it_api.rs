//! End-to-end API tests against a real metadata database

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use catalog_client::{
    CatalogError, CatalogGateway, DataFileInfo, DataFileScan, PartitionTransform, PartitionValue,
    SnapshotInfo, SpecField, TableDescriptor,
};
use chrono::NaiveDate;
use common::model::{PartitionLevel, TableColumn, TimeUnit};
use metadata_db::{test_utils::connect_with_retry, MetadataDb};
use pgtemp::PgTempDB;
use refresh::RefreshService;
use serde_json::{json, Value as JsonValue};
use task_engine::{TaskPlanner, WorkerGate};
use tokio::sync::broadcast;

const SMALL_FILE: i64 = 1024;
const LARGE_FILE: i64 = 512 * 1024 * 1024;

struct FakeCatalog {
    tables: Vec<String>,
    descriptors: HashMap<String, TableDescriptor>,
    scans: HashMap<String, DataFileScan>,
    snapshots: HashMap<String, Vec<SnapshotInfo>>,
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
        Ok(self
            .scans
            .get(table)
            .cloned()
            .unwrap_or_else(DataFileScan::empty))
    }
}

fn day_spec() -> Vec<SpecField> {
    vec![SpecField {
        field_id: 1000,
        source_column: "event_time".to_string(),
        transform: PartitionTransform::Day,
    }]
}

fn day_file(date: NaiveDate, size: i64) -> DataFileInfo {
    DataFileInfo {
        partition: HashMap::from([(1000, PartitionValue::Date(date))]),
        spec_id: 0,
        record_count: 100,
        file_size_bytes: size,
    }
}

fn snapshot(id: i64) -> SnapshotInfo {
    SnapshotInfo {
        snapshot_id: id,
        parent_id: None,
        timestamp_ms: 1_767_312_000_000,
        operation: "append".to_string(),
        manifest_list: format!("s3://bucket/meta/snap-{id}.avro"),
        summary: BTreeMap::from([("added-data-files".to_string(), "2".to_string())]),
    }
}

/// One `events` table, day-partitioned on `event_time`, with small files on
/// Jan 2 and Jan 5 and healthy files on Jan 10.
fn events_catalog() -> FakeCatalog {
    let descriptor = TableDescriptor {
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
    };

    let scan = DataFileScan {
        spec: day_spec(),
        snapshot: Some(snapshot(77)),
        files: vec![
            day_file(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), SMALL_FILE),
            day_file(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), LARGE_FILE),
            day_file(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), SMALL_FILE),
            day_file(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(), LARGE_FILE),
        ],
    };

    FakeCatalog {
        tables: vec!["events".to_string()],
        descriptors: HashMap::from([("events".to_string(), descriptor)]),
        scans: HashMap::from([("events".to_string(), scan)]),
        snapshots: HashMap::from([("events".to_string(), vec![snapshot(77)])]),
    }
}

struct TestApi {
    base_url: String,
    client: reqwest::Client,
    gate: WorkerGate,
    _shutdown: broadcast::Sender<()>,
    _temp_db: PgTempDB,
}

impl TestApi {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn start_api() -> TestApi {
    let temp_db = PgTempDB::new();
    let db: MetadataDb = connect_with_retry(&temp_db.connection_uri())
        .await
        .expect("Failed to connect to metadata db");

    let catalog: Arc<dyn CatalogGateway> = Arc::new(events_catalog());
    let refresh = Arc::new(RefreshService::new(db.clone(), catalog));
    let gate = WorkerGate::new(1);

    let state = admin_api::ServiceState {
        planner: TaskPlanner::new(db.clone()),
        db,
        refresh,
        gate: gate.clone(),
        default_worker_count: 1,
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (addr, serve) = admin_api::serve(([127, 0, 0, 1], 0).into(), state, shutdown_rx)
        .await
        .expect("Failed to bind API server");
    tokio::spawn(serve);

    TestApi {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        gate,
        _shutdown: shutdown_tx,
        _temp_db: temp_db,
    }
}

async fn refresh_events(api: &TestApi) {
    let response = api
        .client
        .get(api.url("/api/refresh/table?table=events"))
        .send()
        .await
        .expect("refresh request failed");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn optimize_fans_out_per_flagged_partition() {
    let api = start_api().await;
    refresh_events(&api).await;

    let response = api
        .client
        .post(api.url("/api/tasks/events/optimize"))
        .json(&json!({
            "file_size_threshold_mb": 128,
            "from": "2026-01-01",
            "to": "2026-01-31",
        }))
        .send()
        .await
        .expect("optimize request failed");
    assert!(response.status().is_success());

    let body: JsonValue = response.json().await.expect("invalid json");
    assert_eq!(body["status"], "queued");
    let task_ids = body["task_ids"].as_array().expect("task_ids array");
    assert_eq!(task_ids.len(), 2);
    assert!(task_ids[0].as_i64() < task_ids[1].as_i64());

    // The two tasks cover Jan 2 and Jan 5 with single-day windows.
    let tasks: JsonValue = api
        .client
        .get(api.url("/api/tasks?table=events&kind=optimize"))
        .send()
        .await
        .expect("list request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(tasks["total"], 2);

    let mut windows: Vec<(String, String)> = tasks["items"]
        .as_array()
        .expect("items array")
        .iter()
        .map(|item| {
            (
                item["input"]["from"].as_str().expect("from").to_string(),
                item["input"]["to"].as_str().expect("to").to_string(),
            )
        })
        .collect();
    windows.sort();
    assert_eq!(
        windows,
        vec![
            (
                "2026-01-02T00:00:00Z".to_string(),
                "2026-01-02T00:00:00Z".to_string()
            ),
            (
                "2026-01-05T00:00:00Z".to_string(),
                "2026-01-05T00:00:00Z".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn optimize_with_no_matches_returns_empty_id_list() {
    let api = start_api().await;
    refresh_events(&api).await;

    let response = api
        .client
        .post(api.url("/api/tasks/events/optimize"))
        .json(&json!({
            "file_size_threshold_mb": 128,
            "from": "2027-01-01",
            "to": "2027-01-31",
        }))
        .send()
        .await
        .expect("optimize request failed");
    assert!(response.status().is_success());

    let body: JsonValue = response.json().await.expect("invalid json");
    assert_eq!(body["status"], "queued");
    assert_eq!(body["task_ids"], json!([]));
}

#[tokio::test]
async fn optimize_rejects_missing_dates() {
    let api = start_api().await;

    let response = api
        .client
        .post(api.url("/api/tasks/events/optimize"))
        .json(&json!({"file_size_threshold_mb": 128}))
        .send()
        .await
        .expect("optimize request failed");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: JsonValue = response.json().await.expect("invalid json");
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("from and to dates are required"));
}

#[tokio::test]
async fn expire_snapshots_clamps_request_values() {
    let api = start_api().await;

    let response = api
        .client
        .post(api.url("/api/tasks/events/expire-snapshots"))
        .json(&json!({"retention_days": 3, "retain_last": 2}))
        .send()
        .await
        .expect("expire request failed");
    assert!(response.status().is_success());

    let body: JsonValue = response.json().await.expect("invalid json");
    assert_eq!(body["status"], "queued");

    let tasks: JsonValue = api
        .client
        .get(api.url("/api/tasks?table=events"))
        .send()
        .await
        .expect("list request failed")
        .json()
        .await
        .expect("invalid json");
    let input = &tasks["items"][0]["input"];
    assert_eq!(input["retention_days"], 7);
    assert_eq!(input["retain_last"], 10);
}

#[tokio::test]
async fn task_counts_and_flush() {
    let api = start_api().await;

    for _ in 0..3 {
        let response = api
            .client
            .post(api.url("/api/tasks/events/remove-orphan-files"))
            .json(&json!({"retention_days": 14}))
            .send()
            .await
            .expect("enqueue request failed");
        assert!(response.status().is_success());
    }

    let counts: JsonValue = api
        .client
        .get(api.url("/api/tasks/counts"))
        .send()
        .await
        .expect("counts request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(counts, json!({"running": 0, "queued": 3}));

    let flushed: JsonValue = api
        .client
        .delete(api.url("/api/tasks"))
        .send()
        .await
        .expect("flush request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(flushed, json!({"deleted": 3}));

    let counts: JsonValue = api
        .client
        .get(api.url("/api/tasks/counts"))
        .send()
        .await
        .expect("counts request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(counts, json!({"running": 0, "queued": 0}));
}

#[tokio::test]
async fn task_concurrency_setting_resizes_the_gate() {
    let api = start_api().await;

    // Default from configuration when no setting is stored.
    let value: JsonValue = api
        .client
        .get(api.url("/api/settings/task-concurrency"))
        .send()
        .await
        .expect("get request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(value, json!({"value": 1}));

    let response = api
        .client
        .put(api.url("/api/settings/task-concurrency"))
        .json(&json!({"value": 3}))
        .send()
        .await
        .expect("put request failed");
    assert!(response.status().is_success());
    assert_eq!(api.gate.capacity(), 3);

    let value: JsonValue = api
        .client
        .get(api.url("/api/settings/task-concurrency"))
        .send()
        .await
        .expect("get request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(value, json!({"value": 3}));

    // Zero is rejected and leaves the gate untouched.
    let response = api
        .client
        .put(api.url("/api/settings/task-concurrency"))
        .json(&json!({"value": 0}))
        .send()
        .await
        .expect("put request failed");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(api.gate.capacity(), 3);
}

#[tokio::test]
async fn browse_flow_after_refresh() {
    let api = start_api().await;
    refresh_events(&api).await;

    let body: JsonValue = api
        .client
        .get(api.url("/api/browse/tables"))
        .send()
        .await
        .expect("browse request failed")
        .json()
        .await
        .expect("invalid json");
    let tables = body["tables"].as_array().expect("tables array");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0]["name"], "events");
    assert_eq!(tables[0]["partition_count"], 3);
    assert_eq!(tables[0]["file_count"], 4);
    assert_eq!(tables[0]["snapshot_count"], 1);

    let summary: JsonValue = api
        .client
        .get(api.url("/api/browse/events"))
        .send()
        .await
        .expect("summary request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(summary["name"], "events");
    assert_eq!(summary["partitions"].as_array().expect("levels").len(), 3);

    // Drill down: top level groups by year, then by month under 2026.
    let years: JsonValue = api
        .client
        .post(api.url("/api/browse/events/partitions"))
        .json(&json!({"partitions": {}}))
        .send()
        .await
        .expect("drill-down request failed")
        .json()
        .await
        .expect("invalid json");
    let groups = years["partitions"].as_array().expect("groups array");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["name"], "2026");
    assert_eq!(groups[0]["needs_optimize"], true);

    let days: JsonValue = api
        .client
        .post(api.url("/api/browse/events/partitions"))
        .json(&json!({"partitions": {"year": "2026", "month": "01"}}))
        .send()
        .await
        .expect("drill-down request failed")
        .json()
        .await
        .expect("invalid json");
    let groups = days["partitions"].as_array().expect("groups array");
    let names: Vec<&str> = groups
        .iter()
        .map(|g| g["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, ["02", "05", "10"]);
    assert_eq!(groups[0]["needs_optimize"], true);
    assert_eq!(groups[2]["needs_optimize"], false);
}

#[tokio::test]
async fn browse_unknown_table_is_not_found() {
    let api = start_api().await;

    let response = api
        .client
        .get(api.url("/api/browse/nope"))
        .send()
        .await
        .expect("browse request failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: JsonValue = response.json().await.expect("invalid json");
    assert!(body["error"].as_str().expect("error message").contains("nope"));
}

#[tokio::test]
async fn metadata_endpoints_return_stored_rows() {
    let api = start_api().await;
    refresh_events(&api).await;

    let snapshots: JsonValue = api
        .client
        .get(api.url("/api/metadata/snapshots?table=events"))
        .send()
        .await
        .expect("snapshots request failed")
        .json()
        .await
        .expect("invalid json");
    let rows = snapshots.as_array().expect("snapshot rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["snapshot_id"], 77);
    assert_eq!(rows[0]["operation"], "append");

    let partitions: JsonValue = api
        .client
        .get(api.url("/api/metadata/partitions?table=events"))
        .send()
        .await
        .expect("partitions request failed")
        .json()
        .await
        .expect("invalid json");
    let rows = partitions.as_array().expect("partition rows");
    assert_eq!(rows.len(), 3);

    let missing = api
        .client
        .get(api.url("/api/metadata/partitions"))
        .send()
        .await
        .expect("partitions request failed");
    assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);
}
