//! In-tree DB integration tests for snapshot history

use std::collections::BTreeMap;

use chrono::{TimeZone as _, Utc};
use pgtemp::PgTempDB;
use sqlx::types::Json;

use crate::{
    snapshots::{self, SnapshotRow},
    test_utils::connect_with_retry,
};

fn snapshot(table: &str, id: i64, parent: Option<i64>, day: u32) -> SnapshotRow {
    SnapshotRow {
        table: table.to_string(),
        snapshot_id: id,
        parent_id: parent,
        committed_at: Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap(),
        operation: "append".to_string(),
        manifest_list: format!("s3://bucket/meta/snap-{id}.avro"),
        summary: Json(BTreeMap::from([(
            "added-data-files".to_string(),
            "3".to_string(),
        )])),
    }
}

#[tokio::test]
async fn replace_all_round_trips_newest_first() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect_with_retry(&temp_db.connection_uri())
        .await
        .expect("Failed to connect to metadata db");

    let rows = vec![
        snapshot("events", 100, None, 1),
        snapshot("events", 101, Some(100), 2),
        snapshot("events", 102, Some(101), 3),
    ];

    //* When
    let mut tx = db.pool().begin().await.expect("Failed to begin tx");
    snapshots::replace_all(&mut tx, "events", &rows)
        .await
        .expect("Failed to replace snapshots");
    tx.commit().await.expect("Failed to commit tx");

    //* Then
    let stored = snapshots::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list snapshots");
    let ids: Vec<i64> = stored.iter().map(|s| s.snapshot_id).collect();
    assert_eq!(ids, [102, 101, 100]);
    assert_eq!(stored[2].parent_id, None);
    assert_eq!(stored[0].parent_id, Some(101));

    let count = snapshots::count_for_table(db.pool(), "events")
        .await
        .expect("Failed to count snapshots");
    assert_eq!(count, 3);
}

#[tokio::test]
async fn replace_all_drops_expired_snapshots() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect_with_retry(&temp_db.connection_uri())
        .await
        .expect("Failed to connect to metadata db");

    let mut tx = db.pool().begin().await.expect("Failed to begin tx");
    snapshots::replace_all(
        &mut tx,
        "events",
        &[snapshot("events", 100, None, 1), snapshot("events", 101, Some(100), 2)],
    )
    .await
    .expect("Failed to replace snapshots");
    tx.commit().await.expect("Failed to commit tx");

    //* When
    // After expiration only the newest snapshot remains in the catalog.
    let mut tx = db.pool().begin().await.expect("Failed to begin tx");
    snapshots::replace_all(&mut tx, "events", &[snapshot("events", 101, Some(100), 2)])
        .await
        .expect("Failed to replace snapshots");
    tx.commit().await.expect("Failed to commit tx");

    //* Then
    let stored = snapshots::list_for_table(db.pool(), "events")
        .await
        .expect("Failed to list snapshots");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].snapshot_id, 101);
}
