//! Projection of raw data-file statistics into per-partition rows
//!
//! Pure functions: the catalog gateway supplies the partition spec and the
//! per-file stats, this module derives logical partition keys and aggregates.

use std::collections::{BTreeMap, HashMap};

use catalog_client::{DataFileScan, PartitionTransform, PartitionValue, SpecField};
use chrono::DateTime;
use metadata_db::partitions::{PartitionKey, PartitionRow};
use serde_json::json;
use sqlx::types::Json;

/// A partition needs compaction when any of its data files is smaller than
/// this.
pub const SMALL_FILE_THRESHOLD_BYTES: i64 = 128 * 1024 * 1024;

/// Derive the logical partition key of one data file from its raw partition
/// tuple.
///
/// Identity values are stored under the source column name. Time-transform
/// values expand into zero-padded `year`/`month`/`day` entries according to
/// the transform granularity. Partition fields the spec does not know keep a
/// positional `field_<id>` fallback name.
pub fn normalize_partition(
    spec: &[SpecField],
    raw: &HashMap<i32, PartitionValue>,
) -> PartitionKey {
    let fields_by_id: HashMap<i32, &SpecField> =
        spec.iter().map(|field| (field.field_id, field)).collect();

    let mut normalized = PartitionKey::new();
    for (field_id, value) in raw {
        let Some(field) = fields_by_id.get(field_id) else {
            normalized.insert(format!("field_{field_id}"), render_value(value));
            continue;
        };

        match (field.transform, value) {
            (PartitionTransform::Day, PartitionValue::Date(date)) => {
                normalized.insert("year".to_string(), json!(date.format("%Y").to_string()));
                normalized.insert("month".to_string(), json!(date.format("%m").to_string()));
                normalized.insert("day".to_string(), json!(date.format("%d").to_string()));
            }
            (PartitionTransform::Month, PartitionValue::Date(date)) => {
                normalized.insert("year".to_string(), json!(date.format("%Y").to_string()));
                normalized.insert("month".to_string(), json!(date.format("%m").to_string()));
            }
            (PartitionTransform::Year, PartitionValue::Date(date)) => {
                normalized.insert("year".to_string(), json!(date.format("%Y").to_string()));
            }
            (_, value) => {
                normalized.insert(field.source_column.clone(), render_value(value));
            }
        }
    }

    normalized
}

fn render_value(value: &PartitionValue) -> serde_json::Value {
    match value {
        PartitionValue::Date(date) => json!(date.format("%Y-%m-%d").to_string()),
        PartitionValue::Value(v) => v.clone(),
    }
}

struct FileAccumulator {
    partition: PartitionKey,
    spec_id: i32,
    record_count: i64,
    file_count: i64,
    total_data_file_size_in_bytes: i64,
    needs_optimize_count: i64,
}

/// Aggregate the scanned data files of `table` into stored partition rows.
///
/// Files sharing a normalized partition key are summed; `needs_optimize_count`
/// counts files below [`SMALL_FILE_THRESHOLD_BYTES`]. A table without a
/// current snapshot projects to no rows.
pub fn project_partitions(table: &str, scan: &DataFileScan) -> Vec<PartitionRow> {
    let Some(snapshot) = &scan.snapshot else {
        return Vec::new();
    };

    let last_updated_at = DateTime::from_timestamp_millis(snapshot.timestamp_ms)
        .unwrap_or(DateTime::UNIX_EPOCH);

    let mut groups: BTreeMap<Vec<(String, String)>, FileAccumulator> = BTreeMap::new();
    for file in &scan.files {
        let partition = normalize_partition(&scan.spec, &file.partition);
        let group_key: Vec<(String, String)> = partition
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();

        let acc = groups.entry(group_key).or_insert_with(|| FileAccumulator {
            partition,
            spec_id: file.spec_id,
            record_count: 0,
            file_count: 0,
            total_data_file_size_in_bytes: 0,
            needs_optimize_count: 0,
        });

        acc.record_count += file.record_count;
        acc.file_count += 1;
        acc.total_data_file_size_in_bytes += file.file_size_bytes;
        if file.file_size_bytes < SMALL_FILE_THRESHOLD_BYTES {
            acc.needs_optimize_count += 1;
        }
    }

    groups
        .into_values()
        .map(|acc| PartitionRow {
            table: table.to_string(),
            partition: Json(acc.partition),
            spec_id: acc.spec_id,
            record_count: acc.record_count,
            file_count: acc.file_count,
            total_data_file_size_in_bytes: acc.total_data_file_size_in_bytes,
            needs_optimize: acc.needs_optimize_count > 0,
            needs_optimize_count: acc.needs_optimize_count,
            last_updated_at,
            last_updated_snapshot_id: snapshot.snapshot_id,
        })
        .collect()
}
