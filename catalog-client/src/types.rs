//! Gateway-side projections of catalog metadata

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use common::model::{PartitionLevel, TableColumn, TimeUnit};
use serde_json::Value as JsonValue;

/// Schema and partition structure of a table, as described by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<TableColumn>,
    pub partitions: Vec<PartitionLevel>,
}

/// The partition transforms this system understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTransform {
    Identity,
    Year,
    Month,
    Day,
}

/// One field of a partition spec, resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecField {
    pub field_id: i32,
    pub source_column: String,
    pub transform: PartitionTransform,
}

/// Expand spec fields into the logical partition levels used for navigation.
///
/// A `day` transform contributes hidden `year`/`month`/`day` levels over its
/// source column, `month` contributes `year`/`month`, `year` contributes
/// `year`. Identity transforms contribute a single non-hidden level named
/// after the source column.
pub fn expand_partition_levels(fields: &[SpecField]) -> Vec<PartitionLevel> {
    let mut levels = Vec::new();
    for field in fields {
        match field.transform {
            PartitionTransform::Identity => {
                levels.push(PartitionLevel::identity(&field.source_column));
            }
            PartitionTransform::Day => {
                for name in ["year", "month", "day"] {
                    levels.push(PartitionLevel::hidden(name, &field.source_column, TimeUnit::Day));
                }
            }
            PartitionTransform::Month => {
                for name in ["year", "month"] {
                    levels.push(PartitionLevel::hidden(
                        name,
                        &field.source_column,
                        TimeUnit::Month,
                    ));
                }
            }
            PartitionTransform::Year => {
                levels.push(PartitionLevel::hidden(
                    "year",
                    &field.source_column,
                    TimeUnit::Year,
                ));
            }
        }
    }
    levels
}

/// A raw partition value as reported for a data file.
///
/// Time-transform fields arrive as the calendar date the transform resolves
/// to; identity fields keep their literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionValue {
    Date(NaiveDate),
    Value(JsonValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFileInfo {
    /// Raw partition tuple, keyed by partition field id.
    pub partition: HashMap<i32, PartitionValue>,
    pub spec_id: i32,
    pub record_count: i64,
    pub file_size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub snapshot_id: i64,
    pub parent_id: Option<i64>,
    pub timestamp_ms: i64,
    pub operation: String,
    pub manifest_list: String,
    pub summary: BTreeMap<String, String>,
}

/// Everything needed to project partition stats for one table: the partition
/// spec, the current snapshot, and the per-file statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFileScan {
    pub spec: Vec<SpecField>,
    pub snapshot: Option<SnapshotInfo>,
    pub files: Vec<DataFileInfo>,
}

impl DataFileScan {
    pub fn empty() -> Self {
        Self {
            spec: Vec::new(),
            snapshot: None,
            files: Vec::new(),
        }
    }
}

const UNIX_EPOCH_YEAR: i32 = 1970;

/// Resolve a `day`-transform value (days since the Unix epoch).
pub fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(UNIX_EPOCH_YEAR, 1, 1)?
        .checked_add_signed(chrono::Duration::days(days as i64))
}

/// Resolve a `month`-transform value (months since the Unix epoch) to the
/// first day of that month.
pub fn date_from_epoch_months(months: i32) -> Option<NaiveDate> {
    let year = UNIX_EPOCH_YEAR + months.div_euclid(12);
    let month = months.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Resolve a `year`-transform value (years since the Unix epoch) to the first
/// day of that year.
pub fn date_from_epoch_years(years: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(UNIX_EPOCH_YEAR + years, 1, 1)
}
