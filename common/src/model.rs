//! Logical table model shared between the catalog gateway, the metadata
//! store, and the task engine.

use serde::{Deserialize, Serialize};

/// A column of an Iceberg table, with its type rendered as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Time granularity of a hidden partition level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Year,
    Month,
    Day,
}

/// Source of a hidden partition level: the column the time transform is
/// applied to and the transform granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenLevel {
    pub column: String,
    #[serde(rename = "type")]
    pub unit: TimeUnit,
}

/// A logical partition level of a table.
///
/// Identity transforms yield a single non-hidden level named after the source
/// column. Time transforms expand into hidden `year`/`month`/`day` levels over
/// the same source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLevel {
    pub name: String,
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<HiddenLevel>,
}

impl PartitionLevel {
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_hidden: false,
            hidden: None,
        }
    }

    pub fn hidden(name: impl Into<String>, column: impl Into<String>, unit: TimeUnit) -> Self {
        Self {
            name: name.into(),
            is_hidden: true,
            hidden: Some(HiddenLevel {
                column: column.into(),
                unit,
            }),
        }
    }
}

/// The column to build day predicates against: the first hidden level derived
/// from a `day` transform.
pub fn day_partition_column(levels: &[PartitionLevel]) -> Option<&str> {
    levels.iter().find_map(|level| match &level.hidden {
        Some(hidden) if level.is_hidden && hidden.unit == TimeUnit::Day => {
            Some(hidden.column.as_str())
        }
        _ => None,
    })
}
