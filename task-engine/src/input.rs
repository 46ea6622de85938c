//! Typed task inputs
//!
//! Tasks carry dynamically-typed `input` maps at the database boundary. These
//! are the in-process shapes: the planner serializes them at enqueue, the
//! worker parses them back at dispatch.

use common::FlexDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireSnapshotsInput {
    pub retention_days: i64,
    pub retain_last: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveOrphanFilesInput {
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeInput {
    pub file_size_threshold_mb: i64,
    pub from: FlexDateTime,
    pub to: FlexDateTime,
}
