//! Stored per-partition statistics

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{
    types::{Json, JsonValue},
    Executor, PgConnection, Postgres, QueryBuilder,
};

/// Mapping from logical partition level name to value, e.g.
/// `{"year": "2026", "month": "01", "day": "02"}`.
pub type PartitionKey = BTreeMap<String, JsonValue>;

/// Rows are replaced wholesale by refresh; chunked to keep statements bounded.
const INSERT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct PartitionRow {
    pub table: String,
    pub partition: Json<PartitionKey>,
    pub spec_id: i32,
    pub record_count: i64,
    pub file_count: i64,
    pub total_data_file_size_in_bytes: i64,
    pub needs_optimize: bool,
    pub needs_optimize_count: i64,
    pub last_updated_at: DateTime<Utc>,
    pub last_updated_snapshot_id: i64,
}

/// Replace the full partition set for a table: delete, then chunked insert.
pub async fn replace_all(
    conn: &mut PgConnection,
    table: &str,
    rows: &[PartitionRow],
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM partitions WHERE "table" = $1"#)
        .bind(table)
        .execute(&mut *conn)
        .await?;

    for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
        let mut qb = QueryBuilder::new(indoc::indoc! {r#"
            INSERT INTO partitions
                ("table", partition, spec_id, record_count, file_count,
                 total_data_file_size_in_bytes, needs_optimize, needs_optimize_count,
                 last_updated_at, last_updated_snapshot_id)
        "#});
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.table)
                .push_bind(&row.partition)
                .push_bind(row.spec_id)
                .push_bind(row.record_count)
                .push_bind(row.file_count)
                .push_bind(row.total_data_file_size_in_bytes)
                .push_bind(row.needs_optimize)
                .push_bind(row.needs_optimize_count)
                .push_bind(row.last_updated_at)
                .push_bind(row.last_updated_snapshot_id);
        });
        qb.build().execute(&mut *conn).await?;
    }

    Ok(())
}

pub async fn list_for_table<'c, E>(exe: E, table: &str) -> Result<Vec<PartitionRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT
            "table", partition, spec_id, record_count, file_count,
            total_data_file_size_in_bytes, needs_optimize, needs_optimize_count,
            last_updated_at, last_updated_snapshot_id
        FROM partitions
        WHERE "table" = $1
        ORDER BY partition ASC
    "#};
    sqlx::query_as(query).bind(table).fetch_all(exe).await
}

/// Aggregate totals over all partitions of a table.
#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct PartitionRollup {
    pub partition_count: i64,
    pub file_count: i64,
    pub record_count: i64,
    pub total_data_file_size_in_bytes: i64,
}

pub async fn rollup<'c, E>(exe: E, table: &str) -> Result<PartitionRollup, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT
            COUNT(*) AS partition_count,
            COALESCE(SUM(file_count), 0)::BIGINT AS file_count,
            COALESCE(SUM(record_count), 0)::BIGINT AS record_count,
            COALESCE(SUM(total_data_file_size_in_bytes), 0)::BIGINT AS total_data_file_size_in_bytes
        FROM partitions
        WHERE "table" = $1
    "#};
    sqlx::query_as(query).bind(table).fetch_one(exe).await
}

/// One group in a partition drill-down, aggregated over the matching rows.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct DrillDownRow {
    pub name: Option<String>,
    pub file_count: i64,
    pub record_count: i64,
    pub total_data_file_size_in_bytes: i64,
    pub needs_optimize: bool,
    pub needs_optimize_count: i64,
}

/// Group the stored partitions of `table` on the JSON path `group_level`,
/// restricted to rows matching all `selected` level values.
///
/// `needs_optimize_count` here is the number of flagged partitions inside the
/// group, for navigation badges.
pub async fn drill_down<'c, E>(
    exe: E,
    table: &str,
    group_level: &str,
    selected: &BTreeMap<String, String>,
) -> Result<Vec<DrillDownRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new("SELECT partition->>");
    qb.push_bind(group_level);
    qb.push(indoc::indoc! {r#"
        ::TEXT AS name,
            COALESCE(SUM(file_count), 0)::BIGINT AS file_count,
            COALESCE(SUM(record_count), 0)::BIGINT AS record_count,
            COALESCE(SUM(total_data_file_size_in_bytes), 0)::BIGINT AS total_data_file_size_in_bytes,
            BOOL_OR(needs_optimize) AS needs_optimize,
            COUNT(*) FILTER (WHERE needs_optimize)::BIGINT AS needs_optimize_count
        FROM partitions
        WHERE "table" =
    "#});
    qb.push_bind(table);
    for (level, value) in selected {
        qb.push(" AND partition->>");
        qb.push_bind(level);
        qb.push("::TEXT = ");
        qb.push_bind(value);
    }
    qb.push(" GROUP BY 1 ORDER BY 1 ASC");

    qb.build_query_as().fetch_all(exe).await
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PartitionDate {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// Partitions of `table` flagged for compaction whose calendar date falls in
/// `[from, to]` (both `%Y-%m-%d` strings), ascending by date.
///
/// The date is derived from the partition JSON; LPAD keeps un-padded
/// month/day values from older rows comparable as strings.
pub async fn needs_optimize_dates<'c, E>(
    exe: E,
    table: &str,
    from: &str,
    to: &str,
) -> Result<Vec<PartitionDate>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT
            partition->>'year' AS year,
            partition->>'month' AS month,
            partition->>'day' AS day
        FROM partitions
        WHERE "table" = $1
          AND needs_optimize
          AND (partition->>'year') || '-' || LPAD(partition->>'month', 2, '0') || '-' || LPAD(partition->>'day', 2, '0') >= $2
          AND (partition->>'year') || '-' || LPAD(partition->>'month', 2, '0') || '-' || LPAD(partition->>'day', 2, '0') <= $3
        ORDER BY (partition->>'year') || '-' || LPAD(partition->>'month', 2, '0') || '-' || LPAD(partition->>'day', 2, '0') ASC
    "#};
    sqlx::query_as(query)
        .bind(table)
        .bind(from)
        .bind(to)
        .fetch_all(exe)
        .await
}
