//! Stored snapshot history

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, Executor, PgConnection, Postgres, QueryBuilder};

const INSERT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct SnapshotRow {
    pub table: String,
    pub snapshot_id: i64,
    pub parent_id: Option<i64>,
    pub committed_at: DateTime<Utc>,
    pub operation: String,
    pub manifest_list: String,
    pub summary: Json<BTreeMap<String, String>>,
}

/// Replace the full snapshot set for a table: delete, then chunked insert.
pub async fn replace_all(
    conn: &mut PgConnection,
    table: &str,
    rows: &[SnapshotRow],
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM snapshots WHERE "table" = $1"#)
        .bind(table)
        .execute(&mut *conn)
        .await?;

    for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
        let mut qb = QueryBuilder::new(indoc::indoc! {r#"
            INSERT INTO snapshots
                ("table", snapshot_id, parent_id, committed_at, operation, manifest_list, summary)
        "#});
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.table)
                .push_bind(row.snapshot_id)
                .push_bind(row.parent_id)
                .push_bind(row.committed_at)
                .push_bind(&row.operation)
                .push_bind(&row.manifest_list)
                .push_bind(&row.summary);
        });
        qb.build().execute(&mut *conn).await?;
    }

    Ok(())
}

pub async fn list_for_table<'c, E>(exe: E, table: &str) -> Result<Vec<SnapshotRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT "table", snapshot_id, parent_id, committed_at, operation, manifest_list, summary
        FROM snapshots
        WHERE "table" = $1
        ORDER BY committed_at DESC
    "#};
    sqlx::query_as(query).bind(table).fetch_all(exe).await
}

pub async fn count_for_table<'c, E>(exe: E, table: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM snapshots WHERE "table" = $1"#)
        .bind(table)
        .fetch_one(exe)
        .await
}
