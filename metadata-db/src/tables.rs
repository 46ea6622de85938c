//! Stored table descriptors

use chrono::{DateTime, Utc};
use common::model::{PartitionLevel, TableColumn};
use sqlx::{types::Json, Executor, Postgres};

/// A table descriptor as projected from the catalog.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TableRow {
    pub name: String,
    pub columns: Json<Vec<TableColumn>>,
    pub partitions: Json<Vec<PartitionLevel>>,
    pub updated_at: DateTime<Utc>,
}

/// Insert or replace the descriptor for a table, touching `updated_at`.
pub async fn upsert<'c, E>(
    exe: E,
    name: &str,
    columns: &[TableColumn],
    partitions: &[PartitionLevel],
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO tables (name, columns, partitions, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (name) DO UPDATE
        SET columns = EXCLUDED.columns,
            partitions = EXCLUDED.partitions,
            updated_at = now()
    "#};
    sqlx::query(query)
        .bind(name)
        .bind(Json(columns))
        .bind(Json(partitions))
        .execute(exe)
        .await?;
    Ok(())
}

pub async fn get<'c, E>(exe: E, name: &str) -> Result<Option<TableRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT name, columns, partitions, updated_at
        FROM tables
        WHERE name = $1
    "#};
    sqlx::query_as(query).bind(name).fetch_optional(exe).await
}

pub async fn list<'c, E>(exe: E) -> Result<Vec<TableRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT name, columns, partitions, updated_at
        FROM tables
        ORDER BY name ASC
    "#};
    sqlx::query_as(query).fetch_all(exe).await
}
