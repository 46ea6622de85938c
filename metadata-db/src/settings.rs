//! Key-value settings with an update timestamp

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::Error;

/// Setting key holding the worker concurrency cap.
pub const TASK_CONCURRENCY: &str = "task_concurrency";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

pub async fn get<'c, E>(exe: E, key: &str) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
        .bind(key)
        .fetch_optional(exe)
        .await
}

/// Insert or update a setting, touching `updated_at`.
pub async fn set<'c, E>(exe: E, key: &str, value: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value, updated_at = now()
    "#};
    sqlx::query(query).bind(key).bind(value).execute(exe).await?;
    Ok(())
}

/// An integer setting. A missing key is `None`; a present but non-numeric
/// value is an error.
pub async fn get_int<'c, E>(exe: E, key: &str) -> Result<Option<i64>, Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let Some(value) = get(exe, key).await? else {
        return Ok(None);
    };

    value
        .trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| Error::InvalidSetting {
            key: key.to_string(),
            value,
        })
}
