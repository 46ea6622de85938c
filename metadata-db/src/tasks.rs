//! Durable maintenance task queue
//!
//! Tasks move `queued -> running -> {success, error}` exactly once. The claim
//! protocol guarantees that at most one task per table is running at any
//! instant, across every process sharing the database: candidates exclude
//! tables with a running task, and the transition itself is an atomic
//! compare-and-set on `status`.

use chrono::{DateTime, Utc};
use sqlx::{types::JsonValue, Executor, Pool, Postgres};

/// A unique identifier for a task
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Convert the [`TaskId`] to an `i64`
    pub fn to_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current status of a task
///
/// Stored as a `TEXT` column. `success` and `error` are terminal; rows in a
/// terminal state are never updated again, only bulk-deleted by [`flush`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStatus {
    /// Enqueued, not yet picked up by a worker.
    #[default]
    Queued,

    /// Picked up by a worker and executing.
    Running,

    /// Finished without error. Terminal.
    Success,

    /// Finished with an error recorded in `error_message`. Terminal.
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            s if s.eq_ignore_ascii_case("queued") => Some(Self::Queued),
            s if s.eq_ignore_ascii_case("running") => Some(Self::Running),
            s if s.eq_ignore_ascii_case("success") => Some(Self::Success),
            s if s.eq_ignore_ascii_case("error") => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for TaskStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for TaskStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: &str = serde::Deserialize::deserialize(deserializer)?;
        TaskStatus::from_str(s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid task status: {s}")))
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("TEXT")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(
        value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let value: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
        TaskStatus::from_str(value).ok_or_else(|| format!("invalid task status: {value}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        sqlx::Encode::<sqlx::Postgres>::encode_by_ref(&self.as_str(), buf)
    }
}

/// The kind of maintenance a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ExpireSnapshots,
    RemoveOrphanFiles,
    Optimize,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpireSnapshots => "expire_snapshots",
            Self::RemoveOrphanFiles => "remove_orphan_files",
            Self::Optimize => "optimize",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "expire_snapshots" => Some(Self::ExpireSnapshots),
            "remove_orphan_files" => Some(Self::RemoveOrphanFiles),
            "optimize" => Some(Self::Optimize),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A maintenance task with its queue bookkeeping.
///
/// `kind` is kept as a string at this layer; the worker parses it and fails
/// the task on values it does not know.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Task {
    pub id: TaskId,

    pub table: String,

    pub kind: String,

    pub status: TaskStatus,

    /// Creation time, also the FIFO ordering key.
    pub started_at: DateTime<Utc>,

    pub picked_up_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,

    pub input: JsonValue,

    pub result: JsonValue,
}

const TASK_COLUMNS: &str = r#"id, "table", kind, status, started_at, picked_up_at, finished_at, error_message, input, result"#;

/// Bounded retry of the optimistic claim loop.
const CLAIM_ATTEMPTS: usize = 3;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Insert a new task with `status = 'queued'` and an empty result.
pub async fn enqueue<'c, E>(
    exe: E,
    table: &str,
    kind: TaskKind,
    input: &JsonValue,
) -> Result<TaskId, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO tasks ("table", kind, status, started_at, input, result)
        VALUES ($1, $2, 'queued', now(), $3, '{}'::jsonb)
        RETURNING id
    "#};
    sqlx::query_scalar(query)
        .bind(table)
        .bind(kind.as_str())
        .bind(input)
        .fetch_one(exe)
        .await
}

/// Claim the oldest queued task whose table has no running task.
///
/// Two concurrent claimants may pick the same candidate; the `UPDATE ... WHERE
/// status = 'queued'` decides the winner. The loser retries with a fresh
/// candidate, up to [`CLAIM_ATTEMPTS`] times, then reports an empty queue and
/// leaves the next poll tick to try again.
pub async fn claim(pool: &Pool<Postgres>) -> Result<Option<Task>, sqlx::Error> {
    let candidate_query = indoc::formatdoc! {r#"
        SELECT {columns}
        FROM tasks
        WHERE status = 'queued'
          AND "table" NOT IN (SELECT "table" FROM tasks WHERE status = 'running')
        ORDER BY started_at ASC, id ASC
        LIMIT 1
    "#, columns = TASK_COLUMNS};
    let claim_query = indoc::formatdoc! {r#"
        UPDATE tasks
        SET status = 'running', picked_up_at = now()
        WHERE id = $1 AND status = 'queued'
        RETURNING {columns}
    "#, columns = TASK_COLUMNS};

    for _ in 0..CLAIM_ATTEMPTS {
        let candidate: Option<Task> = sqlx::query_as(&candidate_query).fetch_optional(pool).await?;
        let Some(task) = candidate else {
            return Ok(None);
        };

        let claimed: Option<Task> = sqlx::query_as(&claim_query)
            .bind(task.id)
            .fetch_optional(pool)
            .await?;
        if claimed.is_some() {
            return Ok(claimed);
        }
        // Another claimant won the CAS between select and update. Retry.
    }

    Ok(None)
}

/// Move a task to its terminal state.
///
/// `error_message = None` means success. A flushed task no longer exists and
/// the update silently affects zero rows.
pub async fn complete<'c, E>(
    exe: E,
    id: TaskId,
    result: Option<&JsonValue>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let status = if error_message.is_none() {
        TaskStatus::Success
    } else {
        TaskStatus::Error
    };

    let query = indoc::indoc! {r#"
        UPDATE tasks
        SET finished_at = now(), status = $2, error_message = $3, result = COALESCE($4, '{}'::jsonb)
        WHERE id = $1
    "#};
    sqlx::query(query)
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(result)
        .execute(exe)
        .await?;
    Ok(())
}

pub async fn get<'c, E>(exe: E, id: TaskId) -> Result<Option<Task>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
    sqlx::query_as(&query).bind(id).fetch_optional(exe).await
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub table: Option<String>,
    pub kinds: Vec<String>,
    pub statuses: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

/// List tasks newest-first with the given filters.
///
/// Returns the page and the total count matching the same filters.
pub async fn list(pool: &Pool<Postgres>, filter: &TaskFilter) -> Result<(Vec<Task>, i64), sqlx::Error> {
    let limit = if filter.limit <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        filter.limit
    };
    let offset = filter.offset.max(0);

    let count_query = indoc::indoc! {r#"
        SELECT COUNT(*)
        FROM tasks
        WHERE ($1::TEXT IS NULL OR "table" = $1)
          AND (CARDINALITY($2::TEXT[]) = 0 OR kind = ANY($2))
          AND (CARDINALITY($3::TEXT[]) = 0 OR status = ANY($3))
    "#};
    let total: i64 = sqlx::query_scalar(count_query)
        .bind(&filter.table)
        .bind(&filter.kinds)
        .bind(&filter.statuses)
        .fetch_one(pool)
        .await?;

    let page_query = indoc::formatdoc! {r#"
        SELECT {columns}
        FROM tasks
        WHERE ($1::TEXT IS NULL OR "table" = $1)
          AND (CARDINALITY($2::TEXT[]) = 0 OR kind = ANY($2))
          AND (CARDINALITY($3::TEXT[]) = 0 OR status = ANY($3))
        ORDER BY started_at DESC, id DESC
        LIMIT $4 OFFSET $5
    "#, columns = TASK_COLUMNS};
    let items: Vec<Task> = sqlx::query_as(&page_query)
        .bind(&filter.table)
        .bind(&filter.kinds)
        .bind(&filter.statuses)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok((items, total))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    pub running: i64,
    pub queued: i64,
}

pub async fn counts<'c, E>(exe: E) -> Result<TaskCounts, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT status, COUNT(*)
        FROM tasks
        WHERE status IN ('queued', 'running')
        GROUP BY status
    "#};
    let rows: Vec<(String, i64)> = sqlx::query_as(query).fetch_all(exe).await?;

    let mut result = TaskCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            "running" => result.running = count,
            "queued" => result.queued = count,
            _ => {}
        }
    }
    Ok(result)
}

/// Delete all tasks regardless of state. An operational control; the engine
/// statement spawned by a deleted running task continues to completion, but
/// its final `complete` update becomes a no-op.
pub async fn flush<'c, E>(exe: E) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM tasks").execute(exe).await?;
    Ok(res.rows_affected())
}
