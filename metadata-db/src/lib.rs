pub mod conn;
pub mod partitions;
pub mod settings;
pub mod snapshots;
pub mod tables;
pub mod tasks;
pub mod test_utils;

pub use conn::{ConnError, DbConnPool};

use sqlx::{Pool, Postgres};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error connecting to metadata db: {0}")]
    ConnectionError(#[source] sqlx::Error),

    #[error("Metadata db error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Could not parse setting {key} as an integer: {value:?}")]
    InvalidSetting { key: String, value: String },
}

/// Handle to the metadata database.
///
/// All runtime state lives here: table descriptors, partition stats, snapshot
/// history, the task queue, and settings. Cloning is cheap; the underlying
/// connection pool is shared.
#[derive(Debug, Clone)]
pub struct MetadataDb {
    pool: DbConnPool,
}

impl MetadataDb {
    /// Sets up a connection pool to the metadata DB. Runs migrations if necessary.
    pub async fn connect(url: &str) -> Result<Self, ConnError> {
        let pool = DbConnPool::connect(url).await?;
        pool.run_migrations().await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}
