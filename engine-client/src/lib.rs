//! Client for the lakehouse query engine
//!
//! Speaks the coordinator's HTTP statement protocol: submit a statement, then
//! follow `nextUri` until the result set is drained. Transient failures
//! (connection errors and generic query failures) are retried with a bounded
//! exponential backoff; everything else surfaces immediately.

pub mod sql;

use std::collections::BTreeMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{instrument, warn};
use url::Url;

const STATEMENT_PATH: &str = "v1/statement";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const RETRY_MIN_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
const RETRY_MAX_TIMES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("could not reach query engine: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid engine url: {0}")]
    Url(#[from] url::ParseError),

    #[error("query failed: {message}")]
    QueryFailed { message: String },
}

impl EngineError {
    /// Connection errors and generic query failures are worth retrying; user
    /// errors and protocol violations are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            other => other.to_string().contains("query failed"),
        }
    }
}

/// Connection settings for the engine coordinator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub url: String,
    pub user: String,
    pub catalog: String,
    pub schema: String,
}

#[derive(Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    statement_url: Url,
    user: String,
    catalog: String,
    schema: String,
}

impl EngineClient {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let base: Url = settings.url.parse()?;
        let statement_url = base.join(STATEMENT_PATH)?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            http,
            statement_url,
            user: settings.user.clone(),
            catalog: settings.catalog.clone(),
            schema: settings.schema.clone(),
        })
    }

    /// The catalog-qualified name for a table, safe for interpolation.
    pub fn qualified_table_name(&self, table: &str) -> String {
        sql::qualified_table_name(&self.catalog, &self.schema, table)
    }

    /// Execute a statement, ignoring any result rows.
    pub async fn execute(&self, statement: &str) -> Result<(), EngineError> {
        self.query_rows(statement).await.map(|_| ())
    }

    /// Execute a statement and collect all result rows as column-name maps.
    #[instrument(skip_all, err)]
    pub async fn query_rows(
        &self,
        statement: &str,
    ) -> Result<Vec<BTreeMap<String, JsonValue>>, EngineError> {
        (|| self.run_statement(statement))
            .retry(retry_policy())
            .when(EngineError::is_retryable)
            .notify(|err, dur| {
                warn!(
                    error = %err,
                    "Engine statement failed, retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await
    }

    /// One protocol round: submit, then follow `nextUri` to completion.
    async fn run_statement(
        &self,
        statement: &str,
    ) -> Result<Vec<BTreeMap<String, JsonValue>>, EngineError> {
        let mut response: StatementResponse = self
            .http
            .post(self.statement_url.clone())
            .header("X-Trino-User", &self.user)
            .header("X-Trino-Catalog", &self.catalog)
            .header("X-Trino-Schema", &self.schema)
            .body(statement.to_string())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<JsonValue>> = Vec::new();

        loop {
            if let Some(error) = response.error {
                return Err(EngineError::QueryFailed {
                    message: error.message,
                });
            }

            if let Some(new_columns) = response.columns {
                columns = new_columns.into_iter().map(|c| c.name).collect();
            }
            if let Some(data) = response.data {
                rows.extend(data);
            }

            let Some(next_uri) = response.next_uri else {
                break;
            };

            response = self
                .http
                .get(next_uri)
                .header("X-Trino-User", &self.user)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect::<BTreeMap<String, JsonValue>>()
            })
            .collect())
    }
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(RETRY_MIN_DELAY)
        .with_max_delay(RETRY_MAX_DELAY)
        .with_max_times(RETRY_MAX_TIMES)
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
    columns: Option<Vec<Column>>,
    data: Option<Vec<Vec<JsonValue>>>,
    error: Option<QueryError>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryError {
    message: String,
}
