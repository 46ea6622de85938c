use std::{net::SocketAddr, path::PathBuf, time::Duration};

use figment::{
    providers::{Env, Format as _, Toml},
    Figment,
};
use fs_err as fs;
use serde::Deserialize;

use crate::BoxError;

/// Environment variables prefixed with `LAKEHOUSE_` override file keys.
/// Nested keys use a double underscore, e.g. `LAKEHOUSE_DATABASE__URL`.
pub const ENV_PREFIX: &str = "LAKEHOUSE_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseSettings,
    pub engine: EngineSettings,
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

impl Config {
    pub fn load(file: impl Into<PathBuf>, env_override: bool) -> Result<Self, BoxError> {
        let config_path = fs::canonicalize(file.into())?;
        let contents = fs::read_to_string(&config_path)?;
        Self::from_toml_str(&contents, env_override)
    }

    pub fn from_toml_str(contents: &str, env_override: bool) -> Result<Self, BoxError> {
        let mut config_builder = Figment::new().merge(Toml::string(contents));
        if env_override {
            config_builder = config_builder.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(config_builder.extract()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL of the metadata database.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Base URL of the query engine coordinator.
    pub url: String,
    #[serde(default = "default_engine_user")]
    pub user: String,
    #[serde(default = "default_engine_catalog")]
    pub catalog: String,
    #[serde(default = "default_engine_schema")]
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    /// URI of the Iceberg REST catalog.
    pub uri: String,
    #[serde(default)]
    pub warehouse: Option<String>,
    /// Database used to resolve unqualified table names.
    #[serde(default = "default_database")]
    pub default_database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: i64,
    /// Worker poll interval, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl TaskSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    /// Interval between periodic full refresh cycles, in seconds.
    #[serde(default = "default_refresh_interval")]
    pub interval: u64,
    /// Tables refreshed more recently than this are skipped by the periodic
    /// cycle, in seconds.
    #[serde(default = "default_refresh_min_age")]
    pub min_age: u64,
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age)
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: default_refresh_interval(),
            min_age: default_refresh_min_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_engine_user() -> String {
    "lakehouse-admin".to_string()
}

fn default_engine_catalog() -> String {
    "lakehouse".to_string()
}

fn default_engine_schema() -> String {
    "main".to_string()
}

fn default_database() -> String {
    "main".to_string()
}

fn default_worker_count() -> i64 {
    1
}

fn default_poll_interval() -> u64 {
    1
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_refresh_min_age() -> u64 {
    600
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}
