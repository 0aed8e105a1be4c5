//! Configuration management for Nodal services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NODAL__` prefix, `__` separated, e.g. `NODAL__NEO4J__URI`)
//! 2. Config file (`nodal.toml`)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;

/// Top-level settings for the graph client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub neo4j: GraphConfig,
    pub cache: CacheConfig,
    pub query_log: QueryLogConfig,
    pub index: IndexConfig,
    pub query: QueryConfig,
}

impl Settings {
    /// Load settings from `{file_prefix}.toml` (optional) and the environment.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("NODAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        tracing::debug!(uri = %settings.neo4j.uri, "Settings loaded");
        Ok(settings)
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "nodal-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

/// Capacities of the identity-mapped entity caches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub node_capacity: usize,
    pub relationship_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_capacity: 100_000,
            relationship_capacity: 500_000,
        }
    }
}

/// Statement logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryLogConfig {
    /// Emit every statement to the `nodal::query` log target.
    pub enabled: bool,
    /// Include bound parameters.
    pub log_parameters: bool,
    /// Include health-check statements.
    pub log_pings: bool,
    /// Parameter keys rendered as a size placeholder instead of their value.
    pub suppressed_parameters: Vec<String>,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_parameters: false,
            log_pings: false,
            suppressed_parameters: vec!["content".to_string(), "binaryData".to_string()],
        }
    }
}

/// Index reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Only create missing indexes, never drop.
    pub create_only: bool,
    /// Attempts per index operation on retryable failures.
    pub retries: u32,
    /// Timeout for a single index operation.
    pub timeout_secs: u64,
    /// Desired `(label, property)` indexes.
    pub desired: Vec<IndexEntry>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            create_only: false,
            retries: 3,
            timeout_secs: 60,
            desired: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub label: String,
    pub property: String,
}

/// Query execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Rows fetched per statement when a query is consumed page by page.
    pub fetch_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { fetch_size: 1000 }
    }
}
