//! Index reconciliation.
//!
//! Indexes managed here are single-property label indexes named
//! `nodal_<label>_<property>`. A label or property holding anything but ASCII
//! letters and digits gets a checksum suffix so distinct pairs never share a
//! name. Indexes without the prefix are never touched.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::Serialize;

use nodal_core::config::IndexEntry;
use nodal_core::Value;

use crate::capabilities::Feature;
use crate::database::GraphDatabase;
use crate::entity::quote_identifier;
use crate::error::{GraphError, Result};
use crate::session::{Field, Record, Statement};

pub const INDEX_PREFIX: &str = "nodal_";

/// One desired `(label, property)` index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndexSpec {
    pub label: String,
    pub property: String,
}

impl IndexSpec {
    pub fn new(label: &str, property: &str) -> Self {
        Self {
            label: label.to_string(),
            property: property.to_string(),
        }
    }

    pub fn name(&self) -> String {
        let plain = |name: &str| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric());
        if plain(&self.label) && plain(&self.property) {
            return format!("{INDEX_PREFIX}{}_{}", self.label, self.property);
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.label.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.property.as_bytes());
        format!(
            "{INDEX_PREFIX}{}_{}_{:08x}",
            sanitize(&self.label),
            sanitize(&self.property),
            hasher.finalize()
        )
    }

    fn create_statement(&self) -> Statement {
        Statement::new(
            "index.create",
            format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                self.name(),
                quote_identifier(&self.label),
                quote_identifier(&self.property)
            ),
        )
    }
}

impl From<&IndexEntry> for IndexSpec {
    fn from(entry: &IndexEntry) -> Self {
        Self::new(&entry.label, &entry.property)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn drop_statement(name: &str) -> Statement {
    Statement::new(
        "index.drop",
        format!("DROP INDEX {} IF EXISTS", quote_identifier(name)),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Online,
    Populating,
    Failed,
    Other(String),
}

impl From<&str> for IndexState {
    fn from(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "ONLINE" => Self::Online,
            "POPULATING" => Self::Populating,
            "FAILED" => Self::Failed,
            _ => Self::Other(state.to_string()),
        }
    }
}

/// An index as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub spec: Option<IndexSpec>,
    pub state: IndexState,
}

impl LiveIndex {
    fn from_record(record: &Record) -> Option<Self> {
        let name = record.get("name")?.as_value()?.as_str()?.to_string();
        let labels = string_list(record.get("labelsOrTypes"));
        let properties = string_list(record.get("properties"));
        let spec = match (labels.as_slice(), properties.as_slice()) {
            ([label], [property]) => Some(IndexSpec::new(label, property)),
            _ => None,
        };
        let state = record
            .get("state")
            .and_then(Field::as_value)
            .and_then(Value::as_str)
            .map_or_else(|| IndexState::Other("unknown".to_string()), IndexState::from);
        Some(Self { name, spec, state })
    }
}

fn string_list(field: Option<&Field>) -> Vec<String> {
    match field {
        Some(Field::Value(Value::StringArray(items))) => items.clone(),
        Some(Field::Value(Value::String(item))) => vec![item.clone()],
        _ => Vec::new(),
    }
}

/// Operations needed to move the live index set to the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    pub create: Vec<IndexSpec>,
    /// Present but FAILED or covering another pair: dropped, then created again.
    pub recreate: Vec<IndexSpec>,
    pub drop: Vec<String>,
    pub unchanged: usize,
}

pub fn plan(desired: &[IndexSpec], live: &[LiveIndex], create_only: bool) -> IndexPlan {
    let own: HashMap<&str, &LiveIndex> = live
        .iter()
        .filter(|index| index.name.starts_with(INDEX_PREFIX))
        .map(|index| (index.name.as_str(), index))
        .collect();
    let wanted: BTreeSet<IndexSpec> = desired.iter().cloned().collect();

    let mut plan = IndexPlan::default();
    for spec in wanted.iter() {
        match own.get(spec.name().as_str()) {
            None => plan.create.push(spec.clone()),
            Some(index) if index.state == IndexState::Failed => plan.recreate.push(spec.clone()),
            Some(index) if index.spec.as_ref().is_some_and(|live| live != spec) => {
                plan.recreate.push(spec.clone())
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    if !create_only {
        let wanted_names: BTreeSet<String> = wanted.iter().map(IndexSpec::name).collect();
        let mut stale: Vec<String> = own
            .keys()
            .filter(|name| !wanted_names.contains(**name))
            .map(|name| name.to_string())
            .collect();
        stale.sort();
        plan.drop = stale;
    }
    plan
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IndexFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IndexReport {
    pub created: Vec<String>,
    pub recreated: Vec<String>,
    pub dropped: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<IndexFailure>,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl GraphDatabase {
    /// Reconcile the indexes listed in the `index` settings.
    pub async fn reconcile_configured_indexes(&self) -> Result<IndexReport> {
        let config = &self.settings().index;
        let desired: Vec<IndexSpec> = config.desired.iter().map(IndexSpec::from).collect();
        self.reconcile_indexes(&desired, config.create_only).await
    }

    /// Create missing indexes, rebuild failed ones and, unless `create_only`,
    /// drop managed indexes that are no longer desired.
    pub async fn reconcile_indexes(&self, desired: &[IndexSpec], create_only: bool) -> Result<IndexReport> {
        let live = self.live_indexes().await?;
        let plan = plan(desired, &live, create_only);
        let mut report = IndexReport {
            unchanged: plan.unchanged,
            ..IndexReport::default()
        };

        for spec in &plan.recreate {
            let name = spec.name();
            if let Err(err) = self.schema_operation(&drop_statement(&name)).await {
                tracing::warn!(index = %name, error = %err, "Failed to drop index before recreating");
            }
            match self.schema_operation(&spec.create_statement()).await {
                Ok(_) => {
                    tracing::info!(index = %name, "Index recreated");
                    report.recreated.push(name);
                }
                Err(err) => report.failed.push(IndexFailure {
                    name,
                    error: err.to_string(),
                }),
            }
        }

        for spec in &plan.create {
            let name = spec.name();
            match self.schema_operation(&spec.create_statement()).await {
                Ok(_) => {
                    tracing::info!(index = %name, label = %spec.label, property = %spec.property, "Index created");
                    report.created.push(name);
                }
                Err(err) => report.failed.push(IndexFailure {
                    name,
                    error: err.to_string(),
                }),
            }
        }

        for name in &plan.drop {
            match self.schema_operation(&drop_statement(name)).await {
                Ok(_) => {
                    tracing::info!(index = %name, "Index dropped");
                    report.dropped.push(name.clone());
                }
                Err(err) => report.failed.push(IndexFailure {
                    name: name.clone(),
                    error: err.to_string(),
                }),
            }
        }

        for failure in &report.failed {
            tracing::warn!(index = %failure.name, error = %failure.error, "Index operation failed");
        }
        Ok(report)
    }

    /// Managed indexes currently known to the server.
    pub async fn live_indexes(&self) -> Result<Vec<LiveIndex>> {
        if !self.supports(Feature::ShowIndexes) {
            tracing::warn!("Server cannot list indexes, reconciliation limited to creation");
            return Ok(Vec::new());
        }
        let statement = Statement::new(
            "index.list",
            format!(
                "SHOW INDEXES YIELD name, labelsOrTypes, properties, state \
                 WHERE name STARTS WITH '{INDEX_PREFIX}' RETURN name, labelsOrTypes, properties, state"
            ),
        )
        .returns(["name", "labelsOrTypes", "properties", "state"]);

        let records = self.schema_operation(&statement).await?;
        Ok(records.iter().filter_map(LiveIndex::from_record).collect())
    }

    /// Run one schema statement in its own transaction, retrying retryable failures.
    async fn schema_operation(&self, statement: &Statement) -> Result<Vec<Record>> {
        let config = &self.settings().index;
        let attempts = config.retries.max(1);
        let timeout = Duration::from_secs(config.timeout_secs.max(1));

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(timeout, self.run_alone(statement)).await {
                Ok(Ok(records)) => return Ok(records),
                Ok(Err(err)) if err.is_retryable() => err,
                Ok(Err(err)) => return Err(err),
                Err(_) => GraphError::Retryable {
                    code: String::new(),
                    message: format!("{} timed out after {timeout:?}", statement.name()),
                },
            };
            if attempt >= attempts {
                return Err(err);
            }
            tracing::warn!(statement = statement.name(), attempt, error = %err, "Schema operation failed, retrying");
            tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
        }
    }

    async fn run_alone(&self, statement: &Statement) -> Result<Vec<Record>> {
        let mut tx = self.begin_tx().await?;
        let records = tx.run(statement).await?;
        tx.mark_successful();
        tx.close().await?;
        Ok(records)
    }
}
