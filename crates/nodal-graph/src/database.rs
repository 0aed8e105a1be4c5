//! The database service: transactions, entity lookup and creation, queries.

use std::sync::Arc;
use std::time::Duration;

use nodal_core::{EntityKind, Identity, PropertyMap, Settings, Value};

use crate::cache::{CacheSummary, GraphCaches};
use crate::capabilities::{Capabilities, Feature};
use crate::client::BoltDriver;
use crate::entity::{quote_identifier, Direction, Entity};
use crate::error::{GraphError, Result};
use crate::query::{CypherQuery, FixedQuery, QueryBuilder};
use crate::querylog::QueryLog;
use crate::session::{Driver, Field, Record, Statement};
use crate::tx::SessionTx;

/// A node created together with its ownership edges.
#[derive(Debug, Clone)]
pub struct OwnedNode {
    pub node: Arc<Entity>,
    pub owns: Arc<Entity>,
    pub security: Arc<Entity>,
}

fn label_clause(labels: &[&str]) -> String {
    labels
        .iter()
        .map(|l| format!(":{}", quote_identifier(l)))
        .collect()
}

fn take_column(record: &mut Record, column: &str) -> Result<Field> {
    record
        .take(column)
        .ok_or_else(|| GraphError::data_format(format!("missing column {column}")))
}

/// Shared entry point to one graph database.
///
/// Cheap to share behind an `Arc`; transactions are opened per task.
pub struct GraphDatabase {
    driver: Arc<dyn Driver>,
    caches: Arc<GraphCaches>,
    log: Arc<QueryLog>,
    capabilities: Capabilities,
    settings: Settings,
}

impl GraphDatabase {
    /// Connect over Bolt and negotiate capabilities.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let driver = BoltDriver::connect(&settings.neo4j).await?;
        Self::with_driver(Arc::new(driver), settings).await
    }

    pub async fn with_driver(driver: Arc<dyn Driver>, settings: &Settings) -> Result<Self> {
        let capabilities = Capabilities::probe(driver.as_ref(), &settings.neo4j).await;
        Ok(Self {
            driver,
            caches: Arc::new(GraphCaches::new(&settings.cache)),
            log: Arc::new(QueryLog::new(&settings.query_log)),
            capabilities,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.capabilities.supports(feature)
    }

    pub fn caches(&self) -> &Arc<GraphCaches> {
        &self.caches
    }

    // ── Transactions ─────────────────────────────────────────────

    pub async fn begin_tx(&self) -> Result<SessionTx> {
        self.open_tx(None).await
    }

    /// A transaction whose statements fail as retryable once `timeout` elapsed.
    pub async fn begin_tx_with_timeout(&self, timeout: Duration) -> Result<SessionTx> {
        self.open_tx(Some(timeout)).await
    }

    async fn open_tx(&self, timeout: Option<Duration>) -> Result<SessionTx> {
        let session = self.driver.begin().await?;
        Ok(SessionTx::new(
            session,
            self.caches.clone(),
            self.log.clone(),
            timeout,
        ))
    }

    pub async fn ping(&self) -> Result<()> {
        let mut tx = self.begin_tx().await?;
        tx.run(&Statement::ping()).await?;
        tx.close().await
    }

    /// A query builder using the negotiated dialect and configured fetch size.
    pub fn query_builder(&self) -> CypherQuery {
        CypherQuery::new()
            .with_quantifier(self.capabilities.quantifier())
            .with_fetch_size(self.settings.query.fetch_size)
    }

    pub fn fixed_query(&self, base: impl Into<String>) -> FixedQuery {
        FixedQuery::new(base).with_fetch_size(self.settings.query.fetch_size)
    }

    // ── Creation ─────────────────────────────────────────────────

    pub async fn create_node(
        &self,
        tx: &mut SessionTx,
        labels: &[&str],
        properties: PropertyMap,
    ) -> Result<Arc<Entity>> {
        let statement = Statement::new(
            "node.create",
            format!("CREATE (n{} $props) RETURN n", label_clause(labels)),
        )
        .param("props", properties)
        .returns(["n"]);

        let node = tx.get_entity(&statement).await?;
        tx.modified(&node);
        tracing::debug!(id = %node.identity(), ?labels, "Node created");
        Ok(node)
    }

    pub async fn create_relationship(
        &self,
        tx: &mut SessionTx,
        start: &Arc<Entity>,
        end: &Arc<Entity>,
        rel_type: &str,
        properties: PropertyMap,
    ) -> Result<Arc<Entity>> {
        let statement = Statement::new(
            "relationship.create",
            format!(
                "MATCH (s), (t) WHERE ID(s) = $start AND ID(t) = $end CREATE (s)-[n:{} $props]->(t) RETURN n",
                quote_identifier(rel_type)
            ),
        )
        .param("start", start.identity())
        .param("end", end.identity())
        .param("props", properties)
        .returns(["n"]);

        let rel = tx.get_entity(&statement).await.map_err(|e| {
            if e.is_not_found() {
                GraphError::NotFound(format!(
                    "relationship endpoints {} and {}",
                    start.identity(),
                    end.identity()
                ))
            } else {
                e
            }
        })?;
        tx.modified(&rel);
        self.caches.invalidate_dependents(&rel);
        Ok(rel)
    }

    /// Create a node together with `OWNS` and `SECURITY` edges from `owner`.
    pub async fn create_node_with_owner(
        &self,
        tx: &mut SessionTx,
        labels: &[&str],
        properties: PropertyMap,
        owner: &Arc<Entity>,
        security: PropertyMap,
    ) -> Result<OwnedNode> {
        let statement = Statement::new(
            "node.create_with_owner",
            format!(
                "MATCH (s) WHERE ID(s) = $owner \
                 CREATE (s)-[owns:OWNS]->(n{} $props), (s)-[security:SECURITY $securityProps]->(n) \
                 RETURN n, owns, security",
                label_clause(labels)
            ),
        )
        .param("owner", owner.identity())
        .param("props", properties)
        .param("securityProps", security)
        .returns(["n", "owns", "security"]);

        let mut records = tx.run(&statement).await?;
        let Some(mut record) = records.pop() else {
            return Err(GraphError::entity_not_found(EntityKind::Node, owner.identity()));
        };

        let created = OwnedNode {
            node: tx.map_entity(take_column(&mut record, "n")?)?,
            owns: tx.map_entity(take_column(&mut record, "owns")?)?,
            security: tx.map_entity(take_column(&mut record, "security")?)?,
        };
        for entity in [&created.node, &created.owns, &created.security] {
            tx.modified(entity);
        }
        owner.clear_adjacency();
        Ok(created)
    }

    // ── Lookup ───────────────────────────────────────────────────

    /// The node with `id`, from the cache or the database.
    pub async fn node(&self, tx: &mut SessionTx, id: Identity) -> Result<Arc<Entity>> {
        self.by_identity(tx, EntityKind::Node, id).await
    }

    pub async fn relationship(&self, tx: &mut SessionTx, id: Identity) -> Result<Arc<Entity>> {
        self.by_identity(tx, EntityKind::Relationship, id).await
    }

    async fn by_identity(&self, tx: &mut SessionTx, kind: EntityKind, id: Identity) -> Result<Arc<Entity>> {
        tx.ensure_open()?;
        if tx.is_deleted_identity(kind, id) {
            return Err(GraphError::entity_not_found(kind, id));
        }
        if let Some(entity) = tx.tracked(kind, id).or_else(|| self.caches.get(kind, id)) {
            return Ok(entity);
        }

        let statement = match kind {
            EntityKind::Node => Statement::new("node.fetch", "MATCH (n) WHERE ID(n) = $id RETURN n"),
            EntityKind::Relationship => Statement::new(
                "relationship.fetch",
                "MATCH ()-[n]->() WHERE ID(n) = $id RETURN n",
            ),
        }
        .param("id", id)
        .returns(["n"]);

        tx.get_entity(&statement).await.map_err(|e| {
            if e.is_not_found() {
                GraphError::entity_not_found(kind, id)
            } else {
                e
            }
        })
    }

    async fn entities(&self, tx: &mut SessionTx, statement: Statement) -> Result<Vec<Arc<Entity>>> {
        let entities = tx.get_entities(&statement).await?;
        Ok(entities.into_iter().filter(|e| !tx.is_deleted(e)).collect())
    }

    pub async fn all_nodes(&self, tx: &mut SessionTx) -> Result<Vec<Arc<Entity>>> {
        self.entities(tx, Statement::new("nodes.all", "MATCH (n) RETURN n").returns(["n"]))
            .await
    }

    pub async fn nodes_by_label(&self, tx: &mut SessionTx, label: &str) -> Result<Vec<Arc<Entity>>> {
        let statement = Statement::new(
            "nodes.by_label",
            format!("MATCH (n{}) RETURN n", label_clause(&[label])),
        )
        .returns(["n"]);
        self.entities(tx, statement).await
    }

    pub async fn all_relationships(&self, tx: &mut SessionTx) -> Result<Vec<Arc<Entity>>> {
        let statement =
            Statement::new("relationships.all", "MATCH ()-[n]->() RETURN n").returns(["n"]);
        self.entities(tx, statement).await
    }

    /// Relationships of `node`, optionally restricted to one type.
    pub async fn relationships(
        &self,
        tx: &mut SessionTx,
        node: &Arc<Entity>,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Arc<Entity>>> {
        tx.ensure_open()?;
        let key = (direction, rel_type.map(str::to_string));
        // Cached lists hold committed state only; a writing transaction must see its own edges.
        let shared = !tx.has_modifications();

        if let Some(ids) = node.cached_adjacency(&key).filter(|_| shared) {
            let cached: Option<Vec<_>> = ids
                .iter()
                .map(|id| self.caches.get(EntityKind::Relationship, *id))
                .collect();
            if let Some(rels) = cached {
                return Ok(rels.into_iter().filter(|r| !tx.is_deleted(r)).collect());
            }
        }

        let typed = rel_type
            .map(|t| format!(":{}", quote_identifier(t)))
            .unwrap_or_default();
        let pattern = match direction {
            Direction::Outgoing => format!("(s)-[n{typed}]->(t)"),
            Direction::Incoming => format!("(s)<-[n{typed}]-(t)"),
            Direction::Both => format!("(s)-[n{typed}]-(t)"),
        };
        let statement = Statement::new(
            "relationships.adjacent",
            format!("MATCH {pattern} WHERE ID(s) = $id RETURN DISTINCT n"),
        )
        .param("id", node.identity())
        .returns(["n"]);

        let rels = tx.get_entities(&statement).await?;
        if shared {
            node.store_adjacency(key, rels.iter().map(|r| r.identity()).collect());
        }
        Ok(rels.into_iter().filter(|r| !tx.is_deleted(r)).collect())
    }

    pub async fn count_nodes(&self, tx: &mut SessionTx, label: Option<&str>) -> Result<i64> {
        let labels: Vec<&str> = label.into_iter().collect();
        let statement = Statement::new(
            "nodes.count",
            format!("MATCH (n{}) RETURN count(n) AS count", label_clause(&labels)),
        )
        .returns(["count"]);
        tx.get_long(&statement).await
    }

    /// Delete every node carrying `label` and its relationships. Returns the node count.
    pub async fn delete_nodes_by_label(&self, tx: &mut SessionTx, label: &str) -> Result<usize> {
        let statement = Statement::new(
            "nodes.delete_by_label",
            format!(
                "MATCH (n{}) OPTIONAL MATCH (n)-[r]-() \
                 WITH n, ID(n) AS id, collect(DISTINCT ID(r)) AS rels \
                 DETACH DELETE n RETURN id, rels",
                label_clause(&[label])
            ),
        )
        .returns(["id", "rels"]);

        let records = tx.run(&statement).await?;
        let count = records.len();
        for record in records {
            let Some(id) = record.get("id").and_then(Field::as_value).and_then(Value::as_i64) else {
                continue;
            };
            let id = Identity(id);
            if let Some(node) = self.caches.get(EntityKind::Node, id) {
                node.mark_deleted();
                tx.modified(&node);
            }
            tx.deleted_identity(EntityKind::Node, id);

            let rels = record
                .get("rels")
                .and_then(Field::as_value)
                .and_then(Value::wire_integers)
                .unwrap_or_default();
            for rel in rels {
                tx.deleted_relationship(Identity(rel));
            }
        }
        tracing::info!(label, count, "Deleted nodes by label");
        Ok(count)
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Every entity matched by `query`, unpaged.
    pub async fn query<Q: QueryBuilder>(&self, tx: &mut SessionTx, query: &Q) -> Result<Vec<Arc<Entity>>> {
        self.entities(tx, query.to_statement(false)).await
    }

    /// Rows `size * page .. size * (page + 1)` of `query`.
    pub async fn fetch_page<Q: QueryBuilder>(
        &self,
        tx: &mut SessionTx,
        query: &mut Q,
        size: usize,
        page: usize,
    ) -> Result<Vec<Arc<Entity>>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        query.paginate(size, page);

        let mut results = Vec::with_capacity(size);
        loop {
            let rows = tx.get_list(&query.to_statement(true)).await?;
            let fetched = rows.len();
            for field in rows {
                if query.context_mut().consume_skip() {
                    continue;
                }
                if results.len() < size {
                    results.push(tx.map_entity(field)?);
                }
            }
            if results.len() >= size || fetched < query.page_size() {
                break;
            }
            query.next_page();
        }
        Ok(results)
    }

    // ── Cache control ────────────────────────────────────────────

    /// Drop cached wrappers changed outside this process.
    pub fn invalidate(&self, kind: EntityKind, ids: impl IntoIterator<Item = Identity>) {
        self.caches.expunge_all(kind, ids);
    }

    pub fn clear_caches(&self) {
        self.caches.clear();
        tracing::info!("Entity caches cleared");
    }

    pub fn cache_stats(&self) -> CacheSummary {
        self.caches.stats()
    }
}
