//! Cached entity wrappers with per-transaction property overlays.
//!
//! An [`Entity`] is the single in-process representation of one node or
//! relationship. It holds the last committed property map plus one overlay
//! per open transaction that has touched it. Reads and writes go through the
//! overlay of the calling [`SessionTx`], so a transaction sees its own
//! uncommitted writes and nobody else's. Commit folds the overlay's changed
//! keys into the committed map; rollback drops the overlay.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use nodal_core::{CoreError, EntityKind, Identity, PropertyMap, Value};

use crate::error::{GraphError, Result};
use crate::session::{Field, NodeData, Param, RelationshipData, Statement};
use crate::tx::{SessionTx, TxKey};

/// Traversal direction for relationship lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

pub(crate) type AdjacencyKey = (Direction, Option<String>);

#[derive(Debug, Clone)]
enum Shape {
    Node { labels: Vec<String> },
    Relationship { rel_type: String, start: Identity, end: Identity },
}

#[derive(Debug)]
struct Overlay {
    view: PropertyMap,
    changed: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct EntityState {
    committed: PropertyMap,
    overlays: HashMap<TxKey, Overlay>,
    deleted: bool,
    stale: bool,
    adjacency: HashMap<AdjacencyKey, Vec<Identity>>,
}

/// Result of looking at a wrapper's data.
enum Access<T> {
    Ready(T),
    Stale,
}

/// The unique in-process handle for one node or relationship.
pub struct Entity {
    identity: Identity,
    shape: Shape,
    state: Mutex<EntityState>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind())
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Entity {
    pub(crate) fn from_node(data: NodeData) -> Self {
        Self::new(
            data.identity,
            Shape::Node {
                labels: data.labels,
            },
            data.properties,
        )
    }

    pub(crate) fn from_relationship(data: RelationshipData) -> Self {
        Self::new(
            data.identity,
            Shape::Relationship {
                rel_type: data.rel_type,
                start: data.start,
                end: data.end,
            },
            data.properties,
        )
    }

    fn new(identity: Identity, shape: Shape, committed: PropertyMap) -> Self {
        Self {
            identity,
            shape,
            state: Mutex::new(EntityState {
                committed,
                ..EntityState::default()
            }),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn kind(&self) -> EntityKind {
        match self.shape {
            Shape::Node { .. } => EntityKind::Node,
            Shape::Relationship { .. } => EntityKind::Relationship,
        }
    }

    /// Labels of a node; empty for relationships.
    pub fn labels(&self) -> &[String] {
        match &self.shape {
            Shape::Node { labels } => labels,
            Shape::Relationship { .. } => &[],
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels().iter().any(|l| l == label)
    }

    pub fn relationship_type(&self) -> Option<&str> {
        match &self.shape {
            Shape::Relationship { rel_type, .. } => Some(rel_type),
            Shape::Node { .. } => None,
        }
    }

    pub fn start(&self) -> Option<Identity> {
        match self.shape {
            Shape::Relationship { start, .. } => Some(start),
            Shape::Node { .. } => None,
        }
    }

    pub fn end(&self) -> Option<Identity> {
        match self.shape {
            Shape::Relationship { end, .. } => Some(end),
            Shape::Node { .. } => None,
        }
    }

    /// The endpoint of a relationship opposite to `node`.
    pub fn other_node(&self, node: Identity) -> Option<Identity> {
        match self.shape {
            Shape::Relationship { start, end, .. } if start == node => Some(end),
            Shape::Relationship { start, end, .. } if end == node => Some(start),
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Last committed value of `key`, outside of any transaction.
    pub fn committed_property(&self, key: &str) -> Option<Value> {
        self.state.lock().committed.get(key).cloned()
    }

    pub fn committed_properties(&self) -> PropertyMap {
        self.state.lock().committed.clone()
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn get_property(self: &Arc<Self>, tx: &mut SessionTx, key: &str) -> Result<Option<Value>> {
        self.read(tx, |view| view.get(key).cloned()).await
    }

    pub async fn get_property_or(
        self: &Arc<Self>,
        tx: &mut SessionTx,
        key: &str,
        default: impl Into<Value>,
    ) -> Result<Value> {
        Ok(self
            .get_property(tx, key)
            .await?
            .unwrap_or_else(|| default.into()))
    }

    /// Read and convert a property; absence is `Ok(None)`.
    pub async fn get_typed<T>(self: &Arc<Self>, tx: &mut SessionTx, key: &str) -> Result<Option<T>>
    where
        T: TryFrom<Value, Error = CoreError>,
    {
        match self.get_property(tx, key).await? {
            Some(value) => Ok(Some(T::try_from(value)?)),
            None => Ok(None),
        }
    }

    pub async fn has_property(self: &Arc<Self>, tx: &mut SessionTx, key: &str) -> Result<bool> {
        self.read(tx, |view| view.contains_key(key)).await
    }

    pub async fn property_keys(self: &Arc<Self>, tx: &mut SessionTx) -> Result<Vec<String>> {
        self.read(tx, |view| view.keys().cloned().collect()).await
    }

    /// Full property map as seen by `tx`.
    pub async fn properties(self: &Arc<Self>, tx: &mut SessionTx) -> Result<PropertyMap> {
        self.read(tx, PropertyMap::clone).await
    }

    async fn read<R, F>(self: &Arc<Self>, tx: &mut SessionTx, f: F) -> Result<R>
    where
        F: Fn(&PropertyMap) -> R,
    {
        tx.ensure_open()?;
        if tx.is_deleted(self) {
            return Err(self.not_found());
        }

        let (result, created) = match self.view(tx.key(), false, &f) {
            Access::Ready(ready) => ready,
            Access::Stale => {
                self.refresh(tx).await?;
                match self.view(tx.key(), true, &f) {
                    Access::Ready(ready) => ready,
                    Access::Stale => return Err(self.not_found()),
                }
            }
        };
        if created {
            tx.accessed(self);
        }
        Ok(result)
    }

    /// Apply `f` to the overlay of `key`, creating it from committed data on
    /// first touch. The boolean reports whether the overlay was created.
    fn view<R>(&self, key: TxKey, allow_stale: bool, f: impl FnOnce(&PropertyMap) -> R) -> Access<(R, bool)> {
        let mut state = self.state.lock();
        if let Some(overlay) = state.overlays.get(&key) {
            return Access::Ready((f(&overlay.view), false));
        }
        if state.stale && !allow_stale {
            return Access::Stale;
        }
        let overlay = Overlay {
            view: state.committed.clone(),
            changed: BTreeSet::new(),
        };
        let result = f(&overlay.view);
        state.overlays.insert(key, overlay);
        Access::Ready((result, true))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Set one property. Writing the value already visible to `tx` is a no-op.
    pub async fn set_property(
        self: &Arc<Self>,
        tx: &mut SessionTx,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let current = self.prepare_write(tx, |view| view.get(key).cloned()).await?;
        if current.as_ref() == Some(&value) {
            return Ok(());
        }

        let statement = self
            .statement(
                "set_property",
                format!("SET n.{} = $value", quote_identifier(key)),
            )
            .param("value", value.clone());
        tx.set(&statement).await?;

        self.apply(tx.key(), [(key.to_string(), Some(value))]);
        tx.modified(self);
        Ok(())
    }

    /// Set several properties in one statement; unchanged entries are skipped.
    pub async fn set_properties(self: &Arc<Self>, tx: &mut SessionTx, properties: PropertyMap) -> Result<()> {
        let changed: PropertyMap = self
            .prepare_write(tx, |view| {
                properties
                    .into_iter()
                    .filter(|(k, v)| view.get(k) != Some(v))
                    .collect()
            })
            .await?;
        if changed.is_empty() {
            return Ok(());
        }

        let statement = self
            .statement("set_properties", "SET n += $props")
            .param("props", changed.clone());
        tx.set(&statement).await?;

        self.apply(tx.key(), changed.into_iter().map(|(k, v)| (k, Some(v))));
        tx.modified(self);
        Ok(())
    }

    /// Remove one property. Removing an absent key is a no-op.
    pub async fn remove_property(self: &Arc<Self>, tx: &mut SessionTx, key: &str) -> Result<()> {
        let present = self.prepare_write(tx, |view| view.contains_key(key)).await?;
        if !present {
            return Ok(());
        }

        let statement = self
            .statement(
                "set_property",
                format!("SET n.{} = $value", quote_identifier(key)),
            )
            .param("value", Param::Null);
        tx.set(&statement).await?;

        self.apply(tx.key(), [(key.to_string(), None)]);
        tx.modified(self);
        Ok(())
    }

    /// Delete this entity. `cascade` also removes a node's relationships.
    pub async fn delete(self: &Arc<Self>, tx: &mut SessionTx, cascade: bool) -> Result<()> {
        self.prepare_write(tx, |_| ()).await?;

        let removed = match self.kind() {
            EntityKind::Node if cascade => {
                let statement = self
                    .statement(
                        "delete",
                        "OPTIONAL MATCH (n)-[r]-() WITH n, collect(DISTINCT ID(r)) AS rels DETACH DELETE n RETURN rels",
                    )
                    .returns(["rels"]);
                match tx.get_object(&statement).await? {
                    Some(Field::Value(v)) => v.wire_integers().unwrap_or_default(),
                    _ => Vec::new(),
                }
            }
            _ => {
                tx.set(&self.statement("delete", "DELETE n")).await?;
                Vec::new()
            }
        };

        self.mark_deleted();
        for id in removed {
            tx.deleted_relationship(Identity(id));
        }
        tx.deleted(self);
        tx.modified(self);
        tx.caches().invalidate_dependents(self);
        Ok(())
    }

    /// Validate a write and compute its input from the transaction view.
    async fn prepare_write<R>(self: &Arc<Self>, tx: &mut SessionTx, f: impl FnOnce(&PropertyMap) -> R) -> Result<R> {
        tx.ensure_open()?;
        if self.is_deleted() || tx.is_deleted(self) {
            return Err(self.not_found());
        }
        let needs_refresh = {
            let state = self.state.lock();
            state.stale && !state.overlays.contains_key(&tx.key())
        };
        if needs_refresh {
            self.refresh(tx).await?;
        }
        match self.view(tx.key(), true, f) {
            Access::Ready((result, created)) => {
                if created {
                    tx.accessed(self);
                }
                Ok(result)
            }
            Access::Stale => Err(self.not_found()),
        }
    }

    fn apply(&self, key: TxKey, changes: impl IntoIterator<Item = (String, Option<Value>)>) {
        let mut state = self.state.lock();
        let Some(overlay) = state.overlays.get_mut(&key) else {
            return;
        };
        for (k, v) in changes {
            match v {
                Some(v) => overlay.view.insert(k.clone(), v),
                None => overlay.view.remove(&k),
            };
            overlay.changed.insert(k);
        }
    }

    // ── Refresh ──────────────────────────────────────────────────

    fn match_clause(&self) -> &'static str {
        match self.kind() {
            EntityKind::Node => "MATCH (n) WHERE ID(n) = $id",
            EntityKind::Relationship => "MATCH ()-[n]->() WHERE ID(n) = $id",
        }
    }

    /// `"{kind}.{op}"` statement bound to this entity's id.
    fn statement(&self, op: &str, tail: impl AsRef<str>) -> Statement {
        let name = match (self.kind(), op) {
            (EntityKind::Node, "set_property") => "node.set_property",
            (EntityKind::Node, "set_properties") => "node.set_properties",
            (EntityKind::Node, "delete") => "node.delete",
            (EntityKind::Node, _) => "node.refresh",
            (EntityKind::Relationship, "set_property") => "relationship.set_property",
            (EntityKind::Relationship, "set_properties") => "relationship.set_properties",
            (EntityKind::Relationship, "delete") => "relationship.delete",
            (EntityKind::Relationship, _) => "relationship.refresh",
        };
        Statement::new(name, format!("{} {}", self.match_clause(), tail.as_ref()))
            .param("id", self.identity)
    }

    /// Reload committed data from the database.
    pub async fn refresh(self: &Arc<Self>, tx: &mut SessionTx) -> Result<()> {
        let statement = self.statement("refresh", "RETURN n").returns(["n"]);
        let properties = match tx.get_object(&statement).await? {
            Some(Field::Node(data)) => data.properties,
            Some(Field::Relationship(data)) => data.properties,
            Some(other) => {
                return Err(GraphError::data_format(format!(
                    "expected {} for id {}, got {other:?}",
                    self.kind(),
                    self.identity
                )))
            }
            None => {
                self.mark_deleted();
                return Err(self.not_found());
            }
        };
        self.absorb(properties);
        tracing::trace!(kind = %self.kind(), id = %self.identity, "Entity refreshed");
        Ok(())
    }

    /// Replace committed data with freshly fetched row data if this wrapper is stale.
    pub(crate) fn absorb(&self, properties: PropertyMap) {
        let mut state = self.state.lock();
        if state.stale {
            state.committed = properties;
            state.stale = false;
            state.deleted = false;
            // Snapshots with no local changes would otherwise pin the old data.
            state.overlays.retain(|_, overlay| !overlay.changed.is_empty());
        }
    }

    // ── Transaction lifecycle ────────────────────────────────────

    /// Fold the changed keys of `key`'s overlay into committed data.
    pub(crate) fn commit(&self, key: TxKey) {
        let mut state = self.state.lock();
        let Some(overlay) = state.overlays.remove(&key) else {
            return;
        };
        for k in overlay.changed {
            match overlay.view.get(&k) {
                Some(v) => state.committed.insert(k, v.clone()),
                None => state.committed.remove(&k),
            };
        }
    }

    pub(crate) fn rollback(&self, key: TxKey) {
        let mut state = self.state.lock();
        state.overlays.remove(&key);
        state.stale = false;
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        state.stale = true;
    }

    pub(crate) fn mark_stale(&self) {
        self.state.lock().stale = true;
    }

    /// Hook for a transaction that modified this entity, after commit or rollback.
    pub(crate) fn on_transaction_closed(&self, committed: bool) {
        let mut state = self.state.lock();
        state.adjacency.clear();
        if committed && state.deleted {
            state.committed.clear();
        }
        if !committed {
            state.deleted = false;
            state.stale = true;
        }
    }

    /// Hook for removal from the cache by eviction or expunge.
    pub(crate) fn on_removed_from_cache(&self) {
        let mut state = self.state.lock();
        state.stale = true;
        state.adjacency.clear();
    }

    pub(crate) fn cached_adjacency(&self, key: &AdjacencyKey) -> Option<Vec<Identity>> {
        self.state.lock().adjacency.get(key).cloned()
    }

    pub(crate) fn store_adjacency(&self, key: AdjacencyKey, ids: Vec<Identity>) {
        self.state.lock().adjacency.insert(key, ids);
    }

    pub(crate) fn clear_adjacency(&self) {
        self.state.lock().adjacency.clear();
    }

    #[cfg(test)]
    pub(crate) fn overlay_count(&self) -> usize {
        self.state.lock().overlays.len()
    }

    fn not_found(&self) -> GraphError {
        GraphError::entity_not_found(self.kind(), self.identity)
    }
}

/// Backtick-quote a label, type, or property name unless it is a plain identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}
