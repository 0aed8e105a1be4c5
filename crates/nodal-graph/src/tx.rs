//! Session transactions.
//!
//! A [`SessionTx`] owns one remote session plus the bookkeeping needed to keep
//! the shared entity caches consistent: which wrappers it read, which it
//! modified, and which identities it deleted. Every statement run through it
//! is logged, bounded by the transaction deadline, and classified; a
//! retryable failure closes the transaction on the spot.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use nodal_core::{EntityKind, Identity};

use crate::cache::GraphCaches;
use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::querylog::QueryLog;
use crate::session::{Field, Record, RemoteError, RemoteSession, Statement, StreamId};

/// Key of a transaction's overlays inside entity wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxKey(Uuid);

impl TxKey {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a statement ended.
#[derive(Debug)]
pub enum StatementOutcome<T> {
    Success(T),
    /// The transaction is no longer usable; the caller may retry it as a whole.
    Retryable(RemoteError),
    Failed(RemoteError),
}

impl<T> From<std::result::Result<T, RemoteError>> for StatementOutcome<T> {
    fn from(result: std::result::Result<T, RemoteError>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) if e.is_transient() => Self::Retryable(e),
            Err(e) => Self::Failed(e),
        }
    }
}

type EntityKey = (EntityKind, Identity);

fn entity_key(entity: &Entity) -> EntityKey {
    (entity.kind(), entity.identity())
}

async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> std::result::Result<T, RemoteError>
where
    F: Future<Output = std::result::Result<T, RemoteError>>,
{
    match deadline {
        None => fut.await,
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::transient(
                    "Neo.TransientError.Transaction.Terminated",
                    "transaction deadline exceeded",
                ))
            }),
    }
}

/// One unit of work against the database.
pub struct SessionTx {
    key: TxKey,
    session: Option<Box<dyn RemoteSession>>,
    caches: Arc<GraphCaches>,
    log: Arc<QueryLog>,
    accessed: HashMap<EntityKey, Vec<Arc<Entity>>>,
    modified: HashMap<EntityKey, Vec<Arc<Entity>>>,
    deleted_nodes: HashSet<Identity>,
    deleted_relationships: HashSet<Identity>,
    abandoned: Vec<StreamId>,
    deadline: Option<Instant>,
    succeeded: bool,
    closed: bool,
}

impl SessionTx {
    pub(crate) fn new(
        session: Box<dyn RemoteSession>,
        caches: Arc<GraphCaches>,
        log: Arc<QueryLog>,
        timeout: Option<Duration>,
    ) -> Self {
        let key = TxKey::new();
        tracing::debug!(tx = %key, ?timeout, "Transaction started");
        Self {
            key,
            session: Some(session),
            caches,
            log,
            accessed: HashMap::new(),
            modified: HashMap::new(),
            deleted_nodes: HashSet::new(),
            deleted_relationships: HashSet::new(),
            abandoned: Vec::new(),
            deadline: timeout.map(|t| Instant::now() + t),
            succeeded: false,
            closed: false,
        }
    }

    pub fn key(&self) -> TxKey {
        self.key
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Commit instead of rolling back on [`close`](Self::close).
    pub fn mark_successful(&mut self) {
        self.succeeded = true;
    }

    pub fn is_successful(&self) -> bool {
        self.succeeded
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed || self.session.is_none() {
            return Err(GraphError::NotInTransaction(format!(
                "transaction {} is closed",
                self.key
            )));
        }
        Ok(())
    }

    pub(crate) fn caches(&self) -> &GraphCaches {
        &self.caches
    }

    // ── Bookkeeping ──────────────────────────────────────────────

    pub(crate) fn accessed(&mut self, entity: &Arc<Entity>) {
        track(&mut self.accessed, entity);
    }

    pub(crate) fn modified(&mut self, entity: &Arc<Entity>) {
        track(&mut self.accessed, entity);
        track(&mut self.modified, entity);
    }

    /// The wrapper this transaction already holds for an identity, preferring one it modified.
    pub(crate) fn tracked(&self, kind: EntityKind, identity: Identity) -> Option<Arc<Entity>> {
        let key = (kind, identity);
        self.modified
            .get(&key)
            .or_else(|| self.accessed.get(&key))
            .and_then(|wrappers| wrappers.first())
            .cloned()
    }

    /// Record a deletion so reads in this transaction report it as absent.
    pub fn deleted(&mut self, entity: &Arc<Entity>) {
        self.deleted_identity(entity.kind(), entity.identity());
    }

    pub(crate) fn deleted_relationship(&mut self, identity: Identity) {
        self.deleted_identity(EntityKind::Relationship, identity);
    }

    pub(crate) fn deleted_identity(&mut self, kind: EntityKind, identity: Identity) {
        match kind {
            EntityKind::Node => self.deleted_nodes.insert(identity),
            EntityKind::Relationship => self.deleted_relationships.insert(identity),
        };
    }

    /// True once this transaction wrote or deleted anything.
    pub(crate) fn has_modifications(&self) -> bool {
        !self.modified.is_empty()
            || !self.deleted_nodes.is_empty()
            || !self.deleted_relationships.is_empty()
    }

    pub fn is_deleted(&self, entity: &Entity) -> bool {
        self.is_deleted_identity(entity.kind(), entity.identity())
    }

    pub fn is_deleted_identity(&self, kind: EntityKind, identity: Identity) -> bool {
        match kind {
            EntityKind::Node => self.deleted_nodes.contains(&identity),
            EntityKind::Relationship => self.deleted_relationships.contains(&identity),
        }
    }

    // ── Statement execution ──────────────────────────────────────

    fn session_mut(&mut self) -> Result<&mut Box<dyn RemoteSession>> {
        let key = self.key;
        self.session
            .as_mut()
            .ok_or_else(|| GraphError::NotInTransaction(format!("transaction {key} is closed")))
    }

    async fn prepare(&mut self, statement: &Statement) -> Result<()> {
        self.ensure_open()?;
        while let Some(stream) = self.abandoned.pop() {
            let deadline = self.deadline;
            let session = self.session_mut()?;
            let result = with_deadline(deadline, session.discard(stream)).await;
            self.resolve(StatementOutcome::from(result))?;
        }
        self.log.statement(statement);
        Ok(())
    }

    fn resolve<T>(&mut self, outcome: StatementOutcome<T>) -> Result<T> {
        match outcome {
            StatementOutcome::Success(v) => Ok(v),
            StatementOutcome::Retryable(err) => {
                tracing::warn!(tx = %self.key, error = %err, "Retryable failure, closing transaction");
                self.abort();
                Err(err.into())
            }
            StatementOutcome::Failed(err) => Err(err.into()),
        }
    }

    /// Close after a retryable failure: local rollback, remote rollback in the background.
    fn abort(&mut self) {
        self.closed = true;
        self.succeeded = false;
        self.rollback_bookkeeping();
        if let Some(session) = self.session.take() {
            release(session);
        }
    }

    /// Run a statement and collect every row.
    pub async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        self.prepare(statement).await?;
        let deadline = self.deadline;
        let session = self.session_mut()?;
        let result = with_deadline(deadline, session.run(statement)).await;
        self.resolve(StatementOutcome::from(result))
    }

    /// Run a statement for its side effects.
    pub async fn set(&mut self, statement: &Statement) -> Result<()> {
        self.run(statement).await.map(drop)
    }

    /// First column of the first row, if there is a row.
    pub async fn get_object(&mut self, statement: &Statement) -> Result<Option<Field>> {
        let column = first_column(statement)?;
        let records = self.run(statement).await?;
        Ok(records.into_iter().next().and_then(|mut r| r.take(&column)))
    }

    pub async fn get_long(&mut self, statement: &Statement) -> Result<i64> {
        match self.get_object(statement).await? {
            Some(Field::Value(v)) => v
                .as_i64()
                .ok_or_else(|| GraphError::data_format(format!("expected integer, got {}", v.type_name()))),
            Some(other) => Err(GraphError::data_format(format!("expected integer, got {other:?}"))),
            None => Err(GraphError::NotFound(format!("no row for {}", statement.name()))),
        }
    }

    pub async fn get_boolean(&mut self, statement: &Statement) -> Result<bool> {
        match self.get_object(statement).await? {
            Some(Field::Value(v)) => v
                .as_bool()
                .ok_or_else(|| GraphError::data_format(format!("expected boolean, got {}", v.type_name()))),
            Some(other) => Err(GraphError::data_format(format!("expected boolean, got {other:?}"))),
            None => Err(GraphError::NotFound(format!("no row for {}", statement.name()))),
        }
    }

    /// First column of every row.
    pub async fn get_list(&mut self, statement: &Statement) -> Result<Vec<Field>> {
        let column = first_column(statement)?;
        let records = self.run(statement).await?;
        Ok(records
            .into_iter()
            .filter_map(|mut r| r.take(&column))
            .collect())
    }

    /// The entity in the first column of the only expected row.
    pub async fn get_entity(&mut self, statement: &Statement) -> Result<Arc<Entity>> {
        let column = first_column(statement)?;
        let mut records = self.run(statement).await?;
        if records.len() > 1 {
            return Err(GraphError::data_format(format!(
                "{} returned {} rows, expected one",
                statement.name(),
                records.len()
            )));
        }
        match records.pop().and_then(|mut r| r.take(&column)) {
            Some(field) => self.map_entity(field),
            None => Err(GraphError::NotFound(format!("no row for {}", statement.name()))),
        }
    }

    pub async fn get_node(&mut self, statement: &Statement) -> Result<Arc<Entity>> {
        self.get_entity_of(statement, EntityKind::Node).await
    }

    pub async fn get_relationship(&mut self, statement: &Statement) -> Result<Arc<Entity>> {
        self.get_entity_of(statement, EntityKind::Relationship).await
    }

    async fn get_entity_of(&mut self, statement: &Statement, kind: EntityKind) -> Result<Arc<Entity>> {
        let entity = self.get_entity(statement).await?;
        if entity.kind() != kind {
            return Err(GraphError::data_format(format!(
                "{} returned a {}, expected a {kind}",
                statement.name(),
                entity.kind()
            )));
        }
        Ok(entity)
    }

    /// The entities in the first column of every row.
    pub async fn get_entities(&mut self, statement: &Statement) -> Result<Vec<Arc<Entity>>> {
        self.get_list(statement)
            .await?
            .into_iter()
            .filter(|f| !f.is_null())
            .map(|f| self.map_entity(f))
            .collect()
    }

    /// Map a node or relationship column to its unique wrapper.
    ///
    /// Rows read through this session may carry its pending writes, so an
    /// identity this transaction already holds maps back to that wrapper and
    /// its data is never offered to the shared cache.
    pub fn map_entity(&self, field: Field) -> Result<Arc<Entity>> {
        match field {
            Field::Node(data) => Ok(self
                .tracked(EntityKind::Node, data.identity)
                .unwrap_or_else(|| self.caches.resolve_node(data))),
            Field::Relationship(data) => Ok(self
                .tracked(EntityKind::Relationship, data.identity)
                .unwrap_or_else(|| self.caches.resolve_relationship(data))),
            other => Err(GraphError::data_format(format!(
                "expected node or relationship, got {other:?}"
            ))),
        }
    }

    /// Execute a statement and read its rows lazily.
    pub async fn cursor(&mut self, statement: &Statement) -> Result<RowCursor<'_>> {
        self.prepare(statement).await?;
        let deadline = self.deadline;
        let session = self.session_mut()?;
        let result = with_deadline(deadline, session.open(statement)).await;
        let stream = self.resolve(StatementOutcome::from(result))?;
        Ok(RowCursor {
            tx: self,
            stream: Some(stream),
        })
    }

    /// Deliver every row to `consumer` as it arrives. Returns the row count.
    pub async fn stream<F>(&mut self, statement: &Statement, mut consumer: F) -> Result<usize>
    where
        F: FnMut(Record) -> Result<()> + Send,
    {
        let mut cursor = self.cursor(statement).await?;
        let mut count = 0;
        while let Some(record) = cursor.next().await? {
            consumer(record)?;
            count += 1;
        }
        Ok(count)
    }

    // ── Close ────────────────────────────────────────────────────

    /// Commit if marked successful, otherwise roll back. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let drained = match self.prepare_close().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(tx = %self.key, error = %err, "Failed to drain open result streams");
                false
            }
        };
        self.closed = true;

        let Some(session) = self.session.take() else {
            self.rollback_bookkeeping();
            return Ok(());
        };

        if self.succeeded && drained {
            match session.commit().await {
                Ok(()) => {
                    self.commit_bookkeeping();
                    tracing::debug!(tx = %self.key, "Transaction committed");
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(tx = %self.key, error = %err, "Commit failed");
                    self.rollback_bookkeeping();
                    Err(err.into())
                }
            }
        } else {
            let result = session.rollback().await;
            self.rollback_bookkeeping();
            tracing::debug!(tx = %self.key, "Transaction rolled back");
            result.map_err(GraphError::from)
        }
    }

    async fn prepare_close(&mut self) -> Result<()> {
        while let Some(stream) = self.abandoned.pop() {
            let session = self.session_mut()?;
            session.discard(stream).await?;
        }
        Ok(())
    }

    fn commit_bookkeeping(&mut self) {
        let key = self.key;
        self.caches
            .expunge_all(EntityKind::Node, self.deleted_nodes.drain());
        self.caches
            .expunge_all(EntityKind::Relationship, self.deleted_relationships.drain());
        for entity in self.accessed.values().flatten() {
            entity.commit(key);
        }
        for entity in self.modified.values().flatten() {
            self.caches.invalidate_dependents(entity);
            self.caches.supersede(entity);
            entity.on_transaction_closed(true);
        }
        self.accessed.clear();
        self.modified.clear();
    }

    fn rollback_bookkeeping(&mut self) {
        let key = self.key;
        for entity in self.accessed.values().flatten() {
            entity.rollback(key);
            self.caches.expunge(entity.kind(), entity.identity());
        }
        for entity in self.modified.values().flatten() {
            self.caches.invalidate_dependents(entity);
            entity.on_transaction_closed(false);
        }
        self.accessed.clear();
        self.modified.clear();
        self.deleted_nodes.clear();
        self.deleted_relationships.clear();
        self.abandoned.clear();
    }
}

fn track(wrappers: &mut HashMap<EntityKey, Vec<Arc<Entity>>>, entity: &Arc<Entity>) {
    let held = wrappers.entry(entity_key(entity)).or_default();
    if !held.iter().any(|w| Arc::ptr_eq(w, entity)) {
        held.push(entity.clone());
    }
}

impl fmt::Debug for SessionTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTx")
            .field("key", &self.key)
            .field("closed", &self.closed)
            .field("succeeded", &self.succeeded)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionTx {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(tx = %self.key, "Transaction dropped without close, rolling back");
        self.closed = true;
        self.rollback_bookkeeping();
        if let Some(session) = self.session.take() {
            release(session);
        }
    }
}

/// Roll back a session nobody waits for.
fn release(session: Box<dyn RemoteSession>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = session.rollback().await {
                    tracing::debug!(error = %err, "Background rollback failed");
                }
            });
        }
        Err(_) => tracing::debug!("No runtime for background rollback, dropping session"),
    }
}

fn first_column(statement: &Statement) -> Result<String> {
    statement
        .columns()
        .first()
        .cloned()
        .ok_or_else(|| GraphError::Config(format!("statement {} declares no columns", statement.name())))
}

/// Forward-only row cursor over an open result stream.
///
/// Dropping it early discards the unread rows before the next statement.
pub struct RowCursor<'tx> {
    tx: &'tx mut SessionTx,
    stream: Option<StreamId>,
}

impl RowCursor<'_> {
    pub async fn next(&mut self) -> Result<Option<Record>> {
        let Some(stream) = self.stream else {
            return Ok(None);
        };
        let deadline = self.tx.deadline;
        let session = self.tx.session_mut()?;
        let result = with_deadline(deadline, session.pull(stream)).await;
        match self.tx.resolve(StatementOutcome::from(result)) {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.stream = None;
                Ok(None)
            }
            Err(err) => {
                self.stream = None;
                Err(err)
            }
        }
    }

    pub fn map_entity(&self, field: Field) -> Result<Arc<Entity>> {
        self.tx.map_entity(field)
    }
}

impl Drop for RowCursor<'_> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.tx.abandoned.push(stream);
        }
    }
}
