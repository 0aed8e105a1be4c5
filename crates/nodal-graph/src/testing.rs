//! In-memory stand-in for the remote database.
//!
//! [`FakeGraph`] interprets the statements this crate issues, keyed by
//! statement name. Committed state is shared; each session keeps its own
//! pending writes on top of it, so other sessions read committed data only.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nodal_core::{EntityKind, Identity, PropertyMap, Settings, Value};

use crate::database::GraphDatabase;
use crate::session::{
    Driver, Field, NodeData, Param, Record, RelationshipData, RemoteError, RemoteErrorKind,
    RemoteSession, Statement, StreamId,
};

pub fn props<'a, I>(entries: I) -> PropertyMap
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Debug, Clone)]
struct FakeNode {
    labels: Vec<String>,
    properties: PropertyMap,
}

#[derive(Debug, Clone)]
struct FakeRel {
    rel_type: String,
    start: i64,
    end: i64,
    properties: PropertyMap,
}

#[derive(Debug, Clone)]
enum Op {
    CreateNode { id: i64, node: FakeNode },
    CreateRel { id: i64, rel: FakeRel },
    Set {
        kind: EntityKind,
        id: i64,
        changes: Vec<(String, Option<Value>)>,
    },
    DeleteNode { id: i64 },
    DeleteRel { id: i64 },
}

#[derive(Debug, Clone, Default)]
struct Store {
    nodes: BTreeMap<i64, FakeNode>,
    rels: BTreeMap<i64, FakeRel>,
}

impl Store {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::CreateNode { id, node } => {
                self.nodes.insert(*id, node.clone());
            }
            Op::CreateRel { id, rel } => {
                self.rels.insert(*id, rel.clone());
            }
            Op::Set { kind, id, changes } => {
                let properties = match kind {
                    EntityKind::Node => self.nodes.get_mut(id).map(|n| &mut n.properties),
                    EntityKind::Relationship => self.rels.get_mut(id).map(|r| &mut r.properties),
                };
                if let Some(properties) = properties {
                    for (key, value) in changes {
                        match value {
                            Some(v) => properties.insert(key.clone(), v.clone()),
                            None => properties.remove(key),
                        };
                    }
                }
            }
            Op::DeleteNode { id } => {
                self.nodes.remove(id);
                self.rels.retain(|_, r| r.start != *id && r.end != *id);
            }
            Op::DeleteRel { id } => {
                self.rels.remove(id);
            }
        }
    }

    fn attached(&self, node: i64) -> Vec<i64> {
        self.rels
            .iter()
            .filter(|(_, r)| r.start == node || r.end == node)
            .map(|(id, _)| *id)
            .collect()
    }

    fn node_field(&self, id: i64) -> Option<Field> {
        self.nodes.get(&id).map(|node| {
            Field::Node(NodeData {
                identity: Identity(id),
                labels: node.labels.clone(),
                properties: node.properties.clone(),
            })
        })
    }

    fn rel_field(&self, id: i64) -> Option<Field> {
        self.rels.get(&id).map(|rel| {
            Field::Relationship(RelationshipData {
                identity: Identity(id),
                rel_type: rel.rel_type.clone(),
                start: Identity(rel.start),
                end: Identity(rel.end),
                properties: rel.properties.clone(),
            })
        })
    }
}

#[derive(Default)]
struct Shared {
    store: Store,
    next_id: i64,
    log: Vec<Statement>,
    commits: usize,
    rollbacks: usize,
    discards: usize,
    fail_next: Option<RemoteError>,
    fail_on: Vec<(String, RemoteError)>,
    fail_commit: Option<RemoteError>,
    rejected: HashSet<String>,
    delay: Option<Duration>,
    indexes: BTreeMap<String, (String, String, String)>,
}

impl Shared {
    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Record the statement and apply failure injection.
    fn receive(&mut self, statement: &Statement) -> Result<Option<Duration>, RemoteError> {
        self.log.push(statement.clone());
        if self.rejected.contains(statement.name()) {
            return Err(RemoteError::from_code(
                "Neo.ClientError.Statement.SyntaxError",
                format!("{} rejected", statement.name()),
            ));
        }
        if let Some(pos) = self.fail_on.iter().position(|(n, _)| n == statement.name()) {
            return Err(self.fail_on.remove(pos).1);
        }
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        Ok(self.delay)
    }
}

/// Shared handle to one fake database.
#[derive(Clone, Default)]
pub struct FakeGraph {
    shared: Arc<Mutex<Shared>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        let graph = Self::default();
        graph.shared.lock().next_id = 1;
        graph
    }

    pub fn seed_node(&self, labels: &[&str], properties: PropertyMap) -> Identity {
        let mut shared = self.shared.lock();
        let id = shared.allocate();
        shared.store.apply(&Op::CreateNode {
            id,
            node: FakeNode {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                properties,
            },
        });
        Identity(id)
    }

    pub fn seed_relationship(
        &self,
        start: Identity,
        end: Identity,
        rel_type: &str,
        properties: PropertyMap,
    ) -> Identity {
        let mut shared = self.shared.lock();
        let id = shared.allocate();
        shared.store.apply(&Op::CreateRel {
            id,
            rel: FakeRel {
                rel_type: rel_type.to_string(),
                start: start.0,
                end: end.0,
                properties,
            },
        });
        Identity(id)
    }

    pub async fn database(&self) -> GraphDatabase {
        self.database_with(Settings::default()).await
    }

    pub async fn database_with_capacity(&self, node_capacity: usize) -> GraphDatabase {
        let mut settings = Settings::default();
        settings.cache.node_capacity = node_capacity;
        self.database_with(settings).await
    }

    async fn database_with(&self, settings: Settings) -> GraphDatabase {
        let db = GraphDatabase::with_driver(self.driver(), &settings)
            .await
            .expect("fake database");
        let mut shared = self.shared.lock();
        shared.log.clear();
        shared.commits = 0;
        shared.rollbacks = 0;
        shared.discards = 0;
        db
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(self.clone())
    }

    pub fn statement_count(&self, name: &str) -> usize {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|s| s.name() == name)
            .count()
    }

    pub fn last_statement(&self, name: &str) -> Option<Statement> {
        self.shared
            .lock()
            .log
            .iter()
            .rev()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Committed properties of a node.
    pub fn node_properties(&self, id: Identity) -> Option<PropertyMap> {
        self.shared
            .lock()
            .store
            .nodes
            .get(&id.0)
            .map(|n| n.properties.clone())
    }

    pub fn commits(&self) -> usize {
        self.shared.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.lock().rollbacks
    }

    pub fn discards(&self) -> usize {
        self.shared.lock().discards
    }

    /// Change committed data behind every session's back.
    pub fn update_node(&self, id: Identity, key: &str, value: impl Into<Value>) {
        self.shared.lock().store.apply(&Op::Set {
            kind: EntityKind::Node,
            id: id.0,
            changes: vec![(key.to_string(), Some(value.into()))],
        });
    }

    pub fn remove_node(&self, id: Identity) {
        self.shared.lock().store.apply(&Op::DeleteNode { id: id.0 });
    }

    pub fn fail_next(&self, err: RemoteError) {
        self.shared.lock().fail_next = Some(err);
    }

    /// Fail the next statement called `name`.
    pub fn fail_on(&self, name: &str, err: RemoteError) {
        self.shared.lock().fail_on.push((name.to_string(), err));
    }

    pub fn fail_commit(&self, err: RemoteError) {
        self.shared.lock().fail_commit = Some(err);
    }

    pub fn reject_statement(&self, name: &str) {
        self.shared.lock().rejected.insert(name.to_string());
    }

    pub fn delay_statements(&self, delay: Duration) {
        self.shared.lock().delay = Some(delay);
    }

    /// Existing indexes as `(name, label, property, state)`.
    pub fn set_live_indexes(&self, indexes: Vec<(&str, &str, &str, &str)>) {
        self.shared.lock().indexes = indexes
            .into_iter()
            .map(|(name, label, property, state)| {
                (
                    name.to_string(),
                    (label.to_string(), property.to_string(), state.to_string()),
                )
            })
            .collect();
    }
}

#[async_trait]
impl Driver for FakeGraph {
    async fn begin(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        Ok(Box::new(FakeSession {
            shared: self.shared.clone(),
            ops: Vec::new(),
            streams: HashMap::new(),
            next_stream: 0,
        }))
    }
}

struct FakeSession {
    shared: Arc<Mutex<Shared>>,
    ops: Vec<Op>,
    streams: HashMap<u64, VecDeque<Record>>,
    next_stream: u64,
}

impl FakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Record>, RemoteError> {
        let delay = self.shared.lock().receive(statement)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.shared.lock();
        let mut view = shared.store.clone();
        for op in &self.ops {
            view.apply(op);
        }
        let mut exec = Exec {
            view,
            ops: Vec::new(),
            shared: &mut *shared,
        };
        let records = exec.statement(statement)?;
        let ops = exec.ops;
        self.ops.extend(ops);
        Ok(records)
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>, RemoteError> {
        self.execute(statement).await
    }

    async fn open(&mut self, statement: &Statement) -> Result<StreamId, RemoteError> {
        let rows = self.execute(statement).await?;
        let id = self.next_stream;
        self.next_stream += 1;
        self.streams.insert(id, rows.into());
        Ok(StreamId(id))
    }

    async fn pull(&mut self, stream: StreamId) -> Result<Option<Record>, RemoteError> {
        let Some(rows) = self.streams.get_mut(&stream.0) else {
            return Ok(None);
        };
        let row = rows.pop_front();
        if row.is_none() {
            self.streams.remove(&stream.0);
        }
        Ok(row)
    }

    async fn discard(&mut self, stream: StreamId) -> Result<(), RemoteError> {
        self.streams.remove(&stream.0);
        self.shared.lock().discards += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RemoteError> {
        let mut shared = self.shared.lock();
        if let Some(err) = shared.fail_commit.take() {
            return Err(err);
        }
        for op in &self.ops {
            shared.store.apply(op);
        }
        shared.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RemoteError> {
        self.shared.lock().rollbacks += 1;
        Ok(())
    }
}

/// One statement evaluated against a session's view.
struct Exec<'a> {
    view: Store,
    ops: Vec<Op>,
    shared: &'a mut Shared,
}

impl Exec<'_> {
    fn write(&mut self, op: Op) {
        self.view.apply(&op);
        self.ops.push(op);
    }

    fn statement(&mut self, statement: &Statement) -> Result<Vec<Record>, RemoteError> {
        let text = statement.text();
        let name = statement.name();
        let records = match name {
            "ping" => vec![Record::new().with("ping", Field::Value(Value::Integer(1)))],
            _ if name.starts_with("probe.") => {
                vec![Record::new().with("probe", Field::Value(Value::Boolean(true)))]
            }

            "node.create" => {
                let labels = parse_labels(text, "CREATE (n");
                let id = self.create_node(labels, map_param(statement, "props"));
                self.rows("n", [self.view.node_field(id)])
            }
            "node.create_with_owner" => {
                let owner = id_param(statement, "owner");
                if !self.view.nodes.contains_key(&owner) {
                    return Ok(Vec::new());
                }
                let labels = parse_labels(text, "->(n");
                let node = self.create_node(labels, map_param(statement, "props"));
                let owns = self.create_rel("OWNS", owner, node, PropertyMap::new());
                let security = self.create_rel("SECURITY", owner, node, map_param(statement, "securityProps"));
                let mut record = Record::new();
                for (column, field) in [
                    ("n", self.view.node_field(node)),
                    ("owns", self.view.rel_field(owns)),
                    ("security", self.view.rel_field(security)),
                ] {
                    record.insert(column, field.unwrap_or(Field::Null));
                }
                vec![record]
            }
            "relationship.create" => {
                let start = id_param(statement, "start");
                let end = id_param(statement, "end");
                if !self.view.nodes.contains_key(&start) || !self.view.nodes.contains_key(&end) {
                    return Ok(Vec::new());
                }
                let rel_type = parse_labels(text, "[n").into_iter().next().unwrap_or_default();
                let id = self.create_rel(&rel_type, start, end, map_param(statement, "props"));
                self.rows("n", [self.view.rel_field(id)])
            }

            "node.set_property" | "relationship.set_property" => {
                let key = between(text, "SET n.", " = $value").map(unquote).unwrap_or_default();
                let value = statement.parameters().get("value").and_then(Param::as_value).cloned();
                self.set(statement, vec![(key, value)]);
                Vec::new()
            }
            "node.set_properties" | "relationship.set_properties" => {
                let changes = match statement.parameters().get("props") {
                    Some(Param::Map(map)) => map
                        .iter()
                        .map(|(k, v)| (k.clone(), v.as_value().cloned()))
                        .collect(),
                    _ => Vec::new(),
                };
                self.set(statement, changes);
                Vec::new()
            }

            "node.delete" => {
                let id = id_param(statement, "id");
                let attached = self.view.attached(id);
                if text.contains("DETACH") {
                    if !self.view.nodes.contains_key(&id) {
                        return Ok(Vec::new());
                    }
                    self.write(Op::DeleteNode { id });
                    vec![Record::new().with("rels", Field::Value(Value::IntegerArray(attached)))]
                } else if !attached.is_empty() {
                    return Err(RemoteError::from_code(
                        "Neo.ClientError.Schema.ConstraintValidationFailed",
                        format!("node {id} still has relationships"),
                    ));
                } else {
                    self.write(Op::DeleteNode { id });
                    Vec::new()
                }
            }
            "relationship.delete" => {
                self.write(Op::DeleteRel {
                    id: id_param(statement, "id"),
                });
                Vec::new()
            }

            "node.refresh" | "node.fetch" => {
                let field = self.view.node_field(id_param(statement, "id"));
                self.rows("n", [field])
            }
            "relationship.refresh" | "relationship.fetch" => {
                let field = self.view.rel_field(id_param(statement, "id"));
                self.rows("n", [field])
            }
            "nodes.all" => {
                let fields: Vec<_> = self.view.nodes.keys().map(|id| self.view.node_field(*id)).collect();
                self.rows("n", fields)
            }
            "relationships.all" => {
                let fields: Vec<_> = self.view.rels.keys().map(|id| self.view.rel_field(*id)).collect();
                self.rows("n", fields)
            }
            "nodes.by_label" => {
                let labels = parse_labels(text, "MATCH (n");
                let fields: Vec<_> = self
                    .matching(&labels)
                    .into_iter()
                    .map(|id| self.view.node_field(id))
                    .collect();
                self.rows("n", fields)
            }
            "nodes.count" => {
                let labels = parse_labels(text, "MATCH (n");
                let count = self.matching(&labels).len() as i64;
                vec![Record::new().with("count", Field::Value(Value::Integer(count)))]
            }
            "relationships.adjacent" => {
                let node = id_param(statement, "id");
                let rel_type = parse_labels(text, "[n").into_iter().next();
                let outgoing = !text.contains("(s)<-[");
                let incoming = !text.contains("]->(t)");
                let fields: Vec<_> = self
                    .view
                    .rels
                    .iter()
                    .filter(|(_, r)| rel_type.as_ref().map_or(true, |t| &r.rel_type == t))
                    .filter(|(_, r)| (outgoing && r.start == node) || (incoming && r.end == node))
                    .map(|(id, _)| self.view.rel_field(*id))
                    .collect();
                self.rows("n", fields)
            }
            "nodes.delete_by_label" => {
                let labels = parse_labels(text, "MATCH (n");
                let mut records = Vec::new();
                for id in self.matching(&labels) {
                    let attached = self.view.attached(id);
                    self.write(Op::DeleteNode { id });
                    records.push(
                        Record::new()
                            .with("id", Field::Value(Value::Integer(id)))
                            .with("rels", Field::Value(Value::IntegerArray(attached))),
                    );
                }
                records
            }
            "query" => self.query(statement),

            "index.list" => self
                .shared
                .indexes
                .iter()
                .map(|(name, (label, property, state))| {
                    Record::new()
                        .with("name", Field::Value(Value::from(name.as_str())))
                        .with("labelsOrTypes", Field::Value(Value::StringArray(vec![label.clone()])))
                        .with("properties", Field::Value(Value::StringArray(vec![property.clone()])))
                        .with("state", Field::Value(Value::from(state.as_str())))
                })
                .collect(),
            "index.create" => {
                let name = between(text, "CREATE INDEX ", " IF NOT EXISTS").map(unquote).unwrap_or_default();
                let label = parse_labels(text, "FOR (n").into_iter().next().unwrap_or_default();
                let property = between(text, "ON (n.", ")").map(unquote).unwrap_or_default();
                self.shared
                    .indexes
                    .entry(name)
                    .or_insert((label, property, "ONLINE".to_string()));
                Vec::new()
            }
            "index.drop" => {
                if let Some(name) = between(text, "DROP INDEX ", " IF EXISTS") {
                    self.shared.indexes.remove(&unquote(name));
                }
                Vec::new()
            }

            other => {
                return Err(RemoteError::new(
                    RemoteErrorKind::Client,
                    "Neo.ClientError.Statement.SyntaxError",
                    format!("fake graph cannot interpret {other}"),
                ))
            }
        };
        Ok(records)
    }

    fn create_node(&mut self, labels: Vec<String>, properties: PropertyMap) -> i64 {
        let id = self.shared.allocate();
        self.write(Op::CreateNode {
            id,
            node: FakeNode { labels, properties },
        });
        id
    }

    fn create_rel(&mut self, rel_type: &str, start: i64, end: i64, properties: PropertyMap) -> i64 {
        let id = self.shared.allocate();
        self.write(Op::CreateRel {
            id,
            rel: FakeRel {
                rel_type: rel_type.to_string(),
                start,
                end,
                properties,
            },
        });
        id
    }

    fn set(&mut self, statement: &Statement, changes: Vec<(String, Option<Value>)>) {
        let kind = if statement.name().starts_with("node.") {
            EntityKind::Node
        } else {
            EntityKind::Relationship
        };
        self.write(Op::Set {
            kind,
            id: id_param(statement, "id"),
            changes,
        });
    }

    fn matching(&self, labels: &[String]) -> Vec<i64> {
        self.view
            .nodes
            .iter()
            .filter(|(_, n)| labels.iter().all(|l| n.labels.contains(l)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Union of every `MATCH (n:...)` branch, filtered by its `n.key = $param`
    /// conjuncts, ordered by `sortKey0` then id, with paging applied.
    fn query(&self, statement: &Statement) -> Vec<Record> {
        let text = statement.text();
        let equalities = equality_predicates(statement);
        let mut ids: Vec<i64> = text
            .match_indices("MATCH (n")
            .flat_map(|(pos, _)| self.matching(&parse_labels(&text[pos..], "MATCH (n")))
            .filter(|id| {
                let properties = &self.view.nodes[id].properties;
                equalities
                    .iter()
                    .all(|(key, value)| properties.get(key) == Some(value))
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();

        if let Some(key) = sort_key(text) {
            let descending = text.contains("sortKey0 DESC");
            ids.sort_by(|a, b| {
                let ordering = compare_values(
                    self.view.nodes[a].properties.get(&key),
                    self.view.nodes[b].properties.get(&key),
                );
                let ordering = if descending { ordering.reverse() } else { ordering };
                ordering.then(a.cmp(b))
            });
        }

        let skip = number_after(text, " SKIP ").unwrap_or(0);
        let limit = number_after(text, " LIMIT ").unwrap_or(usize::MAX);
        let fields: Vec<_> = ids
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|id| self.view.node_field(id))
            .collect();
        self.rows("n", fields)
    }

    fn rows(&self, column: &str, fields: impl IntoIterator<Item = Option<Field>>) -> Vec<Record> {
        fields
            .into_iter()
            .flatten()
            .map(|field| Record::new().with(column, field))
            .collect()
    }
}

fn id_param(statement: &Statement, key: &str) -> i64 {
    statement
        .parameters()
        .get(key)
        .and_then(Param::as_value)
        .and_then(Value::wire_integer)
        .unwrap_or(-1)
}

fn map_param(statement: &Statement, key: &str) -> PropertyMap {
    match statement.parameters().get(key) {
        Some(Param::Map(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|v| (k.clone(), v.clone())))
            .collect(),
        _ => PropertyMap::new(),
    }
}

/// `n.key = $param` conjuncts of a statement's filter.
fn equality_predicates(statement: &Statement) -> Vec<(String, Value)> {
    let text = statement.text();
    text.match_indices(" = $")
        .filter_map(|(pos, marker)| {
            let operand = text[..pos].rsplit([' ', '(']).next()?;
            if operand.ends_with(')') {
                return None;
            }
            let key = unquote(operand.strip_prefix("n.")?);
            let param: String = text[pos + marker.len()..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            let value = statement.parameters().get(&param)?.as_value()?.clone();
            Some((key, value))
        })
        .collect()
}

/// Property projected as `sortKey0`.
fn sort_key(text: &str) -> Option<String> {
    let pos = text.find(" AS sortKey0")?;
    let operand = text[..pos].rsplit(", ").next()?;
    operand.strip_prefix("n.").map(unquote)
}

/// Missing values sort last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.as_str(), b.as_str()) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b))
                .unwrap_or(Ordering::Equal),
        },
    }
}

fn between<'t>(text: &'t str, start: &str, end: &str) -> Option<&'t str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

fn number_after(text: &str, marker: &str) -> Option<usize> {
    let pos = text.rfind(marker)? + marker.len();
    text[pos..].split_whitespace().next()?.parse().ok()
}

fn unquote(name: &str) -> String {
    match name.strip_prefix('`').and_then(|n| n.strip_suffix('`')) {
        Some(inner) => inner.replace("``", "`"),
        None => name.to_string(),
    }
}

/// `:A:B` label or type list directly after the first occurrence of `anchor`.
fn parse_labels(text: &str, anchor: &str) -> Vec<String> {
    let Some(pos) = text.find(anchor) else {
        return Vec::new();
    };
    let mut rest = &text[pos + anchor.len()..];
    let mut labels = Vec::new();
    while let Some(tail) = rest.strip_prefix(':') {
        let (label, after) = read_identifier(tail);
        labels.push(label);
        rest = after;
    }
    labels
}

fn read_identifier(text: &str) -> (String, &str) {
    if let Some(quoted) = text.strip_prefix('`') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '`' {
                if matches!(chars.peek(), Some((_, '`'))) {
                    name.push('`');
                    chars.next();
                    continue;
                }
                return (name, &quoted[i + 1..]);
            }
            name.push(c);
        }
        return (name, "");
    }
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    (text[..end].to_string(), &text[end..])
}
