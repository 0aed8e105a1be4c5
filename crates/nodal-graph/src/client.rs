//! Neo4j connection management and the Bolt-backed remote session.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, RowStream, Txn};

use nodal_core::config::GraphConfig;
use nodal_core::{Identity, PropertyMap, Value};

use crate::error::{GraphError, Result};
use crate::session::{
    Driver, Field, NodeData, Param, Record, RelationshipData, RemoteError, RemoteSession, Statement,
    StreamId,
};

/// Thread-safe Neo4j driver with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct BoltDriver {
    graph: Graph,
}

impl BoltDriver {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Config(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

#[async_trait]
impl Driver for BoltDriver {
    async fn begin(&self) -> std::result::Result<Box<dyn RemoteSession>, RemoteError> {
        let txn = self.graph.start_txn().await.map_err(classify_error)?;
        Ok(Box::new(BoltSession {
            txn,
            streams: HashMap::new(),
            next_stream: 0,
        }))
    }
}

struct OpenStream {
    rows: RowStream,
    columns: Vec<String>,
}

/// One explicit Bolt transaction.
struct BoltSession {
    txn: Txn,
    streams: HashMap<u64, OpenStream>,
    next_stream: u64,
}

#[async_trait]
impl RemoteSession for BoltSession {
    async fn run(&mut self, statement: &Statement) -> std::result::Result<Vec<Record>, RemoteError> {
        if statement.columns().is_empty() {
            self.txn
                .run(to_query(statement))
                .await
                .map_err(classify_error)?;
            return Ok(Vec::new());
        }

        let mut stream = self
            .txn
            .execute(to_query(statement))
            .await
            .map_err(classify_error)?;
        let mut records = Vec::new();
        while let Some(row) = stream
            .next(self.txn.handle())
            .await
            .map_err(classify_error)?
        {
            records.push(convert_row(&row, statement.columns())?);
        }
        Ok(records)
    }

    async fn open(&mut self, statement: &Statement) -> std::result::Result<StreamId, RemoteError> {
        let rows = self
            .txn
            .execute(to_query(statement))
            .await
            .map_err(classify_error)?;
        let id = self.next_stream;
        self.next_stream += 1;
        self.streams.insert(
            id,
            OpenStream {
                rows,
                columns: statement.columns().to_vec(),
            },
        );
        Ok(StreamId(id))
    }

    async fn pull(&mut self, stream: StreamId) -> std::result::Result<Option<Record>, RemoteError> {
        let Some(open) = self.streams.get_mut(&stream.0) else {
            return Ok(None);
        };
        match open
            .rows
            .next(self.txn.handle())
            .await
            .map_err(classify_error)?
        {
            Some(row) => convert_row(&row, &open.columns).map(Some),
            None => {
                self.streams.remove(&stream.0);
                Ok(None)
            }
        }
    }

    async fn discard(&mut self, stream: StreamId) -> std::result::Result<(), RemoteError> {
        let Some(mut open) = self.streams.remove(&stream.0) else {
            return Ok(());
        };
        // The server keeps buffered results until the stream is consumed.
        while open
            .rows
            .next(self.txn.handle())
            .await
            .map_err(classify_error)?
            .is_some()
        {}
        Ok(())
    }

    async fn commit(self: Box<Self>) -> std::result::Result<(), RemoteError> {
        self.txn.commit().await.map_err(classify_error)
    }

    async fn rollback(self: Box<Self>) -> std::result::Result<(), RemoteError> {
        self.txn.rollback().await.map_err(classify_error)
    }
}

fn classify_error(err: neo4rs::Error) -> RemoteError {
    match &err {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            RemoteError::network(err.to_string())
        }
        _ => RemoteError::from_message(err.to_string()),
    }
}

fn to_query(statement: &Statement) -> Query {
    statement
        .parameters()
        .iter()
        .fold(neo4rs::query(statement.text()), |q, (key, param)| {
            q.param(key, param_to_bolt(param))
        })
}

// ── Outbound conversion ──────────────────────────────────────────

fn list(items: Vec<BoltType>) -> BoltType {
    BoltType::List(BoltList { value: items })
}

fn param_to_bolt(param: &Param) -> BoltType {
    match param {
        Param::Null => BoltType::Null(BoltNull),
        Param::Value(v) => value_to_bolt(v),
        Param::List(items) => list(items.iter().map(param_to_bolt).collect()),
        Param::Map(map) => BoltType::Map(BoltMap {
            value: map
                .iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), param_to_bolt(v)))
                .collect(),
        }),
    }
}

/// Timestamps and references travel as plain integers.
fn value_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Integer(i) => BoltType::from(*i),
        Value::Float(f) => BoltType::from(*f),
        Value::Boolean(b) => BoltType::from(*b),
        Value::Timestamp(t) => BoltType::from(t.timestamp_millis()),
        Value::Reference(id) => BoltType::from(id.0),
        Value::StringArray(v) => list(v.iter().map(|s| BoltType::from(s.as_str())).collect()),
        Value::FloatArray(v) => list(v.iter().map(|f| BoltType::from(*f)).collect()),
        Value::BooleanArray(v) => list(v.iter().map(|b| BoltType::from(*b)).collect()),
        Value::IntegerArray(_) | Value::TimestampArray(_) | Value::References(_) => list(
            value
                .wire_integers()
                .unwrap_or_default()
                .into_iter()
                .map(BoltType::from)
                .collect(),
        ),
    }
}

// ── Inbound conversion ───────────────────────────────────────────

fn decode_error(column: &str, err: impl std::fmt::Display) -> RemoteError {
    RemoteError::data_format(format!("cannot decode column {column}: {err}"))
}

fn convert_row(row: &neo4rs::Row, columns: &[String]) -> std::result::Result<Record, RemoteError> {
    let mut record = Record::new();
    for column in columns {
        let field = if let Ok(node) = row.get::<neo4rs::Node>(column) {
            Field::Node(node_data(&node)?)
        } else if let Ok(rel) = row.get::<neo4rs::Relation>(column) {
            Field::Relationship(relationship_data(&rel)?)
        } else {
            let value = row
                .get::<BoltType>(column)
                .map_err(|e| decode_error(column, e))?;
            bolt_to_field(value)?
        };
        record.insert(column, field);
    }
    Ok(record)
}

fn node_data(node: &neo4rs::Node) -> std::result::Result<NodeData, RemoteError> {
    let mut properties = PropertyMap::new();
    for key in node.keys() {
        let value = node
            .get::<BoltType>(key)
            .map_err(|e| decode_error(key, e))?;
        if let Some(v) = bolt_to_property(key, value)? {
            properties.insert(key.to_string(), v);
        }
    }
    Ok(NodeData {
        identity: Identity(node.id()),
        labels: node.labels().into_iter().map(str::to_string).collect(),
        properties,
    })
}

fn relationship_data(rel: &neo4rs::Relation) -> std::result::Result<RelationshipData, RemoteError> {
    let mut properties = PropertyMap::new();
    for key in rel.keys() {
        let value = rel.get::<BoltType>(key).map_err(|e| decode_error(key, e))?;
        if let Some(v) = bolt_to_property(key, value)? {
            properties.insert(key.to_string(), v);
        }
    }
    Ok(RelationshipData {
        identity: Identity(rel.id()),
        rel_type: rel.typ().to_string(),
        start: Identity(rel.start_node_id()),
        end: Identity(rel.end_node_id()),
        properties,
    })
}

fn bolt_properties(map: BoltMap) -> std::result::Result<PropertyMap, RemoteError> {
    let mut properties = PropertyMap::new();
    for (key, value) in map.value {
        if let Some(v) = bolt_to_property(&key.value, value)? {
            properties.insert(key.value, v);
        }
    }
    Ok(properties)
}

/// A stored property; null is absence.
fn bolt_to_property(key: &str, value: BoltType) -> std::result::Result<Option<Value>, RemoteError> {
    match bolt_to_field(value)? {
        Field::Null => Ok(None),
        Field::Value(v) => Ok(Some(v)),
        other => Err(RemoteError::data_format(format!(
            "property {key} has unsupported value {other:?}"
        ))),
    }
}

fn bolt_to_field(value: BoltType) -> std::result::Result<Field, RemoteError> {
    let field = match value {
        BoltType::Null(_) => Field::Null,
        BoltType::String(s) => Field::Value(Value::String(s.value)),
        BoltType::Integer(i) => Field::Value(Value::Integer(i.value)),
        BoltType::Float(f) => Field::Value(Value::Float(f.value)),
        BoltType::Boolean(b) => Field::Value(Value::Boolean(b.value)),
        BoltType::List(items) => {
            let fields = items
                .value
                .into_iter()
                .map(bolt_to_field)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let scalars: Option<Vec<Value>> = fields
                .iter()
                .map(|f| f.as_value().filter(|v| !v.is_array()).cloned())
                .collect();
            match scalars.and_then(Value::from_list) {
                Some(array) => Field::Value(array),
                None => Field::List(fields),
            }
        }
        BoltType::Map(map) => Field::Map(
            map.value
                .into_iter()
                .map(|(k, v)| Ok((k.value, bolt_to_field(v)?)))
                .collect::<std::result::Result<_, RemoteError>>()?,
        ),
        BoltType::Node(node) => Field::Node(NodeData {
            identity: Identity(node.id.value),
            labels: node
                .labels
                .value
                .into_iter()
                .filter_map(|label| match label {
                    BoltType::String(s) => Some(s.value),
                    _ => None,
                })
                .collect(),
            properties: bolt_properties(node.properties)?,
        }),
        BoltType::Relation(rel) => Field::Relationship(RelationshipData {
            identity: Identity(rel.id.value),
            rel_type: rel.typ.value,
            start: Identity(rel.start_node_id.value),
            end: Identity(rel.end_node_id.value),
            properties: bolt_properties(rel.properties)?,
        }),
        other => {
            return Err(RemoteError::data_format(format!(
                "unsupported value type: {other:?}"
            )))
        }
    };
    Ok(field)
}
