//! Remote session abstraction.
//!
//! A [`Driver`] opens [`RemoteSession`]s; each session wraps exactly one
//! remote transaction and offers run / stream / commit / rollback. The Bolt
//! implementation lives in [`crate::client`]; everything above this module
//! only sees [`Statement`]s going in and [`Record`]s coming out.

use std::collections::BTreeMap;

use async_trait::async_trait;

use nodal_core::{Identity, PropertyMap, Value};

/// Named statement parameters.
pub type Params = BTreeMap<String, Param>;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Value(Value),
    Map(Params),
    List(Vec<Param>),
}

impl Param {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Option<Value>> for Param {
    fn from(v: Option<Value>) -> Self {
        v.map_or(Self::Null, Self::Value)
    }
}

impl From<PropertyMap> for Param {
    fn from(map: PropertyMap) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, Self::Value(v))).collect())
    }
}

impl From<Identity> for Param {
    fn from(id: Identity) -> Self {
        Self::Value(Value::Reference(id))
    }
}

impl From<Vec<Identity>> for Param {
    fn from(ids: Vec<Identity>) -> Self {
        Self::Value(Value::References(ids))
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Value(Value::Integer(v))
    }
}

/// One parameterized statement plus the result columns it projects.
#[derive(Debug, Clone)]
pub struct Statement {
    name: &'static str,
    text: String,
    params: Params,
    columns: Vec<String>,
    ping: bool,
}

impl Statement {
    /// A statement identified by `name` in logs.
    pub fn new(name: &'static str, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
            params: Params::new(),
            columns: Vec::new(),
            ping: false,
        }
    }

    /// Lightweight health-check statement.
    pub fn ping() -> Self {
        Self {
            ping: true,
            ..Self::new("ping", "RETURN 1 AS ping").returns(["ping"])
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Param>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Declare the result columns to read from each row.
    pub fn returns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &Params {
        &self.params
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_ping(&self) -> bool {
        self.ping
    }
}

/// A node as returned by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub identity: Identity,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

/// A relationship as returned by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipData {
    pub identity: Identity,
    pub rel_type: String,
    pub start: Identity,
    pub end: Identity,
    pub properties: PropertyMap,
}

/// One result column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Value(Value),
    List(Vec<Field>),
    Map(BTreeMap<String, Field>),
    Node(NodeData),
    Relationship(RelationshipData),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One result row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, field: Field) -> Self {
        self.insert(column, field);
        self
    }

    pub fn insert(&mut self, column: &str, field: Field) {
        self.fields.insert(column.to_string(), field);
    }

    pub fn get(&self, column: &str) -> Option<&Field> {
        self.fields.get(column)
    }

    pub fn take(&mut self, column: &str) -> Option<Field> {
        self.fields.remove(column)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Broad class of a remote failure, derived from the server status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Transient,
    Network,
    ConstraintViolation,
    DataFormat,
    Client,
    Database,
    Unknown,
}

/// A failure reported by the driver or the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, code, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, "", message)
    }

    pub fn data_format(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::DataFormat, "", message)
    }

    /// Classify a server status code such as `Neo.TransientError.Transaction.DeadlockDetected`.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let kind = classify_code(&code);
        Self::new(kind, code, message)
    }

    /// Classify a driver error message that embeds a status code somewhere in its text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = extract_code(&message).unwrap_or_default();
        let mut kind = classify_code(&code);
        if kind == RemoteErrorKind::Unknown && message.to_lowercase().contains("timed out") {
            kind = RemoteErrorKind::Transient;
        }
        Self::new(kind, code, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

fn classify_code(code: &str) -> RemoteErrorKind {
    if code.starts_with("Neo.TransientError.")
        || code.contains("TransactionTimedOut")
        || code.contains("SessionExpired")
        || code == "Neo.ClientError.Cluster.NotALeader"
    {
        RemoteErrorKind::Transient
    } else if code.starts_with("Neo.ClientError.Schema.Constraint")
        || code.contains("ConstraintValidationFailed")
    {
        RemoteErrorKind::ConstraintViolation
    } else if code == "Neo.ClientError.Statement.TypeError"
        || code == "Neo.ClientError.Statement.ArgumentError"
    {
        RemoteErrorKind::DataFormat
    } else if code.starts_with("Neo.ClientError.") {
        RemoteErrorKind::Client
    } else if code.starts_with("Neo.DatabaseError.") {
        RemoteErrorKind::Database
    } else {
        RemoteErrorKind::Unknown
    }
}

fn extract_code(message: &str) -> Option<String> {
    let start = message.find("Neo.")?;
    let code: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    let code = code.trim_end_matches('.').to_string();
    (code.matches('.').count() >= 2).then_some(code)
}

/// Handle of an open result stream inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// One remote transaction.
#[async_trait]
pub trait RemoteSession: Send {
    /// Execute a statement and collect every row.
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>, RemoteError>;

    /// Execute a statement and keep its rows on the wire until pulled.
    async fn open(&mut self, statement: &Statement) -> Result<StreamId, RemoteError>;

    /// Next row of an open stream; `None` once exhausted.
    async fn pull(&mut self, stream: StreamId) -> Result<Option<Record>, RemoteError>;

    /// Drop the unread remainder of an open stream.
    async fn discard(&mut self, stream: StreamId) -> Result<(), RemoteError>;

    async fn commit(self: Box<Self>) -> Result<(), RemoteError>;

    async fn rollback(self: Box<Self>) -> Result<(), RemoteError>;
}

/// Opens remote sessions.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}
