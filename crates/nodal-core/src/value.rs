//! Property values.
//!
//! Every property read from or written to the database is one of a small,
//! closed set of variants. Equality and conversion rules are defined here once
//! and used everywhere a "did this value change" decision is made.
//!
//! Absence is modelled as `Option::None`; there is no null variant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::types::Identity;

/// Property map of an entity, ordered by key.
pub type PropertyMap = BTreeMap<String, Value>;

/// A typed property value.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Stored on the wire as epoch milliseconds.
    Timestamp(DateTime<Utc>),
    StringArray(Vec<String>),
    IntegerArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BooleanArray(Vec<bool>),
    TimestampArray(Vec<DateTime<Utc>>),
    /// Reference to another entity by identity.
    Reference(Identity),
    References(Vec<Identity>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
            Self::StringArray(_) => "string[]",
            Self::IntegerArray(_) => "integer[]",
            Self::FloatArray(_) => "float[]",
            Self::BooleanArray(_) => "boolean[]",
            Self::TimestampArray(_) => "timestamp[]",
            Self::Reference(_) => "reference",
            Self::References(_) => "reference[]",
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Self::StringArray(_)
                | Self::IntegerArray(_)
                | Self::FloatArray(_)
                | Self::BooleanArray(_)
                | Self::TimestampArray(_)
                | Self::References(_)
        )
    }

    /// The integer this value is encoded as on the wire, if it is one.
    pub fn wire_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Timestamp(t) => Some(t.timestamp_millis()),
            Self::Reference(id) => Some(id.0),
            _ => None,
        }
    }

    /// Integer elements of an integer-encoded array.
    pub fn wire_integers(&self) -> Option<Vec<i64>> {
        match self {
            Self::IntegerArray(v) => Some(v.clone()),
            Self::TimestampArray(v) => Some(v.iter().map(|t| t.timestamp_millis()).collect()),
            Self::References(v) => Some(v.iter().map(|id| id.0).collect()),
            _ => None,
        }
    }

    fn array_len(&self) -> Option<usize> {
        match self {
            Self::StringArray(v) => Some(v.len()),
            Self::IntegerArray(v) => Some(v.len()),
            Self::FloatArray(v) => Some(v.len()),
            Self::BooleanArray(v) => Some(v.len()),
            Self::TimestampArray(v) => Some(v.len()),
            Self::References(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.wire_integer()
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Approximate payload size, used when a value is too large to log.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::StringArray(v) => v.iter().map(String::len).sum(),
            Self::IntegerArray(v) => v.len() * 8,
            Self::FloatArray(v) => v.len() * 8,
            Self::BooleanArray(v) => v.len(),
            Self::TimestampArray(v) => v.len() * 8,
            Self::References(v) => v.len() * 8,
            Self::Boolean(_) => 1,
            _ => 8,
        }
    }

    /// Normalize a list read from the wire into a typed array.
    ///
    /// Returns `None` for heterogeneous lists. An empty list has no element
    /// type and becomes an empty string array.
    pub fn from_list(items: Vec<Value>) -> Option<Value> {
        let Some(first) = items.first() else {
            return Some(Self::StringArray(Vec::new()));
        };

        match first {
            Self::String(_) => items
                .into_iter()
                .map(|v| match v {
                    Self::String(s) => Some(s),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Self::StringArray),
            Self::Boolean(_) => items
                .into_iter()
                .map(|v| v.as_bool())
                .collect::<Option<Vec<_>>>()
                .map(Self::BooleanArray),
            Self::Integer(_) | Self::Float(_) => {
                if items.iter().all(|v| matches!(v, Self::Integer(_))) {
                    items
                        .into_iter()
                        .map(|v| v.wire_integer())
                        .collect::<Option<Vec<_>>>()
                        .map(Self::IntegerArray)
                } else {
                    items
                        .into_iter()
                        .map(|v| v.as_f64())
                        .collect::<Option<Vec<_>>>()
                        .map(Self::FloatArray)
                }
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (StringArray(a), StringArray(b)) => a == b,
            (FloatArray(a), FloatArray(b)) => a == b,
            (BooleanArray(a), BooleanArray(b)) => a == b,
            (a, b) if a.is_array() && b.is_array() => {
                if a.array_len() == Some(0) && b.array_len() == Some(0) {
                    return true;
                }
                match (a.wire_integers(), b.wire_integers()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            (a, b) => match (a.wire_integer(), b.wire_integer()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

// ── Conversions into Value ───────────────────────────────────────

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

value_from! {
    String => String,
    i64 => Integer,
    i32 => Integer as i64,
    i16 => Integer as i64,
    i8 => Integer as i64,
    u32 => Integer as i64,
    u16 => Integer as i64,
    u8 => Integer as i64,
    f64 => Float,
    f32 => Float as f64,
    bool => Boolean,
    DateTime<Utc> => Timestamp,
    Vec<String> => StringArray,
    Vec<i64> => IntegerArray,
    Vec<f64> => FloatArray,
    Vec<bool> => BooleanArray,
    Vec<DateTime<Utc>> => TimestampArray,
    Identity => Reference,
    Vec<Identity> => References,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::StringArray(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::IntegerArray(v.into_iter().map(i64::from).collect())
    }
}

// ── Conversions out of Value ─────────────────────────────────────

fn mismatch(expected: &'static str, found: &Value) -> CoreError {
    CoreError::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}

impl TryFrom<Value> for String {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.wire_integer().ok_or_else(|| mismatch("integer", &value))
    }
}

impl TryFrom<Value> for f64 {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| mismatch("float", &value))
    }
}

impl TryFrom<Value> for bool {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| mismatch("boolean", &value))
    }
}

impl TryFrom<Value> for DateTime<Utc> {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Timestamp(t) => Ok(t),
            Value::Integer(ms) => DateTime::from_timestamp_millis(ms).ok_or(CoreError::TypeMismatch {
                expected: "timestamp",
                found: "integer",
            }),
            other => Err(mismatch("timestamp", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<String> {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::StringArray(v) => Ok(v),
            ref empty if empty.array_len() == Some(0) => Ok(Vec::new()),
            other => Err(mismatch("string[]", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<i64> {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.array_len() == Some(0) {
            return Ok(Vec::new());
        }
        value
            .wire_integers()
            .ok_or_else(|| mismatch("integer[]", &value))
    }
}

impl TryFrom<Value> for Vec<DateTime<Utc>> {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::TimestampArray(v) => Ok(v),
            Value::IntegerArray(v) => v
                .iter()
                .map(|ms| DateTime::from_timestamp_millis(*ms))
                .collect::<Option<Vec<_>>>()
                .ok_or(CoreError::TypeMismatch {
                    expected: "timestamp[]",
                    found: "integer[]",
                }),
            ref empty if empty.array_len() == Some(0) => Ok(Vec::new()),
            other => Err(mismatch("timestamp[]", &other)),
        }
    }
}
