use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A result row: column name to JSON value, in select-list order
pub type Row = IndexMap<String, Value>;

/// A bound query parameter.
///
/// Values are always sent to the store as bind parameters; they are never
/// spliced into the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value)
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default())
            },
            Value::String(s) => Self::Text(s),
            other => Self::Json(other)
        }
    }
}

/// One statement of a transactional batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub sql:    String,
    pub params: Vec<SqlValue>
}

impl BatchStatement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params
        }
    }
}

/// Rows plus the affected-row count reported by the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows:          Vec<Row>,
    pub affected_rows: u64
}

/// Pool occupancy as reported by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size:  usize,
    pub size:      usize,
    pub available: usize,
    pub waiting:   usize
}
