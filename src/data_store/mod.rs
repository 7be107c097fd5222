pub mod encoding;
pub mod postgres;
mod postgres_type;

pub use postgres::{PostgresConnector, PostgresDataStore, PostgresMapping};
pub use postgres_type::PostgresType;

use crate::semantic_model::InlineTable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Dialect information of the backend a statement is compiled for
pub trait DataStoreMapping: Send + Sync {
    /// Dialect used to parse the rendered SQL into a statement object
    fn get_dialect(&self) -> &dyn sqlparser::dialect::Dialect;
}

/// DataStoreClient executes a compiled statement over a live connection
///
/// Implementations wrap a single driver connection. Errors are raw driver
/// failures; the session decides how they surface to the caller.
#[async_trait]
pub trait DataStoreClient: Send + Sync {
    /// Execute the statement with its positional parameters bound
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DataStoreError>;
    /// Make an inline table available to the statements of this connection
    async fn create_inline_table(&self, table: &InlineTable) -> Result<(), DataStoreError>;
    /// Release the connection
    async fn close(&self) -> Result<(), DataStoreError>;
}

/// Opens [`DataStoreClient`] connections for a session
#[async_trait]
pub trait Connector: Send + Sync {
    type Mapping: DataStoreMapping;

    fn get_mapping() -> Self::Mapping;

    async fn connect(&self) -> Result<Box<dyn DataStoreClient>, DataStoreError>;
}

/// Column names and row values returned by a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            Value::String(value) => value.parse().ok(),
            Value::Boolean(_) | Value::Null => None,
        }
    }

    /// Total order used to sort result rows: nulls first, numbers by value,
    /// everything else by its text representation.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::String(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Can't decode column '{column}' of type {type_name}")]
    ColumnDecode { column: String, type_name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::nulls_first(Value::Null, Value::Int(0), Ordering::Less)]
    #[case::numeric(Value::Int(10), Value::Float(9.5), Ordering::Greater)]
    #[case::text(Value::String("a".into()), Value::String("b".into()), Ordering::Less)]
    #[case::equal(Value::Float(2.0), Value::Int(2), Ordering::Equal)]
    fn test_sort_cmp(#[case] left: Value, #[case] right: Value, #[case] expected: Ordering) {
        assert_eq!(left.sort_cmp(&right), expected);
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 1.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Int(3),
                Value::Float(1.5),
                Value::String("x".into())
            ]
        );
    }
}
