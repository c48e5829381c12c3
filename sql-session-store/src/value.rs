//! Bound parameter values
//!
//! User-supplied values always travel through [`SqlValue`] and are bound as
//! parameters; identifiers (table and column names) come only from trusted
//! configuration and are quoted by the dialect module instead.

use serde_json::Value;

/// A value bound to a statement placeholder.
///
/// Each backend module binds these through its native driver; JSON payloads
/// are bound as native JSON where the backend has such a type (PostgreSQL,
/// MySQL) and as compact text elsewhere (SQLite, SQL Server).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Json(Value),
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(value.into())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        SqlValue::Json(value)
    }
}
