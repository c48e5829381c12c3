//! Schema types for dynamic database introspection
//!
//! These types represent database schema information discovered at runtime,
//! plus the normalized result of an executed statement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized result of an executed statement.
///
/// Rows are fully materialized JSON objects; `columns` preserves the
/// backend-reported column order. An empty `rows` is a valid result, not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in the order the backend reported them
    pub columns: Vec<String>,

    /// Rows as column-name → value mappings
    pub rows: Vec<Value>,

    /// Rows returned for reads, rows affected for writes
    pub affected_rows: u64,

    /// Statement execution time in milliseconds
    pub execution_time_milliseconds: u64,
}

/// Information about a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// SQL data type (e.g., "INTEGER", "TEXT", "VARCHAR(255)")
    pub data_type: String,

    /// Whether the column allows NULL values
    pub nullable: bool,

    /// Default value expression (if any)
    pub default_value: Option<String>,
}

/// Foreign key constraint information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column name in this table
    pub column: String,

    /// Referenced table name
    pub references_table: String,

    /// Referenced column name
    pub references_column: String,
}

/// Index information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name
    pub name: String,

    /// Columns included in the index
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Basic statistics over the non-null values of one column.
///
/// The default value is the empty structure returned for columns with no
/// rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    pub count: u64,
    pub unique_count: u64,
    pub min_value: Value,
    pub max_value: Value,
}

/// Complete introspection bundle for a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,

    /// Primary key column names in key order (empty if none)
    pub primary_key: Vec<String>,

    /// Foreign key constraints
    pub foreign_keys: Vec<ForeignKey>,

    /// Index definitions
    pub indexes: Vec<IndexInfo>,
}
