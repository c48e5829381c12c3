//! Database service trait and error taxonomy
//!
//! [`DatabaseService`] is the uniform operation surface every backend
//! implements. Dialect-specific SQL construction is delegated to
//! [`crate::dialect`], which lets sampling and statistics ship as provided
//! methods here.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::Backend;
use crate::dialect;
use crate::schema::{ColumnInfo, ColumnStats, ForeignKey, IndexInfo, QueryResult, TableMetadata};
use crate::value::SqlValue;

/// Uniform contract over all supported SQL backends.
///
/// Introspection calls always re-query the live backend schema; nothing is
/// cached between calls.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// The backend tag this service targets.
    fn backend(&self) -> Backend;

    /// Execute a statement, materializing all rows before the pooled
    /// connection is released.
    ///
    /// Transient connection faults are repaired and retried internally up to
    /// the fixed attempt budget; statement rejections surface immediately.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError>;

    /// All table names in the database, sorted by name.
    async fn get_tables(&self) -> Result<Vec<String>, DatabaseError>;

    /// Column definitions for a table, in ordinal order.
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError>;

    /// Primary key column names in key order.
    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError>;

    /// Foreign key constraints declared on a table.
    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError>;

    /// Indexes declared on a table.
    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, DatabaseError>;

    /// A random sample of up to `limit` distinct non-null values of a column.
    async fn get_unique_values(
        &self,
        table: &str,
        column: &str,
        limit: u32,
    ) -> Result<Vec<Value>, DatabaseError> {
        let sql = dialect::sample_distinct(self.backend(), table, column, limit);
        let result = self.execute(&sql, &[]).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Count, distinct count, minimum and maximum over the non-null values
    /// of a column, computed in a single aggregate query.
    async fn get_column_stats(
        &self,
        table: &str,
        column: &str,
    ) -> Result<ColumnStats, DatabaseError> {
        let sql = dialect::column_stats(self.backend(), table, column);
        let result = self.execute(&sql, &[]).await?;
        Ok(result.rows.first().map(stats_from_row).unwrap_or_default())
    }

    /// Full introspection bundle: columns, primary key, foreign keys and
    /// indexes, assembled from the fragment calls.
    async fn describe_table(&self, table: &str) -> Result<TableMetadata, DatabaseError> {
        Ok(TableMetadata {
            columns: self.get_columns(table).await?,
            primary_key: self.get_primary_keys(table).await?,
            foreign_keys: self.get_foreign_keys(table).await?,
            indexes: self.get_indexes(table).await?,
        })
    }
}

fn stats_from_row(row: &Value) -> ColumnStats {
    ColumnStats {
        count: row.get("count").and_then(Value::as_u64).unwrap_or(0),
        unique_count: row.get("unique_count").and_then(Value::as_u64).unwrap_or(0),
        min_value: row.get("min_value").cloned().unwrap_or(Value::Null),
        max_value: row.get("max_value").cloned().unwrap_or(Value::Null),
    }
}

/// Database error taxonomy.
///
/// Only [`DatabaseError::Connection`] is transient; everything else
/// propagates unchanged on first occurrence.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Every driver candidate failed to establish a connection. Carries each
    /// attempted candidate and its cause; not retried further by the
    /// resolver.
    #[error("no driver candidate could connect (attempted: {})", .attempts.join("; "))]
    NoDriverAvailable { attempts: Vec<String> },

    /// A transient connection failure; triggers the repair-and-retry path.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected the statement. Retrying a malformed query cannot
    /// succeed, so this surfaces immediately.
    #[error("query execution error: {0}")]
    Query(String),

    /// The backend tag is outside the closed enumeration, or its support was
    /// compiled out.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// The statement exceeded the configured query timeout.
    #[error("query exceeded the configured timeout of {0} seconds")]
    Timeout(u64),

    /// Session payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Whether the repair-and-retry path may recover from this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Connection(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(cause) => DatabaseError::Query(cause.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DatabaseError::Connection(error.to_string()),
            _ => DatabaseError::Query(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(DatabaseError::Connection("reset".into()).is_transient());
        assert!(!DatabaseError::Query("syntax".into()).is_transient());
        assert!(!DatabaseError::Timeout(30).is_transient());
        assert!(!DatabaseError::NoDriverAvailable { attempts: vec![] }.is_transient());
        assert!(!DatabaseError::UnsupportedBackend("oracle".into()).is_transient());
    }

    #[test]
    fn no_driver_error_lists_every_attempt() {
        let error = DatabaseError::NoDriverAvailable {
            attempts: vec![
                "tds-encrypt-required: handshake failed".to_string(),
                "tds-plaintext: connection refused".to_string(),
            ],
        };
        let message = error.to_string();
        assert!(message.contains("tds-encrypt-required: handshake failed"));
        assert!(message.contains("tds-plaintext: connection refused"));
    }

    #[test]
    fn stats_row_parsing_tolerates_missing_fields() {
        let stats = stats_from_row(&serde_json::json!({
            "count": 10,
            "unique_count": 4,
            "min_value": 1,
            "max_value": 9
        }));
        assert_eq!(stats.count, 10);
        assert_eq!(stats.unique_count, 4);
        assert_eq!(stats.min_value, serde_json::json!(1));

        let empty = stats_from_row(&serde_json::json!({}));
        assert_eq!(empty.count, 0);
        assert_eq!(empty.min_value, Value::Null);
    }
}
