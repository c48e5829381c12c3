//! Database abstraction layer
//!
//! One service implementation per backend behind the [`DatabaseService`]
//! trait, plus the factory mapping a backend tag to its service. This module
//! is the single place backends are registered.

use std::sync::Arc;

use crate::config::{Backend, ConnectionParams};

pub mod resolver;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod mssql;

pub use traits::{DatabaseError, DatabaseService};

/// Create the service for a backend tag.
///
/// The connection itself is established lazily on first use. Tags whose
/// support was compiled out fail with [`DatabaseError::UnsupportedBackend`]
/// before any connection is attempted.
pub fn get_service(
    backend: Backend,
    params: ConnectionParams,
) -> Result<Arc<dyn DatabaseService>, DatabaseError> {
    match backend {
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Arc::new(postgres::PostgresService::new(params))),
        #[cfg(feature = "mysql")]
        Backend::Mysql => Ok(Arc::new(mysql::MySqlService::new(params))),
        #[cfg(feature = "mssql")]
        Backend::Mssql => Ok(Arc::new(mssql::MssqlService::new(params))),
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => Ok(Arc::new(sqlite::SqliteService::new(params))),
        #[allow(unreachable_patterns)]
        other => Err(DatabaseError::UnsupportedBackend(other.to_string())),
    }
}

/// Whether a statement produces a row stream (as opposed to an affected-row
/// count).
pub(crate) fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("SELECT")
        || upper.starts_with("WITH")
        || upper.starts_with("PRAGMA")
        || upper.starts_with("EXPLAIN")
}

/// Fold `(index_name, column_name, unique)` rows, ordered by index then key
/// position, into one entry per index.
pub(crate) fn group_index_rows(
    rows: impl IntoIterator<Item = (String, String, bool)>,
) -> Vec<crate::schema::IndexInfo> {
    let mut indexes: Vec<crate::schema::IndexInfo> = Vec::new();
    for (name, column, unique) in rows {
        match indexes.last_mut() {
            Some(index) if index.name == name => index.columns.push(column),
            _ => indexes.push(crate::schema::IndexInfo {
                name,
                columns: vec![column],
                unique,
            }),
        }
    }
    indexes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_row_returning_statements() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with t as (select 1) select * from t"));
        assert!(returns_rows("PRAGMA table_info(\"users\")"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("MERGE t AS target USING ..."));
        assert!(!returns_rows("DELETE FROM t"));
    }

    #[test]
    fn groups_index_rows_by_name() {
        let indexes = group_index_rows(vec![
            ("idx_a".to_string(), "x".to_string(), true),
            ("idx_a".to_string(), "y".to_string(), true),
            ("idx_b".to_string(), "z".to_string(), false),
        ]);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].columns, vec!["x", "y"]);
        assert!(indexes[0].unique);
        assert_eq!(indexes[1].columns, vec!["z"]);
        assert!(!indexes[1].unique);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn factory_builds_a_working_sqlite_service() {
        let params = ConnectionParams::new("", "", "", ":memory:");
        let service = get_service(Backend::Sqlite, params).unwrap();
        assert_eq!(service.backend(), Backend::Sqlite);

        let result = service.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.rows.len(), 1);
    }
}
