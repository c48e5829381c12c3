//! SQLite database service implementation

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};

use crate::config::{Backend, ConnectionParams};
use crate::database::traits::{DatabaseError, DatabaseService};
use crate::database::{group_index_rows, resolver, returns_rows};
use crate::dialect;
use crate::schema::{ColumnInfo, ForeignKey, IndexInfo, QueryResult};
use crate::value::SqlValue;

/// SQLite database service.
///
/// SQLite is single-writer, so the pool is pinned to one connection and the
/// connection is never reaped on idle (an in-memory database would lose its
/// contents).
pub struct SqliteService {
    pool: SqlitePool,
    query_timeout: Duration,
    query_timeout_seconds: u64,
}

impl SqliteService {
    /// Configure the service; the database file is opened on first use.
    pub fn new(params: ConnectionParams) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(&params.database)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(params.query_timeout())
            .connect_lazy_with(options);

        tracing::debug!(database = %params.database, "sqlite pool configured");
        Self {
            pool,
            query_timeout: params.query_timeout(),
            query_timeout_seconds: params.query_timeout_seconds,
        }
    }

    fn quote(&self, identifier: &str) -> String {
        dialect::quote_identifier(Backend::Sqlite, identifier)
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        let started = Instant::now();
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }

        if returns_rows(sql) {
            let rows = tokio::time::timeout(self.query_timeout, query.fetch_all(&self.pool))
                .await
                .map_err(|_| DatabaseError::Timeout(self.query_timeout_seconds))??;

            let columns = rows
                .first()
                .map(|row| {
                    row.columns()
                        .iter()
                        .map(|column| column.name().to_string())
                        .collect()
                })
                .unwrap_or_default();
            let json_rows: Vec<Value> = rows
                .iter()
                .map(row_to_json)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(QueryResult {
                columns,
                affected_rows: json_rows.len() as u64,
                rows: json_rows,
                execution_time_milliseconds: started.elapsed().as_millis() as u64,
            })
        } else {
            let done = tokio::time::timeout(self.query_timeout, query.execute(&self.pool))
                .await
                .map_err(|_| DatabaseError::Timeout(self.query_timeout_seconds))??;

            Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: done.rows_affected(),
                execution_time_milliseconds: started.elapsed().as_millis() as u64,
            })
        }
    }
}

#[async_trait]
impl DatabaseService for SqliteService {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        resolver::execute_with_repair(|| self.run(sql, params).boxed()).await
    }

    async fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .execute(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
        let sql = format!("PRAGMA table_info({})", self.quote(table));
        let result = self.execute(&sql, &[]).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                Some(ColumnInfo {
                    name,
                    data_type: row
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    nullable: row.get("notnull").and_then(Value::as_i64) == Some(0),
                    default_value: display_default(row.get("dflt_value")),
                })
            })
            .collect())
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        let sql = format!("PRAGMA table_info({})", self.quote(table));
        let result = self.execute(&sql, &[]).await?;

        // The pk column carries the 1-based position within the primary key.
        let mut key_columns: Vec<(i64, String)> = result
            .rows
            .iter()
            .filter_map(|row| {
                let position = row.get("pk").and_then(Value::as_i64)?;
                if position == 0 {
                    return None;
                }
                let name = row.get("name")?.as_str()?.to_string();
                Some((position, name))
            })
            .collect();
        key_columns.sort_by_key(|(position, _)| *position);
        Ok(key_columns.into_iter().map(|(_, name)| name).collect())
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError> {
        // PRAGMA foreign_key_list returns: id, seq, table, from, to, …
        let sql = format!("PRAGMA foreign_key_list({})", self.quote(table));
        let result = self.execute(&sql, &[]).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(ForeignKey {
                    column: row.get("from")?.as_str()?.to_string(),
                    references_table: row.get("table")?.as_str()?.to_string(),
                    references_column: row
                        .get("to")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, DatabaseError> {
        let sql = format!("PRAGMA index_list({})", self.quote(table));
        let result = self.execute(&sql, &[]).await?;

        let mut rows = Vec::new();
        for index_row in &result.rows {
            let Some(name) = index_row.get("name").and_then(Value::as_str) else {
                continue;
            };
            let unique = index_row.get("unique").and_then(Value::as_i64) != Some(0);

            let info_sql = format!("PRAGMA index_info({})", self.quote(name));
            let info = self.execute(&info_sql, &[]).await?;
            for column_row in &info.rows {
                if let Some(column) = column_row.get("name").and_then(Value::as_str) {
                    rows.push((name.to_string(), column.to_string(), unique));
                }
            }
        }
        Ok(group_index_rows(rows))
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        // SQLite has no JSON type; store the compact text rendering.
        SqlValue::Json(v) => query.bind(v.to_string()),
    }
}

/// Render a PRAGMA default value (literal text or number) for ColumnInfo.
fn display_default(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Convert a SQLite row to a JSON object.
///
/// SQLite reports type affinities rather than strict types, so extraction
/// tries the reported affinity first and falls back through the common
/// decodings.
fn row_to_json(row: &SqliteRow) -> Result<Value, DatabaseError> {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_value(row, index)?);
    }
    Ok(Value::Object(map))
}

fn extract_value(row: &SqliteRow, index: usize) -> Result<Value, DatabaseError> {
    if row.try_get_raw(index).map_err(DatabaseError::from)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" => {
            if let Ok(value) = row.try_get::<i64, _>(index) {
                return Ok(Value::Number(value.into()));
            }
        }
        "REAL" | "FLOAT" | "DOUBLE" => {
            if let Ok(value) = row.try_get::<f64, _>(index) {
                if let Some(number) = serde_json::Number::from_f64(value) {
                    return Ok(Value::Number(number));
                }
            }
        }
        "BOOLEAN" | "BOOL" => {
            if let Ok(value) = row.try_get::<bool, _>(index) {
                return Ok(Value::Bool(value));
            }
        }
        "TEXT" | "VARCHAR" | "CHAR" | "CLOB" | "DATE" | "DATETIME" | "TIMESTAMP" => {
            if let Ok(value) = row.try_get::<String, _>(index) {
                return Ok(Value::String(value));
            }
        }
        "BLOB" => {
            if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
                return Ok(Value::String(format!("[blob {} bytes]", value.len())));
            }
        }
        _ => {}
    }

    // Affinity did not match the stored value; try the common decodings.
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(Value::Number(value.into()));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            return Ok(Value::Number(number));
        }
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(Value::String(value));
    }
    if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::String(format!("[blob {} bytes]", value.len())));
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_service() -> SqliteService {
        SqliteService::new(ConnectionParams::new("", "", "", ":memory:"))
    }

    async fn seeded_service() -> SqliteService {
        let service = memory_service();
        service
            .execute(
                "CREATE TABLE teams (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                &[],
            )
            .await
            .unwrap();
        service
            .execute(
                "CREATE TABLE users (\
                 id INTEGER PRIMARY KEY, \
                 name TEXT NOT NULL DEFAULT 'anon', \
                 age INTEGER, \
                 team_id INTEGER REFERENCES teams(id))",
                &[],
            )
            .await
            .unwrap();
        service
            .execute("CREATE UNIQUE INDEX idx_users_name ON users(name)", &[])
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn executes_a_trivial_select() {
        let service = memory_service();
        let result = service.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.affected_rows, 1);
    }

    #[tokio::test]
    async fn reports_affected_rows_for_writes() {
        let service = seeded_service().await;
        let result = service
            .execute(
                "INSERT INTO users (name, age) VALUES (?, ?)",
                &[SqlValue::Text("ada".to_string()), SqlValue::Integer(36)],
            )
            .await
            .unwrap();
        assert_eq!(result.affected_rows, 1);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn rejected_statements_surface_as_query_errors() {
        let service = memory_service();
        let error = service
            .execute("SELECT * FROM missing_table", &[])
            .await
            .unwrap_err();
        assert!(matches!(error, DatabaseError::Query(_)), "{error}");
    }

    #[tokio::test]
    async fn lists_tables_sorted_by_name() {
        let service = seeded_service().await;
        assert_eq!(service.get_tables().await.unwrap(), vec!["teams", "users"]);
    }

    #[tokio::test]
    async fn introspects_columns_with_nullability_and_defaults() {
        let service = seeded_service().await;
        let columns = service.get_columns("users").await.unwrap();
        assert_eq!(columns.len(), 4);

        let name = columns.iter().find(|c| c.name == "name").unwrap();
        assert!(!name.nullable);
        assert_eq!(name.data_type, "TEXT");
        assert_eq!(name.default_value.as_deref(), Some("'anon'"));

        let age = columns.iter().find(|c| c.name == "age").unwrap();
        assert!(age.nullable);
        assert_eq!(age.default_value, None);
    }

    #[tokio::test]
    async fn introspects_primary_and_foreign_keys() {
        let service = seeded_service().await;
        assert_eq!(service.get_primary_keys("users").await.unwrap(), vec!["id"]);

        let foreign_keys = service.get_foreign_keys("users").await.unwrap();
        assert_eq!(foreign_keys.len(), 1);
        assert_eq!(foreign_keys[0].column, "team_id");
        assert_eq!(foreign_keys[0].references_table, "teams");
    }

    #[tokio::test]
    async fn introspects_indexes_with_uniqueness() {
        let service = seeded_service().await;
        let indexes = service.get_indexes("users").await.unwrap();
        let index = indexes.iter().find(|i| i.name == "idx_users_name").unwrap();
        assert_eq!(index.columns, vec!["name"]);
        assert!(index.unique);
    }

    #[tokio::test]
    async fn describe_table_bundles_all_fragments() {
        let service = seeded_service().await;
        let metadata = service.describe_table("users").await.unwrap();
        assert_eq!(metadata.columns.len(), 4);
        assert_eq!(metadata.primary_key, vec!["id"]);
        assert_eq!(metadata.foreign_keys.len(), 1);
        assert!(!metadata.indexes.is_empty());
    }

    #[tokio::test]
    async fn samples_distinct_non_null_values() {
        let service = seeded_service().await;
        for (name, age) in [("ada", 36), ("bob", 41), ("cid", 36), ("dot", 29)] {
            service
                .execute(
                    "INSERT INTO users (name, age) VALUES (?, ?)",
                    &[SqlValue::Text(name.to_string()), SqlValue::Integer(age)],
                )
                .await
                .unwrap();
        }
        service
            .execute("INSERT INTO users (name, age) VALUES ('eve', NULL)", &[])
            .await
            .unwrap();

        let sample = service.get_unique_values("users", "age", 2).await.unwrap();
        assert_eq!(sample.len(), 2);

        let all = service.get_unique_values("users", "age", 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(!all.contains(&Value::Null));
    }

    #[tokio::test]
    async fn computes_column_stats_in_one_query() {
        let service = seeded_service().await;
        for (name, age) in [("ada", 36), ("bob", 41), ("cid", 36)] {
            service
                .execute(
                    "INSERT INTO users (name, age) VALUES (?, ?)",
                    &[SqlValue::Text(name.to_string()), SqlValue::Integer(age)],
                )
                .await
                .unwrap();
        }

        let stats = service.get_column_stats("users", "age").await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.unique_count, 2);
        assert_eq!(stats.min_value, serde_json::json!(36));
        assert_eq!(stats.max_value, serde_json::json!(41));
    }

    #[tokio::test]
    async fn stats_on_an_empty_column_are_the_empty_structure() {
        let service = seeded_service().await;
        let stats = service.get_column_stats("users", "age").await.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.unique_count, 0);
        assert_eq!(stats.min_value, Value::Null);
        assert_eq!(stats.max_value, Value::Null);
    }

    #[tokio::test]
    async fn preserves_reported_column_order() {
        let service = seeded_service().await;
        let result = service
            .execute("SELECT id, name, age FROM users", &[])
            .await
            .unwrap();
        // No rows yet, so no column metadata either; insert and re-check.
        assert!(result.columns.is_empty());

        service
            .execute("INSERT INTO users (name, age) VALUES ('ada', 36)", &[])
            .await
            .unwrap();
        let result = service
            .execute("SELECT age, name, id FROM users", &[])
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["age", "name", "id"]);
    }
}
