//! MySQL database service implementation

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySqlPool, Row, TypeInfo, ValueRef};

use crate::config::{Backend, ConnectionParams};
use crate::database::traits::{DatabaseError, DatabaseService};
use crate::database::{group_index_rows, resolver, returns_rows};
use crate::schema::{ColumnInfo, ForeignKey, IndexInfo, QueryResult};
use crate::value::SqlValue;

/// MySQL database service.
pub struct MySqlService {
    pool: MySqlPool,
    query_timeout: Duration,
    query_timeout_seconds: u64,
}

impl MySqlService {
    /// Configure the pool; connections are established lazily on first use.
    pub fn new(params: ConnectionParams) -> Self {
        let (host, port) = params.host_port(Backend::Mysql);
        let mut options = MySqlConnectOptions::new()
            .host(&host)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);
        if let Some(port) = port {
            options = options.port(port);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(params.query_timeout())
            .max_lifetime(Duration::from_secs(1800))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        tracing::debug!(host = %host, database = %params.database, "mysql pool configured");
        Self {
            pool,
            query_timeout: params.query_timeout(),
            query_timeout_seconds: params.query_timeout_seconds,
        }
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
impl DatabaseService for MySqlService {
    fn backend(&self) -> Backend {
        Backend::Mysql
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        resolver::execute_with_repair(|| self.run(sql, params).boxed()).await
    }

    async fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .execute(
                "SELECT table_name AS table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                row.get("table_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let result = self
            .execute(
                "SELECT column_name AS column_name, column_type AS data_type, \
                        is_nullable AS is_nullable, column_default AS column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(ColumnInfo {
                    name: row.get("column_name")?.as_str()?.to_string(),
                    data_type: row
                        .get("data_type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    nullable: row.get("is_nullable").and_then(Value::as_str) == Some("YES"),
                    default_value: row
                        .get("column_default")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect())
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .execute(
                "SELECT column_name AS column_name \
                 FROM information_schema.key_column_usage \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                   AND constraint_name = 'PRIMARY' \
                 ORDER BY ordinal_position",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                row.get("column_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>, DatabaseError> {
        let result = self
            .execute(
                "SELECT column_name AS column_name, \
                        referenced_table_name AS references_table, \
                        referenced_column_name AS references_column \
                 FROM information_schema.key_column_usage \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                   AND referenced_table_name IS NOT NULL \
                 ORDER BY ordinal_position",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(ForeignKey {
                    column: row.get("column_name")?.as_str()?.to_string(),
                    references_table: row.get("references_table")?.as_str()?.to_string(),
                    references_column: row.get("references_column")?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, DatabaseError> {
        let result = self
            .execute(
                "SELECT index_name AS index_name, column_name AS column_name, \
                        non_unique AS non_unique \
                 FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY index_name, seq_in_index",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        let rows = result.rows.iter().filter_map(|row| {
            Some((
                row.get("index_name")?.as_str()?.to_string(),
                row.get("column_name")?.as_str()?.to_string(),
                row.get("non_unique").and_then(Value::as_i64) == Some(0),
            ))
        });
        Ok(group_index_rows(rows.collect::<Vec<_>>()))
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        // Bound natively; mysql stores it in its JSON column type.
        SqlValue::Json(v) => query.bind(v.clone()),
    }
}

/// Convert a MySQL row to a JSON object.
fn row_to_json(row: &MySqlRow) -> Result<Value, DatabaseError> {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_value(row, index)?);
    }
    Ok(Value::Object(map))
}

fn extract_value(row: &MySqlRow, index: usize) -> Result<Value, DatabaseError> {
    if row.try_get_raw(index).map_err(DatabaseError::from)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" | "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).ok(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(|v| Value::Number(v.into()))
            .ok(),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<u64, _>(index)
            .map(|v| Value::Number(v.into()))
            .ok(),
        "FLOAT" => row
            .try_get::<f32, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number),
        "DOUBLE" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
            row.try_get::<String, _>(index).map(Value::String).ok()
        }
        "JSON" => row.try_get::<Value, _>(index).ok(),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|v| Value::String(format!("[blob {} bytes]", v.len())))
            .ok(),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        // DECIMAL and anything exotic: a text rendering, or null when the
        // driver has no conversion.
        _ => row.try_get::<String, _>(index).map(Value::String).ok(),
    };

    // information_schema columns frequently surface as bytes; fall back
    // through the common decodings before giving up.
    if let Some(value) = value {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(Value::String(value));
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(Value::Number(value.into()));
    }
    if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(match String::from_utf8(value) {
            Ok(text) => Value::String(text),
            Err(raw) => Value::String(format!("[blob {} bytes]", raw.as_bytes().len())),
        });
    }
    Ok(Value::Null)
}
