//! PostgreSQL database service implementation

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};

use crate::config::{Backend, ConnectionParams};
use crate::database::traits::{DatabaseError, DatabaseService};
use crate::database::{resolver, returns_rows};
use crate::schema::{ColumnInfo, ForeignKey, IndexInfo, QueryResult};
use crate::value::SqlValue;

/// PostgreSQL database service.
pub struct PostgresService {
    pool: PgPool,
    query_timeout: Duration,
    query_timeout_seconds: u64,
}

impl PostgresService {
    /// Configure the pool; connections are established lazily on first use.
    pub fn new(params: ConnectionParams) -> Self {
        let (host, port) = params.host_port(Backend::Postgres);
        let mut options = PgConnectOptions::new()
            .host(&host)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);
        if let Some(port) = port {
            options = options.port(port);
        }

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(params.query_timeout())
            .max_lifetime(Duration::from_secs(1800))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        tracing::debug!(host = %host, database = %params.database, "postgres pool configured");
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
impl DatabaseService for PostgresService {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        resolver::execute_with_repair(|| self.run(sql, params).boxed()).await
    }

    async fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .execute(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
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
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
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
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                   AND tc.table_schema = kcu.table_schema \
                 WHERE tc.table_schema = 'public' \
                   AND tc.table_name = $1 \
                   AND tc.constraint_type = 'PRIMARY KEY' \
                 ORDER BY kcu.ordinal_position",
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
                "SELECT kcu.column_name, \
                        ccu.table_name AS references_table, \
                        ccu.column_name AS references_column \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                   AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                   AND ccu.table_schema = tc.table_schema \
                 WHERE tc.table_schema = 'public' \
                   AND tc.table_name = $1 \
                   AND tc.constraint_type = 'FOREIGN KEY'",
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
                "SELECT indexname AS index_name, indexdef AS index_definition \
                 FROM pg_indexes \
                 WHERE schemaname = 'public' AND tablename = $1 \
                 ORDER BY indexname",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("index_name")?.as_str()?.to_string();
                let definition = row.get("index_definition").and_then(Value::as_str)?;
                Some(IndexInfo {
                    name,
                    columns: parse_index_columns(definition),
                    unique: definition.to_uppercase().contains("UNIQUE"),
                })
            })
            .collect())
    }
}

/// Extract column names from a `pg_indexes.indexdef` statement, e.g.
/// `CREATE UNIQUE INDEX idx ON public.t USING btree (a, b)`.
fn parse_index_columns(definition: &str) -> Vec<String> {
    let Some(open) = definition.find('(') else {
        return Vec::new();
    };
    let Some(close) = definition.rfind(')') else {
        return Vec::new();
    };
    definition[open + 1..close]
        .split(',')
        .map(|column| column.trim().trim_matches('"').to_string())
        .filter(|column| !column.is_empty())
        .collect()
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        // Bound natively; postgres stores it as JSONB.
        SqlValue::Json(v) => query.bind(v.clone()),
    }
}

/// Convert a PostgreSQL row to a JSON object.
fn row_to_json(row: &PgRow) -> Result<Value, DatabaseError> {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_value(row, index)?);
    }
    Ok(Value::Object(map))
}

fn extract_value(row: &PgRow, index: usize) -> Result<Value, DatabaseError> {
    if row.try_get_raw(index).map_err(DatabaseError::from)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).ok(),
        "INT2" | "SMALLINT" | "SMALLSERIAL" => row
            .try_get::<i16, _>(index)
            .map(|v| Value::Number(v.into()))
            .ok(),
        "INT4" | "INT" | "INTEGER" | "SERIAL" => row
            .try_get::<i32, _>(index)
            .map(|v| Value::Number(v.into()))
            .ok(),
        "INT8" | "BIGINT" | "BIGSERIAL" => row
            .try_get::<i64, _>(index)
            .map(|v| Value::Number(v.into()))
            .ok(),
        "FLOAT4" | "REAL" => row
            .try_get::<f32, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number),
        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" => {
            row.try_get::<String, _>(index).map(Value::String).ok()
        }
        "JSON" | "JSONB" => row.try_get::<Value, _>(index).ok(),
        "UUID" => row
            .try_get::<sqlx::types::Uuid, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        "BYTEA" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|v| Value::String(format!("[blob {} bytes]", v.len())))
            .ok(),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| Value::String(v.to_rfc3339()))
            .ok(),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map(|v| Value::String(v.to_string()))
            .ok(),
        // NUMERIC and anything exotic: a text rendering, or null when the
        // driver has no conversion.
        _ => row.try_get::<String, _>(index).map(Value::String).ok(),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_columns_from_index_definitions() {
        assert_eq!(
            parse_index_columns("CREATE UNIQUE INDEX idx ON public.t USING btree (a, b)"),
            vec!["a", "b"]
        );
        assert_eq!(
            parse_index_columns("CREATE INDEX idx ON public.t USING btree (\"Name\")"),
            vec!["Name"]
        );
        assert!(parse_index_columns("no parens here").is_empty());
    }
}
