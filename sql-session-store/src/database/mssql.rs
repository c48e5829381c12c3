//! SQL Server database service implementation
//!
//! Built on tiberius over a tokio TCP stream. Server setups disagree on TLS
//! requirements, so the connection is resolved by trying a fixed list of
//! named encryption candidates in order and keeping the first one that
//! completes a login.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::{Backend, ConnectionParams};
use crate::database::traits::{DatabaseError, DatabaseService};
use crate::database::{group_index_rows, resolver, returns_rows};
use crate::schema::{ColumnInfo, ForeignKey, IndexInfo, QueryResult};
use crate::value::SqlValue;

type MssqlClient = Client<Compat<TcpStream>>;

/// A named connection configuration to try during resolution.
struct DriverCandidate {
    name: &'static str,
    encryption: EncryptionLevel,
}

/// Candidates in preference order: full encryption first, then
/// login-only encryption, then plaintext for servers without TLS.
const DRIVER_CANDIDATES: &[DriverCandidate] = &[
    DriverCandidate {
        name: "tds-encrypt-required",
        encryption: EncryptionLevel::Required,
    },
    DriverCandidate {
        name: "tds-encrypt-available",
        encryption: EncryptionLevel::On,
    },
    DriverCandidate {
        name: "tds-plaintext",
        encryption: EncryptionLevel::NotSupported,
    },
];

/// SQL Server database service.
///
/// tiberius clients are not pooled; a single client is held behind a mutex
/// and replaced when a transient fault or timeout leaves it in an unknown
/// state, so the retry path reconnects from scratch.
pub struct MssqlService {
    params: ConnectionParams,
    client: Mutex<Option<MssqlClient>>,
    query_timeout: Duration,
    query_timeout_seconds: u64,
}

impl MssqlService {
    pub fn new(params: ConnectionParams) -> Self {
        let query_timeout = params.query_timeout();
        let query_timeout_seconds = params.query_timeout_seconds;
        Self {
            params,
            client: Mutex::new(None),
            query_timeout,
            query_timeout_seconds,
        }
    }

    /// Try every driver candidate in order and keep the first client that
    /// logs in. When all candidates fail the error carries each candidate
    /// name with its cause.
    async fn resolve(&self) -> Result<MssqlClient, DatabaseError> {
        let (host, port) = self.params.host_port(Backend::Mssql);
        let mut attempts = Vec::new();

        for candidate in DRIVER_CANDIDATES {
            let mut config = Config::new();
            config.host(&host);
            if let Some(port) = port {
                config.port(port);
            }
            config.database(&self.params.database);
            config.authentication(AuthMethod::sql_server(
                &self.params.user,
                &self.params.password,
            ));
            config.encryption(candidate.encryption);
            config.trust_cert();

            let addr = config.get_addr();
            let connect = async {
                let tcp = TcpStream::connect(&addr)
                    .await
                    .map_err(tiberius::error::Error::from)?;
                tcp.set_nodelay(true)
                    .map_err(tiberius::error::Error::from)?;
                Client::connect(config, tcp.compat_write()).await
            };

            match tokio::time::timeout(self.query_timeout, connect).await {
                Ok(Ok(client)) => {
                    tracing::debug!(candidate = candidate.name, host = %host, "sql server connection established");
                    return Ok(client);
                }
                Ok(Err(cause)) => {
                    tracing::warn!(candidate = candidate.name, %cause, "sql server candidate failed");
                    attempts.push(format!("{}: {}", candidate.name, cause));
                }
                Err(_) => {
                    tracing::warn!(candidate = candidate.name, "sql server candidate timed out");
                    attempts.push(format!(
                        "{}: timed out after {} seconds",
                        candidate.name, self.query_timeout_seconds
                    ));
                }
            }
        }

        Err(DatabaseError::NoDriverAvailable { attempts })
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.resolve().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(DatabaseError::Connection("client unavailable".to_string()));
        };

        let args: Vec<&dyn ToSql> = params.iter().map(|value| value as &dyn ToSql).collect();
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.query_timeout, async {
            if returns_rows(sql) {
                let rows = client.query(sql, &args).await?.into_first_result().await?;
                let columns = rows
                    .first()
                    .map(|row| {
                        row.columns()
                            .iter()
                            .map(|column| column.name().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                let json_rows: Vec<Value> = rows.iter().map(row_to_json).collect();
                Ok(QueryResult {
                    columns,
                    affected_rows: json_rows.len() as u64,
                    rows: json_rows,
                    execution_time_milliseconds: started.elapsed().as_millis() as u64,
                })
            } else {
                let done = client.execute(sql, &args).await?;
                Ok(QueryResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    affected_rows: done.total(),
                    execution_time_milliseconds: started.elapsed().as_millis() as u64,
                })
            }
        })
        .await;

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(cause)) => {
                let error = classify(cause);
                // A transient fault leaves the TDS stream in an unknown
                // state; drop the client so the next attempt reconnects.
                if error.is_transient() {
                    *guard = None;
                }
                Err(error)
            }
            Err(_) => {
                *guard = None;
                Err(DatabaseError::Timeout(self.query_timeout_seconds))
            }
        }
    }
}

#[async_trait]
impl DatabaseService for MssqlService {
    fn backend(&self) -> Backend {
        Backend::Mssql
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        resolver::execute_with_repair(|| self.run(sql, params).boxed()).await
    }

    async fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let result = self
            .execute(
                "SELECT TABLE_NAME AS table_name FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
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
                "SELECT COLUMN_NAME AS column_name, DATA_TYPE AS data_type, \
                        IS_NULLABLE AS is_nullable, COLUMN_DEFAULT AS column_default \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION",
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
                "SELECT kcu.COLUMN_NAME AS column_name \
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                   ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                 WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_NAME = @P1 \
                 ORDER BY kcu.ORDINAL_POSITION",
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
                "SELECT kcu.COLUMN_NAME AS column_name, \
                        ccu.TABLE_NAME AS references_table, \
                        ccu.COLUMN_NAME AS references_column \
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                   ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                 JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
                   ON tc.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
                 JOIN INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE ccu \
                   ON rc.UNIQUE_CONSTRAINT_NAME = ccu.CONSTRAINT_NAME \
                 WHERE tc.CONSTRAINT_TYPE = 'FOREIGN KEY' AND tc.TABLE_NAME = @P1 \
                 ORDER BY kcu.ORDINAL_POSITION",
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
                "SELECT i.name AS index_name, c.name AS column_name, \
                        i.is_unique AS is_unique \
                 FROM sys.indexes i \
                 JOIN sys.index_columns ic \
                   ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
                 JOIN sys.columns c \
                   ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
                 WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL \
                 ORDER BY i.name, ic.key_ordinal",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        let rows = result.rows.iter().filter_map(|row| {
            Some((
                row.get("index_name")?.as_str()?.to_string(),
                row.get("column_name")?.as_str()?.to_string(),
                row.get("is_unique").and_then(Value::as_bool) == Some(true),
            ))
        });
        Ok(group_index_rows(rows.collect::<Vec<_>>()))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(v) => ColumnData::Bit(Some(*v)),
            SqlValue::Integer(v) => ColumnData::I64(Some(*v)),
            SqlValue::Real(v) => ColumnData::F64(Some(*v)),
            SqlValue::Text(v) => ColumnData::String(Some(Cow::Borrowed(v))),
            // NVARCHAR(MAX) carries the serialized payload.
            SqlValue::Json(v) => ColumnData::String(Some(Cow::Owned(v.to_string()))),
        }
    }
}

fn classify(error: tiberius::error::Error) -> DatabaseError {
    use tiberius::error::Error;
    match &error {
        Error::Server(_)
        | Error::Conversion(_)
        | Error::Encoding(_)
        | Error::ParseInt(_)
        | Error::Utf8
        | Error::Utf16 => DatabaseError::Query(error.to_string()),
        _ => DatabaseError::Connection(error.to_string()),
    }
}

/// Convert a TDS row to a JSON object.
fn row_to_json(row: &tiberius::Row) -> Value {
    let mut map = serde_json::Map::new();
    for (column, data) in row.cells() {
        map.insert(column.name().to_string(), cell_to_json(data));
    }
    Value::Object(map)
}

fn cell_to_json(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::F32(v) => v
            .and_then(|n| serde_json::Number::from_f64(n as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnData::F64(v) => v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .as_ref()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .and_then(|n| {
                let scaled = n.value() as f64 / 10f64.powi(n.scale() as i32);
                serde_json::Number::from_f64(scaled)
            })
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|bytes| Value::String(format!("[blob {} bytes]", bytes.len())))
            .unwrap_or(Value::Null),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| Value::String(xml.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(data)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null)
        }
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::Utc>::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn candidates_prefer_encryption_and_end_with_plaintext() {
        let names: Vec<&str> = DRIVER_CANDIDATES.iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "tds-encrypt-required",
                "tds-encrypt-available",
                "tds-plaintext"
            ]
        );
        assert!(matches!(
            DRIVER_CANDIDATES[0].encryption,
            EncryptionLevel::Required
        ));
        assert!(matches!(
            DRIVER_CANDIDATES[2].encryption,
            EncryptionLevel::NotSupported
        ));
    }

    #[test]
    fn values_bind_as_native_tds_types() {
        assert!(matches!(
            SqlValue::Integer(7).to_sql(),
            ColumnData::I64(Some(7))
        ));
        assert!(matches!(
            SqlValue::Bool(true).to_sql(),
            ColumnData::Bit(Some(true))
        ));
        assert!(matches!(SqlValue::Null.to_sql(), ColumnData::String(None)));

        match SqlValue::Text("abc".to_string()).to_sql() {
            ColumnData::String(Some(text)) => assert_eq!(text, "abc"),
            other => panic!("expected string column data, got {other:?}"),
        }
        match SqlValue::Json(json!({"turns": 2})).to_sql() {
            ColumnData::String(Some(text)) => assert_eq!(text, "{\"turns\":2}"),
            other => panic!("expected string column data, got {other:?}"),
        }
    }

    #[test]
    fn server_rejections_classify_as_query_errors() {
        let error = classify(tiberius::error::Error::Conversion(
            "cannot convert".into(),
        ));
        assert!(matches!(error, DatabaseError::Query(_)));

        let error = classify(tiberius::error::Error::Protocol("tls abort".into()));
        assert!(error.is_transient());
    }

    #[test]
    fn cells_render_as_json_scalars() {
        assert_eq!(cell_to_json(&ColumnData::I32(Some(5))), json!(5));
        assert_eq!(cell_to_json(&ColumnData::Bit(Some(false))), json!(false));
        assert_eq!(cell_to_json(&ColumnData::F64(Some(1.5))), json!(1.5));
        assert_eq!(cell_to_json(&ColumnData::String(None)), Value::Null);
        assert_eq!(
            cell_to_json(&ColumnData::String(Some("x".into()))),
            json!("x")
        );
        assert_eq!(
            cell_to_json(&ColumnData::Binary(Some(vec![1, 2, 3].into()))),
            json!("[blob 3 bytes]")
        );
    }
}
