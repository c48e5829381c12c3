//! Session history persistence
//!
//! A small keyed store over any [`DatabaseService`]: one row per session,
//! keyed by session id, with the payload held as JSON. Writes are atomic
//! upserts, so storing the same id twice replaces the payload instead of
//! duplicating the row.

use std::sync::Arc;

use serde_json::Value;

use crate::config::DEFAULT_TABLE_NAME;
use crate::database::{DatabaseError, DatabaseService};
use crate::dialect;
use crate::value::SqlValue;

/// Keyed session history store backed by a SQL table.
pub struct SessionHistoryStore {
    service: Arc<dyn DatabaseService>,
    table_name: String,
}

impl SessionHistoryStore {
    /// Open a store over `table_name`, creating the backing table when it
    /// does not exist yet. Safe to call concurrently from multiple
    /// processes; the create statement is conditional on every backend.
    pub async fn new(
        service: Arc<dyn DatabaseService>,
        table_name: impl Into<String>,
    ) -> Result<Self, DatabaseError> {
        let table_name = table_name.into();
        let sql = dialect::create_history_table(service.backend(), &table_name);
        service.execute(&sql, &[]).await?;
        tracing::debug!(table = %table_name, backend = %service.backend(), "session history table ready");
        Ok(Self {
            service,
            table_name,
        })
    }

    /// Open a store over the default `session_history` table.
    pub async fn with_default_table(
        service: Arc<dyn DatabaseService>,
    ) -> Result<Self, DatabaseError> {
        Self::new(service, DEFAULT_TABLE_NAME).await
    }

    /// The name of the backing table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Insert or replace the record for `session_id`.
    pub async fn store_session(
        &self,
        session_id: &str,
        data: &Value,
    ) -> Result<(), DatabaseError> {
        let statement =
            dialect::upsert_session(self.service.backend(), &self.table_name, session_id, data);
        self.service.execute(&statement.sql, &statement.params).await?;
        Ok(())
    }

    /// The stored payload for `session_id`, or an empty object when the
    /// session is unknown or its payload is empty.
    pub async fn get_session(&self, session_id: &str) -> Result<Value, DatabaseError> {
        let sql = dialect::select_session(self.service.backend(), &self.table_name);
        let result = self
            .service
            .execute(&sql, &[SqlValue::Text(session_id.to_string())])
            .await?;
        match result.rows.first().and_then(|row| row.get("data")) {
            Some(data) => decode_session_data(data),
            None => Ok(Value::Object(serde_json::Map::new())),
        }
    }

    /// All stored session identifiers, sorted.
    pub async fn get_all_sessions(&self) -> Result<Vec<String>, DatabaseError> {
        let sql = dialect::select_session_ids(self.service.backend(), &self.table_name);
        let result = self.service.execute(&sql, &[]).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                row.get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    /// Delete the record for `session_id`. Deleting an unknown session is
    /// not an error.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), DatabaseError> {
        let sql = dialect::delete_session(self.service.backend(), &self.table_name);
        self.service
            .execute(&sql, &[SqlValue::Text(session_id.to_string())])
            .await?;
        Ok(())
    }
}

/// Decode the stored `data` column into a JSON value.
///
/// Backends without a native JSON column hand the payload back as text;
/// those with one hand it back already parsed. Null or empty payloads decode
/// to an empty object.
fn decode_session_data(data: &Value) -> Result<Value, DatabaseError> {
    match data {
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        Value::String(text) if text.trim().is_empty() => {
            Ok(Value::Object(serde_json::Map::new()))
        }
        Value::String(text) => Ok(serde_json::from_str(text)?),
        parsed => Ok(parsed.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{Backend, ConnectionParams};
    use crate::database::get_service;

    async fn memory_store() -> SessionHistoryStore {
        let params = ConnectionParams::new("", "", "", ":memory:");
        let service = get_service(Backend::Sqlite, params).unwrap();
        SessionHistoryStore::with_default_table(service).await.unwrap()
    }

    #[test]
    fn decoding_tolerates_every_payload_shape() {
        let empty = Value::Object(serde_json::Map::new());
        assert_eq!(decode_session_data(&Value::Null).unwrap(), empty);
        assert_eq!(decode_session_data(&json!("")).unwrap(), empty);
        assert_eq!(decode_session_data(&json!("  ")).unwrap(), empty);
        assert_eq!(
            decode_session_data(&json!("{\"turns\": 2}")).unwrap(),
            json!({"turns": 2})
        );
        assert_eq!(
            decode_session_data(&json!({"turns": 2})).unwrap(),
            json!({"turns": 2})
        );
        assert!(decode_session_data(&json!("not json")).is_err());
    }

    #[tokio::test]
    async fn stores_and_reads_back_a_session() {
        let store = memory_store().await;
        store
            .store_session("s1", &json!({"turns": 2}))
            .await
            .unwrap();
        assert_eq!(store.get_session("s1").await.unwrap(), json!({"turns": 2}));
    }

    #[tokio::test]
    async fn storing_twice_replaces_instead_of_duplicating() {
        let store = memory_store().await;
        store.store_session("s1", &json!({"v": 1})).await.unwrap();
        store.store_session("s1", &json!({"v": 2})).await.unwrap();

        assert_eq!(store.get_session("s1").await.unwrap(), json!({"v": 2}));
        assert_eq!(store.get_all_sessions().await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn unknown_session_reads_as_empty_object() {
        let store = memory_store().await;
        assert_eq!(store.get_session("missing").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn lists_session_ids_sorted() {
        let store = memory_store().await;
        store.store_session("beta", &json!({})).await.unwrap();
        store.store_session("alpha", &json!({})).await.unwrap();
        assert_eq!(
            store.get_all_sessions().await.unwrap(),
            vec!["alpha", "beta"]
        );
    }

    #[tokio::test]
    async fn deleting_is_idempotent() {
        let store = memory_store().await;
        store.store_session("s1", &json!({"v": 1})).await.unwrap();
        store.delete_session("s1").await.unwrap();
        store.delete_session("s1").await.unwrap();

        assert!(store.get_all_sessions().await.unwrap().is_empty());
        assert_eq!(store.get_session("s1").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn full_session_lifecycle() {
        let store = memory_store().await;
        store
            .store_session("s1", &json!({"turns": 2}))
            .await
            .unwrap();
        assert_eq!(store.get_session("s1").await.unwrap(), json!({"turns": 2}));

        store.delete_session("s1").await.unwrap();
        assert!(store.get_all_sessions().await.unwrap().is_empty());
        assert_eq!(store.get_session("s1").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn custom_table_name_is_honored() {
        let params = ConnectionParams::new("", "", "", ":memory:");
        let service = get_service(Backend::Sqlite, params).unwrap();
        let store = SessionHistoryStore::new(service.clone(), "agent_runs")
            .await
            .unwrap();
        assert_eq!(store.table_name(), "agent_runs");

        store.store_session("s1", &json!({"ok": true})).await.unwrap();
        let tables = service.get_tables().await.unwrap();
        assert!(tables.contains(&"agent_runs".to_string()));
    }

    #[tokio::test]
    async fn construction_creates_the_backing_table() {
        let params = ConnectionParams::new("", "", "", ":memory:");
        let service = get_service(Backend::Sqlite, params).unwrap();
        let _store = SessionHistoryStore::with_default_table(service.clone())
            .await
            .unwrap();
        let tables = service.get_tables().await.unwrap();
        assert_eq!(tables, vec![DEFAULT_TABLE_NAME.to_string()]);
    }
}
