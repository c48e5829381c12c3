//! # sql-session-store
//!
//! A multi-backend SQL persistence and introspection layer with a keyed
//! session history store on top.
//!
//! ## Features
//!
//! - One uniform [`DatabaseService`] over PostgreSQL, MySQL, SQL Server and
//!   SQLite
//! - Per-backend SQL dialect rendering (quoting, placeholders, upserts,
//!   random sampling)
//! - Live schema introspection: tables, columns, keys, indexes
//! - Column sampling and statistics for data exploration
//! - Transparent repair-and-retry of transient connection faults
//! - [`SessionHistoryStore`]: idempotent, upsert-keyed session records with
//!   JSON payloads
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sql_session_store::{get_service, Backend, ConnectionParams, SessionHistoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let params = ConnectionParams::new("", "", "", "./data/app.db");
//!     let service = get_service(Backend::Sqlite, params).unwrap();
//!
//!     let store = SessionHistoryStore::with_default_table(service.clone())
//!         .await
//!         .unwrap();
//!     store
//!         .store_session("s1", &serde_json::json!({"turns": 2}))
//!         .await
//!         .unwrap();
//!
//!     let tables = service.get_tables().await.unwrap();
//!     println!("{tables:?}");
//! }
//! ```

// Public modules
pub mod config;
pub mod database;
pub mod dialect;
pub mod schema;
pub mod session;
pub mod value;

// Public exports
pub use config::{Backend, ConnectionParams, DEFAULT_TABLE_NAME};
pub use database::{get_service, DatabaseError, DatabaseService};
pub use schema::{
    ColumnInfo, ColumnStats, ForeignKey, IndexInfo, QueryResult, TableMetadata,
};
pub use session::SessionHistoryStore;
pub use value::SqlValue;
