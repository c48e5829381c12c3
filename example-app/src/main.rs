use serde_json::json;
use sql_session_store::{get_service, Backend, ConnectionParams, SessionHistoryStore};

mod database;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sql_session_store=debug".into()),
        )
        .init();

    // An in-memory SQLite database; swap the backend tag and parameters to
    // point at PostgreSQL, MySQL or SQL Server instead.
    let params = ConnectionParams::new("", "", "", ":memory:");
    let service = get_service(Backend::Sqlite, params).expect("Failed to create database service");

    database::setup(service.as_ref())
        .await
        .expect("Failed to setup database");

    // Introspect the seeded schema
    let tables = service.get_tables().await.expect("Failed to list tables");
    println!("tables: {tables:?}");

    for table in &tables {
        let metadata = service
            .describe_table(table)
            .await
            .expect("Failed to describe table");
        println!(
            "{table}: {} columns, primary key {:?}, {} foreign keys, {} indexes",
            metadata.columns.len(),
            metadata.primary_key,
            metadata.foreign_keys.len(),
            metadata.indexes.len()
        );
    }

    // Sample and summarize one column
    let names = service
        .get_unique_values("users", "name", 10)
        .await
        .expect("Failed to sample column");
    println!("sampled names: {names:?}");

    let stats = service
        .get_column_stats("users", "email")
        .await
        .expect("Failed to compute column stats");
    println!(
        "email stats: count={} unique={} min={} max={}",
        stats.count, stats.unique_count, stats.min_value, stats.max_value
    );

    // Session history on the same database
    let store = SessionHistoryStore::with_default_table(service)
        .await
        .expect("Failed to open session store");

    store
        .store_session("s1", &json!({"turns": 1}))
        .await
        .expect("Failed to store session");
    store
        .store_session("s1", &json!({"turns": 2}))
        .await
        .expect("Failed to store session");

    let sessions = store
        .get_all_sessions()
        .await
        .expect("Failed to list sessions");
    let payload = store.get_session("s1").await.expect("Failed to read session");
    println!("sessions: {sessions:?}, s1 = {payload}");
}
