//! Dialect strategy: per-backend SQL rendering
//!
//! Pure functions that turn a logical operation into the exact SQL text and
//! bound parameters for one backend. Every function matches exhaustively
//! over [`Backend`], so each operation has a defined rendering for every
//! supported tag; adding a backend is a compiler-enforced change here.
//!
//! Identifiers (table and column names) come only from trusted
//! configuration and are quoted; user-supplied values are always bound as
//! parameters, never interpolated.

use serde_json::Value;

use crate::config::Backend;
use crate::value::SqlValue;

/// A rendered statement with its bound parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Quote an identifier for the given backend.
///
/// The closing quote character is doubled when it appears inside the
/// identifier, the same defense the underlying engines apply.
pub fn quote_identifier(backend: Backend, identifier: &str) -> String {
    match backend {
        Backend::Mysql => format!("`{}`", identifier.replace('`', "``")),
        Backend::Mssql => format!("[{}]", identifier.replace(']', "]]")),
        Backend::Postgres | Backend::Sqlite => {
            format!("\"{}\"", identifier.replace('"', "\"\""))
        }
    }
}

/// Positional placeholder for the `index`-th parameter (1-based).
pub fn placeholder(backend: Backend, index: usize) -> String {
    match backend {
        Backend::Postgres => format!("${index}"),
        Backend::Mssql => format!("@P{index}"),
        Backend::Mysql | Backend::Sqlite => "?".to_string(),
    }
}

/// Render the idempotent create statement for the session history table.
///
/// The schema is two columns: `session_id` (string primary key) and `data`
/// (the closest JSON-capable type the backend has). SQL Server has no
/// `IF NOT EXISTS` for tables, so existence is checked against `sysobjects`.
pub fn create_history_table(backend: Backend, table: &str) -> String {
    let quoted = quote_identifier(backend, table);
    match backend {
        Backend::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (session_id TEXT PRIMARY KEY, data JSONB)"
        ),
        Backend::Mysql => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (session_id VARCHAR(255) PRIMARY KEY, data JSON)"
        ),
        Backend::Mssql => format!(
            "IF NOT EXISTS (SELECT * FROM sysobjects WHERE name = '{}' AND xtype = 'U') \
             CREATE TABLE {quoted} (session_id NVARCHAR(255) PRIMARY KEY, data NVARCHAR(MAX))",
            table.replace('\'', "''")
        ),
        Backend::Sqlite => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (session_id TEXT PRIMARY KEY, data TEXT)"
        ),
    }
}

/// Render the atomic insert-or-replace of one session row.
///
/// Always a single native upsert statement; a separate existence check
/// would race under concurrent writers.
pub fn upsert_session(backend: Backend, table: &str, session_id: &str, data: &Value) -> Statement {
    let quoted = quote_identifier(backend, table);
    let sql = match backend {
        Backend::Postgres => format!(
            "INSERT INTO {quoted} (session_id, data) VALUES ($1, $2) \
             ON CONFLICT (session_id) DO UPDATE SET data = EXCLUDED.data"
        ),
        Backend::Mysql => format!(
            "INSERT INTO {quoted} (session_id, data) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE data = VALUES(data)"
        ),
        Backend::Mssql => format!(
            "MERGE {quoted} AS target \
             USING (SELECT @P1 AS session_id, @P2 AS data) AS source \
             ON target.session_id = source.session_id \
             WHEN MATCHED THEN UPDATE SET data = source.data \
             WHEN NOT MATCHED THEN INSERT (session_id, data) \
             VALUES (source.session_id, source.data);"
        ),
        Backend::Sqlite => format!(
            "INSERT INTO {quoted} (session_id, data) VALUES (?, ?) \
             ON CONFLICT (session_id) DO UPDATE SET data = excluded.data"
        ),
    };
    Statement {
        sql,
        params: vec![
            SqlValue::Text(session_id.to_string()),
            SqlValue::Json(data.clone()),
        ],
    }
}

/// Render the lookup of one session's data column.
pub fn select_session(backend: Backend, table: &str) -> String {
    format!(
        "SELECT data FROM {} WHERE session_id = {}",
        quote_identifier(backend, table),
        placeholder(backend, 1)
    )
}

/// Render the listing of all session identifiers, ordered for determinism.
pub fn select_session_ids(backend: Backend, table: &str) -> String {
    format!(
        "SELECT session_id FROM {} ORDER BY session_id",
        quote_identifier(backend, table)
    )
}

/// Render the idempotent delete of one session row.
pub fn delete_session(backend: Backend, table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE session_id = {}",
        quote_identifier(backend, table),
        placeholder(backend, 1)
    )
}

/// Render a random sample of up to `limit` distinct non-null values.
///
/// PostgreSQL rejects `SELECT DISTINCT … ORDER BY RANDOM()` (the sort
/// expression must appear in the select list) and SQL Server rejects the
/// same shape with `NEWID()`, so both sample from a distinct subquery.
pub fn sample_distinct(backend: Backend, table: &str, column: &str, limit: u32) -> String {
    let quoted_table = quote_identifier(backend, table);
    let quoted_column = quote_identifier(backend, column);
    match backend {
        Backend::Postgres => format!(
            "SELECT {quoted_column} FROM \
             (SELECT DISTINCT {quoted_column} FROM {quoted_table} \
             WHERE {quoted_column} IS NOT NULL) AS sampled \
             ORDER BY RANDOM() LIMIT {limit}"
        ),
        Backend::Mysql => format!(
            "SELECT DISTINCT {quoted_column} FROM {quoted_table} \
             WHERE {quoted_column} IS NOT NULL ORDER BY RAND() LIMIT {limit}"
        ),
        Backend::Mssql => format!(
            "SELECT TOP {limit} {quoted_column} FROM \
             (SELECT DISTINCT {quoted_column} FROM {quoted_table} \
             WHERE {quoted_column} IS NOT NULL) AS sampled \
             ORDER BY NEWID()"
        ),
        Backend::Sqlite => format!(
            "SELECT DISTINCT {quoted_column} FROM {quoted_table} \
             WHERE {quoted_column} IS NOT NULL ORDER BY RANDOM() LIMIT {limit}"
        ),
    }
}

/// Render the single aggregate query behind column statistics.
pub fn column_stats(backend: Backend, table: &str, column: &str) -> String {
    let quoted_table = quote_identifier(backend, table);
    let quoted_column = quote_identifier(backend, column);
    let count = quote_identifier(backend, "count");
    let unique_count = quote_identifier(backend, "unique_count");
    let min_value = quote_identifier(backend, "min_value");
    let max_value = quote_identifier(backend, "max_value");
    format!(
        "SELECT COUNT(*) AS {count}, COUNT(DISTINCT {quoted_column}) AS {unique_count}, \
         MIN({quoted_column}) AS {min_value}, MAX({quoted_column}) AS {max_value} \
         FROM {quoted_table} WHERE {quoted_column} IS NOT NULL"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quoting_doubles_embedded_quote_characters() {
        assert_eq!(quote_identifier(Backend::Postgres, "users"), "\"users\"");
        assert_eq!(
            quote_identifier(Backend::Sqlite, "ta\"ble"),
            "\"ta\"\"ble\""
        );
        assert_eq!(quote_identifier(Backend::Mysql, "ta`ble"), "`ta``ble`");
        assert_eq!(quote_identifier(Backend::Mssql, "ta]ble"), "[ta]]ble]");
    }

    #[test]
    fn placeholders_follow_backend_convention() {
        assert_eq!(placeholder(Backend::Postgres, 2), "$2");
        assert_eq!(placeholder(Backend::Mssql, 2), "@P2");
        assert_eq!(placeholder(Backend::Mysql, 2), "?");
        assert_eq!(placeholder(Backend::Sqlite, 2), "?");
    }

    #[test]
    fn create_table_is_conditional_on_every_backend() {
        for backend in [Backend::Postgres, Backend::Mysql, Backend::Sqlite] {
            let sql = create_history_table(backend, "session_history");
            assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS"), "{sql}");
        }
        let sql = create_history_table(Backend::Mssql, "session_history");
        assert!(sql.starts_with("IF NOT EXISTS (SELECT"), "{sql}");
        assert!(sql.contains("CREATE TABLE [session_history]"), "{sql}");
        assert!(sql.contains("NVARCHAR(MAX)"), "{sql}");
    }

    #[test]
    fn upsert_uses_native_syntax_per_backend() {
        let data = json!({"turns": 2});
        let pg = upsert_session(Backend::Postgres, "t", "s1", &data);
        assert!(pg.sql.contains("ON CONFLICT (session_id) DO UPDATE"), "{}", pg.sql);

        let mysql = upsert_session(Backend::Mysql, "t", "s1", &data);
        assert!(mysql.sql.contains("ON DUPLICATE KEY UPDATE"), "{}", mysql.sql);

        let mssql = upsert_session(Backend::Mssql, "t", "s1", &data);
        assert!(mssql.sql.starts_with("MERGE"), "{}", mssql.sql);
        assert!(mssql.sql.contains("WHEN MATCHED"), "{}", mssql.sql);
        assert!(mssql.sql.contains("WHEN NOT MATCHED"), "{}", mssql.sql);

        let sqlite = upsert_session(Backend::Sqlite, "t", "s1", &data);
        assert!(sqlite.sql.contains("ON CONFLICT (session_id) DO UPDATE"), "{}", sqlite.sql);
    }

    #[test]
    fn upsert_binds_id_and_payload_as_parameters() {
        let data = json!({"k": "v"});
        let statement = upsert_session(Backend::Postgres, "t", "s1", &data);
        assert_eq!(statement.params.len(), 2);
        assert_eq!(statement.params[0], SqlValue::Text("s1".to_string()));
        assert_eq!(statement.params[1], SqlValue::Json(data));
        assert!(!statement.sql.contains("s1"), "{}", statement.sql);
    }

    #[test]
    fn sampling_uses_backend_random_ordering() {
        let pg = sample_distinct(Backend::Postgres, "t", "c", 3);
        assert!(pg.contains("ORDER BY RANDOM() LIMIT 3"), "{pg}");

        let mysql = sample_distinct(Backend::Mysql, "t", "c", 3);
        assert!(mysql.contains("ORDER BY RAND() LIMIT 3"), "{mysql}");

        let mssql = sample_distinct(Backend::Mssql, "t", "c", 3);
        assert!(mssql.contains("TOP 3"), "{mssql}");
        assert!(mssql.contains("ORDER BY NEWID()"), "{mssql}");

        let sqlite = sample_distinct(Backend::Sqlite, "t", "c", 3);
        assert!(sqlite.contains("ORDER BY RANDOM() LIMIT 3"), "{sqlite}");
    }

    #[test]
    fn sampling_excludes_null_values() {
        for backend in [Backend::Postgres, Backend::Mysql, Backend::Mssql, Backend::Sqlite] {
            let sql = sample_distinct(backend, "t", "c", 3);
            assert!(sql.contains("IS NOT NULL"), "{sql}");
            assert!(sql.contains("DISTINCT"), "{sql}");
        }
    }

    #[test]
    fn stats_query_is_a_single_aggregate() {
        let sql = column_stats(Backend::Sqlite, "users", "age");
        assert!(sql.contains("COUNT(*)"), "{sql}");
        assert!(sql.contains("COUNT(DISTINCT \"age\")"), "{sql}");
        assert!(sql.contains("MIN(\"age\")"), "{sql}");
        assert!(sql.contains("MAX(\"age\")"), "{sql}");
        assert!(sql.contains("IS NOT NULL"), "{sql}");
    }

    #[test]
    fn session_lookups_use_bound_placeholders() {
        assert_eq!(
            select_session(Backend::Postgres, "session_history"),
            "SELECT data FROM \"session_history\" WHERE session_id = $1"
        );
        assert_eq!(
            delete_session(Backend::Mssql, "session_history"),
            "DELETE FROM [session_history] WHERE session_id = @P1"
        );
        assert_eq!(
            select_session_ids(Backend::Mysql, "session_history"),
            "SELECT session_id FROM `session_history` ORDER BY session_id"
        );
    }
}
