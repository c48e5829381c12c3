//! Connection configuration and backend selection
//!
//! The backend tag is a closed enumeration: selecting anything outside it is
//! a configuration error caught before any connection is attempted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::database::traits::DatabaseError;

/// Default name of the session history backing table.
pub const DEFAULT_TABLE_NAME: &str = "session_history";

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 30;

/// The closed set of supported SQL backends.
///
/// Adding a backend means adding a variant here, one dialect rendering per
/// operation, and one service implementation; every `match` over this enum
/// is exhaustive, so the compiler enumerates the change sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Mysql,
    Mssql,
    Sqlite,
}

impl Backend {
    /// Canonical tag for this backend.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Mysql => "mysql",
            Backend::Mssql => "mssql",
            Backend::Sqlite => "sqlite",
        }
    }

    /// Default TCP port, if the backend is networked.
    ///
    /// SQLite is file-based and has no port.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Backend::Postgres => Some(5432),
            Backend::Mysql => Some(3306),
            Backend::Mssql => Some(1433),
            Backend::Sqlite => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "mysql" => Ok(Backend::Mysql),
            "mssql" | "sqlserver" => Ok(Backend::Mssql),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(DatabaseError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Connection parameters for a database service.
///
/// Immutable once a service is constructed. For SQLite, `database` is the
/// file path (or `:memory:`) and the remaining network fields are unused.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    pub host: String,

    /// Explicit port. When absent, a port embedded in `host` (`host:port`)
    /// wins, then the backend default.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECONDS
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            query_timeout_seconds: DEFAULT_QUERY_TIMEOUT_SECONDS,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_query_timeout(mut self, seconds: u64) -> Self {
        self.query_timeout_seconds = seconds;
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    /// Resolve the effective host and port.
    ///
    /// An explicit `port` takes precedence; otherwise a `host:port` suffix
    /// is honored; otherwise the backend default applies. A suffix that does
    /// not parse as a port is treated as part of the host name.
    pub fn host_port(&self, backend: Backend) -> (String, Option<u16>) {
        if let Some(port) = self.port {
            return (self.host.clone(), Some(port));
        }
        if let Some((host, suffix)) = self.host.rsplit_once(':') {
            if let Ok(port) = suffix.parse::<u16>() {
                return (host.to_string(), Some(port));
            }
        }
        (self.host.clone(), backend.default_port())
    }
}
