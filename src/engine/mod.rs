//! Database Engine Handles and Core Types
//!
//! A [`LiveHandle`] is an open, reusable connection built from a
//! [`ResolvedConnectionConfig`]. The daemon keeps one per connection name;
//! the CLI opens one per invocation when no daemon is running.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions.
//!
//! Every statement reaching [`LiveHandle::execute`] must already have passed
//! [`crate::validation::validate_query`]; every command reaching
//! [`LiveHandle::exec_command`] must have passed
//! [`crate::validation::validate_cache_command`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use crate::error::{Result, SherlockError};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "redis")]
pub mod redis;

/// Supported connection kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
    /// Redis cache store (commands only, no SQL)
    Redis,
}

impl EngineKind {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
            Self::Redis => "redis",
        }
    }

    /// Detect the kind from a connection URL scheme
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if url.starts_with("mysql://") {
            Some(Self::MySQL)
        } else if url.starts_with("sqlite://") || url.starts_with("file://") || url == ":memory:" {
            Some(Self::SQLite)
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Some(Self::Redis)
        } else {
            None
        }
    }

    /// Statement used by the `test` command
    #[must_use]
    pub const fn test_query(&self) -> &'static str {
        match self {
            Self::MySQL => "SELECT 1",
            Self::Postgres | Self::SQLite | Self::Redis => "SELECT 1 as test",
        }
    }

    /// Default TCP port for URL building
    #[must_use]
    pub const fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySQL => Some(3306),
            Self::Redis => Some(6379),
            Self::SQLite => None,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = SherlockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" => Ok(Self::SQLite),
            "redis" => Ok(Self::Redis),
            other => Err(SherlockError::invalid_input(format!("Unsupported database type: {other}"))),
        }
    }
}

/// Fully materialized connection target; contains secrets, never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedConnectionConfig {
    pub kind: EngineKind,
    pub url: String,
}

impl ResolvedConnectionConfig {
    pub fn new(kind: EngineKind, url: impl Into<String>) -> Self {
        Self { kind, url: url.into() }
    }

    /// URL with the password segment replaced, safe for logs
    #[must_use]
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

impl fmt::Debug for ResolvedConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnectionConfig")
            .field("kind", &self.kind)
            .field("url", &self.redacted_url())
            .finish()
    }
}

/// Replace `user:password@` with `user:***@`
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Column data type (engine-specific)
    pub data_type: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Default value (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// `describe` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

/// Whole-schema introspection: table name to its columns
pub type SchemaInfo = BTreeMap<String, Vec<ColumnInfo>>;

/// Query execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows, values in column order
    pub rows: Vec<Vec<serde_json::Value>>,

    pub row_count: usize,
}

impl QueryResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        let row_count = rows.len();
        Self { columns, rows, row_count }
    }
}

/// An open connection to one database
///
/// Implementations must be safe to share across tasks behind an `Arc`.
pub trait DatabaseHandle: Sized + Send + Sync {
    /// Open a handle from a resolved URL
    fn open(url: &str) -> impl Future<Output = Result<Self>> + Send;

    /// Base tables visible in the default schema, sorted by name
    fn list_tables(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Columns of one table in ordinal order; unknown tables are an error
    fn describe_table(&self, table: &str) -> impl Future<Output = Result<Vec<ColumnInfo>>> + Send;

    /// Run a validated read-only statement
    fn execute(&self, sql: &str) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Release server-side resources; the handle must not be used afterwards
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Live handle for any compiled-in engine
pub enum LiveHandle {
    #[cfg(feature = "sqlite")]
    SQLite(sqlite::SqliteHandle),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresHandle),
    #[cfg(feature = "mysql")]
    MySQL(mysql::MySqlHandle),
    #[cfg(feature = "redis")]
    Redis(self::redis::RedisHandle),
}

impl fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LiveHandle({})", self.kind())
    }
}

/// Forward a SQL call to whichever engine variant is live
///
/// Cache handles answer with an error from the enclosing function.
macro_rules! dispatch {
    ($self:expr, $handle:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "sqlite")]
            LiveHandle::SQLite($handle) => $call,
            #[cfg(feature = "postgres")]
            LiveHandle::Postgres($handle) => $call,
            #[cfg(feature = "mysql")]
            LiveHandle::MySQL($handle) => $call,
            #[cfg(feature = "redis")]
            LiveHandle::Redis(_) => return Err(sql_on_cache()),
        }
    };
}

fn sql_on_cache() -> SherlockError {
    SherlockError::invalid_input("Redis connections cannot run SQL operations; use exec")
}

impl LiveHandle {
    /// Open a handle for `config`
    pub async fn open(config: &ResolvedConnectionConfig) -> Result<Self> {
        match config.kind {
            #[cfg(feature = "sqlite")]
            EngineKind::SQLite => Ok(Self::SQLite(sqlite::SqliteHandle::open(&config.url).await?)),
            #[cfg(feature = "postgres")]
            EngineKind::Postgres => {
                Ok(Self::Postgres(postgres::PostgresHandle::open(&config.url).await?))
            }
            #[cfg(feature = "mysql")]
            EngineKind::MySQL => Ok(Self::MySQL(mysql::MySqlHandle::open(&config.url).await?)),
            #[cfg(feature = "redis")]
            EngineKind::Redis => {
                Ok(Self::Redis(self::redis::RedisHandle::open(&config.url).await?))
            }
            #[allow(unreachable_patterns)]
            other => Err(SherlockError::invalid_input(format!(
                "Engine '{other}' is not enabled in this build"
            ))),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EngineKind {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(_) => EngineKind::SQLite,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => EngineKind::Postgres,
            #[cfg(feature = "mysql")]
            Self::MySQL(_) => EngineKind::MySQL,
            #[cfg(feature = "redis")]
            Self::Redis(_) => EngineKind::Redis,
        }
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        dispatch!(self, h => h.list_tables().await)
    }

    pub async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let columns = dispatch!(self, h => h.describe_table(table).await)?;
        Ok(TableDescription { table: table.to_string(), columns })
    }

    /// Describe every table returned by `list_tables`
    pub async fn introspect_schema(&self) -> Result<SchemaInfo> {
        let mut schema = SchemaInfo::new();
        for table in self.list_tables().await? {
            let columns = dispatch!(self, h => h.describe_table(&table).await)?;
            schema.insert(table, columns);
        }
        Ok(schema)
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        dispatch!(self, h => h.execute(sql).await)
    }

    /// Run a validated cache command; SQL engines refuse
    pub async fn exec_command(&self, cmd: &str, args: &[String]) -> Result<serde_json::Value> {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis(h) => h.exec(cmd, args).await,
            #[allow(unreachable_patterns)]
            other => Err(SherlockError::invalid_input(format!(
                "Cannot run cache command {cmd} on a {} connection; use query",
                other.kind()
            ))),
        }
    }

    /// Round-trip the engine's test statement, or PING for a cache
    pub async fn test(&self) -> Result<()> {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis(h) => h.ping().await,
            #[allow(unreachable_patterns)]
            _ => self.execute(self.kind().test_query()).await.map(|_| ()),
        }
    }

    pub async fn close(&self) {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(h) => h.close().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(h) => h.close().await,
            #[cfg(feature = "mysql")]
            Self::MySQL(h) => h.close().await,
            #[cfg(feature = "redis")]
            Self::Redis(_) => {}
        }
    }
}
