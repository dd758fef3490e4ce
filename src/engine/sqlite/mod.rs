//! `SQLite` Database Handle
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); calls run on `spawn_blocking`
//! - One connection per handle behind a mutex, opened read-only for files
//! - BLOB data is Base64-encoded for JSON safety
//! - Accepts `sqlite://path`, `file://path`, a bare path, or `:memory:`

use rusqlite::{Connection, OpenFlags, Row};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::engine::{ColumnInfo, DatabaseHandle, QueryResult};
use crate::error::{Result, SherlockError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open `SQLite` connection shared across daemon tasks
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseHandle for SqliteHandle {
    async fn open(url: &str) -> Result<Self> {
        let path = database_path(url).to_string();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .map_err(|e| SherlockError::connection_failed(format!("SQLite open task failed: {e}")))??;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table'
                     AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(|e| {
                    SherlockError::engine_error("sqlite", format!("Failed to query tables: {e}"))
                })?;

            let names = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| {
                    SherlockError::engine_error("sqlite", format!("Failed to fetch table names: {e}"))
                })?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| {
                    SherlockError::engine_error(
                        "sqlite",
                        format!("Failed to collect table names: {e}"),
                    )
                })?;
            Ok(names)
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table.to_string();
        self.with_connection(move |conn| describe_columns(conn, &table)).await
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let sql = sql.to_string();
        self.with_connection(move |conn| execute_query(conn, &sql)).await
    }

    async fn close(&self) {}
}

impl SqliteHandle {
    /// Run `f` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| SherlockError::engine_error("sqlite", format!("Blocking task failed: {e}")))?
    }
}

/// Strip URL schemes down to the path `rusqlite` expects
fn database_path(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("file://"))
        .unwrap_or(url)
}

/// Open `SQLite` connection; files are read-only, `:memory:` is private scratch space
fn open_connection(path: &str) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
    .map_err(|e| {
        SherlockError::connection_failed(format!("Failed to open SQLite database: {e}"))
    })?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| SherlockError::engine_error("sqlite", format!("Failed to set timeout: {e}")))?;
    Ok(conn)
}

fn describe_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    // table-valued pragma so the name can be bound instead of interpolated
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", dflt_value FROM pragma_table_info(?1)")
        .map_err(|e| {
            SherlockError::engine_error(
                "sqlite",
                format!("Failed to prepare table_info for {table}: {e}"),
            )
        })?;

    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(0)?,
                data_type: row.get::<_, String>(1)?,
                nullable: row.get::<_, i32>(2)? == 0, // notnull column: 0 = nullable, 1 = not null
                default: row.get::<_, Option<String>>(3)?,
            })
        })
        .map_err(|e| {
            SherlockError::engine_error("sqlite", format!("Failed to query columns for {table}: {e}"))
        })?
        .collect::<std::result::Result<Vec<ColumnInfo>, _>>()
        .map_err(|e| {
            SherlockError::engine_error(
                "sqlite",
                format!("Failed to collect columns for {table}: {e}"),
            )
        })?;

    if columns.is_empty() {
        return Err(SherlockError::invalid_input(format!("Table not found: {table}")));
    }
    Ok(columns)
}

/// Execute query and return `QueryResult`
fn execute_query(conn: &Connection, query: &str) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| SherlockError::query_failed(format!("Failed to prepare query: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let rows = stmt
        .query([])
        .map_err(|e| SherlockError::query_failed(format!("Failed to execute query: {e}")))?;

    let rows_data = rows
        .mapped(|row| row_to_json(column_names.len(), row))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SherlockError::query_failed(format!("Failed to fetch row: {e}")))?;

    Ok(QueryResult::new(column_names, rows_data))
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(
    width: usize,
    row: &Row,
) -> std::result::Result<Vec<serde_json::Value>, rusqlite::Error> {
    (0..width).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &Row,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let conn = Connection::open(file.path()).expect("open fixture");
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT DEFAULT 'none',
                avatar BLOB,
                score REAL
            );
            CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER);
            INSERT INTO users (name, email, avatar, score) VALUES ('Alice', 'a@example.com', x'0102', 1.5);
            INSERT INTO users (name, email, avatar, score) VALUES ('Bob', NULL, NULL, NULL);",
        )
        .expect("seed fixture");
        file
    }

    async fn open(file: &tempfile::NamedTempFile) -> SqliteHandle {
        SqliteHandle::open(file.path().to_str().unwrap()).await.expect("open handle")
    }

    #[tokio::test]
    async fn test_open_memory() {
        let handle = SqliteHandle::open(":memory:").await.unwrap();
        let result = handle.execute("SELECT 1").await.unwrap();
        assert_eq!(result.rows, vec![vec![serde_json::json!(1)]]);
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let err = SqliteHandle::open(missing.to_str().unwrap()).await.err().unwrap();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    async fn test_list_tables_sorted() {
        let file = fixture();
        let handle = open(&file).await;
        assert_eq!(handle.list_tables().await.unwrap(), vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn test_describe_table() {
        let file = fixture();
        let handle = open(&file).await;
        let columns = handle.describe_table("users").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "email", "avatar", "score"]);
        assert!(!columns[1].nullable);
        assert_eq!(columns[2].default.as_deref(), Some("'none'"));
    }

    #[tokio::test]
    async fn test_describe_unknown_table() {
        let file = fixture();
        let handle = open(&file).await;
        let err = handle.describe_table("ghosts").await.unwrap_err();
        assert!(err.message().contains("Table not found: ghosts"));
    }

    #[tokio::test]
    async fn test_describe_does_not_interpolate_name() {
        let file = fixture();
        let handle = open(&file).await;
        assert!(handle.describe_table("users); DROP TABLE users; --").await.is_err());
        assert_eq!(handle.list_tables().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_value_conversion() {
        let file = fixture();
        let handle = open(&file).await;
        let result =
            handle.execute("SELECT name, email, avatar, score FROM users ORDER BY id").await.unwrap();
        assert_eq!(result.columns, vec!["name", "email", "avatar", "score"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(
            result.rows[0],
            vec![
                serde_json::json!("Alice"),
                serde_json::json!("a@example.com"),
                serde_json::json!("AQI="),
                serde_json::json!(1.5),
            ]
        );
        assert_eq!(result.rows[1][1], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_file_handle_is_read_only() {
        let file = fixture();
        let handle = open(&file).await;
        let err = handle.execute("DELETE FROM users").await.unwrap_err();
        assert_eq!(err.error_code(), "QUERY_FAILED");
        let result = handle.execute("SELECT COUNT(*) FROM users").await.unwrap();
        assert_eq!(result.rows[0][0], serde_json::json!(2));
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(database_path("file:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(database_path("./a.db"), "./a.db");
        assert_eq!(database_path(":memory:"), ":memory:");
    }
}
