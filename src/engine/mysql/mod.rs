//! MySQL Database Handle
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - A small pool per handle so concurrent daemon requests do not queue on one socket
//! - Introspection is scoped to `DATABASE()`
//! - Binary data is Base64-encoded for JSON safety

use mysql_async::{prelude::*, Opts, Pool, Row, Value};

use crate::engine::{ColumnInfo, DatabaseHandle, QueryResult};
use crate::error::{Result, SherlockError};

/// Open MySQL connection pool
pub struct MySqlHandle {
    pool: Pool,
}

impl MySqlHandle {
    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool.get_conn().await.map_err(|e| {
            SherlockError::connection_failed(format!("Failed to connect to MySQL: {e}"))
        })
    }
}

impl DatabaseHandle for MySqlHandle {
    async fn open(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| SherlockError::invalid_input(format!("Invalid MySQL URL: {e}")))?;
        let handle = Self { pool: Pool::new(opts) };

        // Fail at open rather than on first use
        let mut conn = handle.conn().await?;
        conn.query_drop("SET SESSION TRANSACTION READ ONLY").await.map_err(|e| {
            SherlockError::connection_failed(format!("Failed to enable read-only session: {e}"))
        })?;
        drop(conn);

        Ok(handle)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.query(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .await
        .map_err(|e| SherlockError::engine_error("mysql", format!("Failed to query tables: {e}")))
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String, String, String, Option<String>)> = conn
            .exec(
                "SELECT column_name, column_type, is_nullable, column_default
                 FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = ?
                 ORDER BY ordinal_position",
                (table,),
            )
            .await
            .map_err(|e| {
                SherlockError::engine_error("mysql", format!("Failed to query columns for {table}: {e}"))
            })?;

        if rows.is_empty() {
            return Err(SherlockError::invalid_input(format!("Table not found: {table}")));
        }

        Ok(rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default)| ColumnInfo {
                name,
                data_type,
                nullable: is_nullable == "YES",
                default,
            })
            .collect())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let mut conn = self.conn().await?;
        let mut result = conn
            .query_iter(sql)
            .await
            .map_err(|e| SherlockError::query_failed(format!("Failed to execute query: {e}")))?;

        // Column metadata is available even for empty result sets
        let column_names: Vec<String> = result
            .columns_ref()
            .iter()
            .map(|col| col.name_str().to_string())
            .collect();

        let rows: Vec<Row> = result
            .collect()
            .await
            .map_err(|e| SherlockError::query_failed(format!("Failed to fetch rows: {e}")))?;
        drop(result);

        let rows_data = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::new(column_names, rows_data))
    }

    async fn close(&self) {
        let _ = self.pool.clone().disconnect().await;
    }
}

fn row_to_json(row: &Row) -> Result<Vec<serde_json::Value>> {
    (0..row.len()).map(|idx| mysql_value_to_json(row, idx)).collect()
}

fn mysql_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| SherlockError::query_failed(format!("Failed to get value at index {idx}")))?;

    let json_value = match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },

        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),

        // NaN/Infinity become null
        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),

        Value::Date(year, month, day, hour, minute, second, micro) => serde_json::Value::String(
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"),
        ),

        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    };

    Ok(json_value)
}
