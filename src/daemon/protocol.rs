//! Wire Protocol
//!
//! One JSON object per line in each direction. Requests carry a
//! caller-chosen `id` that the matching response echoes.
//!
//! ```text
//! → {"id":"6f1c…","command":"tables","args":{"connection":"prod"}}
//! ← {"id":"6f1c…","success":true,"data":{"tables":["orders","users"]}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::DEFAULT_CONNECTION;
use crate::error::{Result, SherlockError};

/// Id used when a frame is too broken to recover its own
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Longest frame accepted, excluding the newline
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl DaemonRequest {
    /// New request with a fresh UUID v4 id
    pub fn new(command: impl Into<String>, args: Option<Value>) -> Self {
        Self { id: uuid::Uuid::new_v4().to_string(), command: command.into(), args }
    }

    /// Serialized frame including the trailing newline
    pub fn to_frame(&self) -> Result<String> {
        to_frame(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), success: true, data: Some(data), error: None }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { id: id.into(), success: false, data: None, error: Some(error.into()) }
    }

    /// Error reply for a frame that did not parse as a request
    ///
    /// Keeps the frame's `id` when it is at least a JSON object with a string id.
    pub fn parse_error(frame: &str, error: &serde_json::Error) -> Self {
        let id = serde_json::from_str::<Value>(frame)
            .ok()
            .and_then(|value| value.get("id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
        Self::failure(id, format!("Parse error: {error}"))
    }

    pub fn to_frame(&self) -> Result<String> {
        to_frame(self)
    }

    /// `data` on success (`Null` when absent), otherwise the daemon's error text
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(SherlockError::daemon_error(
                self.error.unwrap_or_else(|| "Unknown daemon error".to_string()),
            ))
        }
    }
}

/// One line read off a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Longer than [`MAX_FRAME_BYTES`]; the rest of the line is unread
    Oversized,
    NotUtf8,
}

/// Read the next newline-terminated frame; `None` at EOF
///
/// Reads at most `max_len + 1` bytes, so a peer cannot make us buffer an
/// unbounded line.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> std::io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_len {
        return Ok(Some(Frame::Oversized));
    }

    Ok(Some(String::from_utf8(buf).map_or(Frame::NotUtf8, Frame::Text)))
}

fn to_frame<T: Serialize>(value: &T) -> Result<String> {
    let mut frame = serde_json::to_string(value)
        .map_err(|e| SherlockError::daemon_error(format!("Failed to encode frame: {e}")))?;
    frame.push('\n');
    Ok(frame)
}

/// Commands the daemon understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCommand {
    Ping,
    Connections,
    Query,
    Tables,
    Describe,
    Introspect,
    Test,
    Shutdown,
    Reload,
    Exec,
}

impl DaemonCommand {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Connections => "connections",
            Self::Query => "query",
            Self::Tables => "tables",
            Self::Describe => "describe",
            Self::Introspect => "introspect",
            Self::Test => "test",
            Self::Shutdown => "shutdown",
            Self::Reload => "reload",
            Self::Exec => "exec",
        }
    }
}

impl fmt::Display for DaemonCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DaemonCommand {
    type Err = SherlockError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ping" => Self::Ping,
            "connections" => Self::Connections,
            "query" => Self::Query,
            "tables" => Self::Tables,
            "describe" => Self::Describe,
            "introspect" => Self::Introspect,
            "test" => Self::Test,
            "shutdown" => Self::Shutdown,
            "reload" => Self::Reload,
            "exec" => Self::Exec,
            other => return Err(SherlockError::daemon_error(format!("Unknown command: {other}"))),
        })
    }
}

/// Arguments shared by the connection-scoped commands
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandArgs {
    #[serde(default = "default_connection")]
    pub connection: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    /// Cache-store command verb for `exec`
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

impl CommandArgs {
    /// Absent or `null` args mean "all defaults"
    pub fn from_value(args: Option<&Value>) -> Result<Self> {
        match args {
            None | Some(Value::Null) => Ok(Self {
                connection: default_connection(),
                sql: None,
                table: None,
                cmd: None,
                args: Vec::new(),
            }),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| SherlockError::invalid_input(format!("Invalid command arguments: {e}"))),
        }
    }

    pub fn sql(&self) -> Result<&str> {
        self.sql
            .as_deref()
            .ok_or_else(|| SherlockError::invalid_input("Missing required argument: sql"))
    }

    pub fn table(&self) -> Result<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| SherlockError::invalid_input("Missing required argument: table"))
    }

    pub fn cmd(&self) -> Result<&str> {
        self.cmd
            .as_deref()
            .ok_or_else(|| SherlockError::invalid_input("Missing required argument: cmd"))
    }
}
