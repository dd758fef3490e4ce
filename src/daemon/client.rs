//! Daemon Client
//!
//! One socket connection per call. Frames whose `id` does not match the
//! outstanding request are skipped, as are frames that do not parse.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{
    read_frame, DaemonCommand, DaemonRequest, DaemonResponse, Frame, MAX_FRAME_BYTES,
};
use super::DEFAULT_REQUEST_TIMEOUT;
use crate::engine::{QueryResult, SchemaInfo, TableDescription};
use crate::error::{Result, SherlockError};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into(), timeout: DEFAULT_REQUEST_TIMEOUT }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send one request and wait for its response
    ///
    /// Returns the response `data` (`Null` when absent) on success.
    pub async fn call(&self, command: &str, args: Option<Value>) -> Result<Value> {
        let request = DaemonRequest::new(command, args);
        tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| SherlockError::DaemonTimeout)?
    }

    async fn exchange(&self, request: &DaemonRequest) -> Result<Value> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            SherlockError::daemon_unavailable(format!("Failed to connect to daemon: {e}"))
        })?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(request.to_frame()?.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        while let Some(frame) = read_frame(&mut reader, MAX_FRAME_BYTES).await? {
            let Frame::Text(line) = frame else {
                debug!(?frame, "ignoring unreadable frame");
                continue;
            };
            let response = match serde_json::from_str::<DaemonResponse>(&line) {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, "ignoring malformed frame");
                    continue;
                }
            };
            if response.id != request.id {
                debug!(id = %response.id, "ignoring frame for another request");
                continue;
            }
            return response.into_result();
        }

        Err(SherlockError::daemon_unavailable("Connection to daemon closed unexpectedly"))
    }

    async fn call_typed<T: DeserializeOwned>(&self, command: DaemonCommand, args: Option<Value>) -> Result<T> {
        let data = self.call(command.as_str(), args).await?;
        serde_json::from_value(data).map_err(|e| {
            SherlockError::daemon_error(format!("Unexpected {command} response: {e}"))
        })
    }

    /// Pid of the daemon
    pub async fn ping(&self) -> Result<u32> {
        let data = self.call(DaemonCommand::Ping.as_str(), None).await?;
        data.get("pid")
            .and_then(Value::as_u64)
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| SherlockError::daemon_error("Unexpected ping response"))
    }

    pub async fn list_connections(&self) -> Result<Vec<String>> {
        let data = self.call(DaemonCommand::Connections.as_str(), None).await?;
        field(data, "connections")
    }

    pub async fn query(&self, connection: &str, sql: &str) -> Result<QueryResult> {
        self.call_typed(DaemonCommand::Query, Some(json!({ "connection": connection, "sql": sql })))
            .await
    }

    pub async fn tables(&self, connection: &str) -> Result<Vec<String>> {
        let data =
            self.call(DaemonCommand::Tables.as_str(), Some(json!({ "connection": connection }))).await?;
        field(data, "tables")
    }

    pub async fn describe(&self, connection: &str, table: &str) -> Result<TableDescription> {
        self.call_typed(
            DaemonCommand::Describe,
            Some(json!({ "connection": connection, "table": table })),
        )
        .await
    }

    pub async fn introspect(&self, connection: &str) -> Result<SchemaInfo> {
        self.call_typed(DaemonCommand::Introspect, Some(json!({ "connection": connection }))).await
    }

    /// `{connection, type, status}` on success
    pub async fn test(&self, connection: &str) -> Result<Value> {
        self.call(DaemonCommand::Test.as_str(), Some(json!({ "connection": connection }))).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.call(DaemonCommand::Shutdown.as_str(), None).await.map(|_| ())
    }

    /// Run a cache-store command; it is validated again by the daemon
    pub async fn exec(&self, connection: &str, cmd: &str, args: &[String]) -> Result<Value> {
        let data = self
            .call(
                DaemonCommand::Exec.as_str(),
                Some(json!({ "connection": connection, "cmd": cmd, "args": args })),
            )
            .await?;
        field(data, "result")
    }

    /// Names that resolved after the reload
    pub async fn reload(&self) -> Result<Vec<String>> {
        let data = self.call(DaemonCommand::Reload.as_str(), None).await?;
        field(data, "connections")
    }
}

fn field<T: DeserializeOwned>(mut data: Value, name: &str) -> Result<T> {
    let value = data.get_mut(name).map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| SherlockError::daemon_error(format!("Unexpected response field {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixListener;

    /// Answer the first request line with the given frames, in order
    async fn scripted_daemon(socket: &Path, frames: Vec<String>) -> tokio::task::JoinHandle<()> {
        let listener = UnixListener::bind(socket).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: DaemonRequest = serde_json::from_str(&line).unwrap();
            for frame in frames {
                let frame = frame.replace("$ID", &request.id);
                writer.write_all(frame.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().join("absent.sock"));
        let err = client.call("ping", None).await.unwrap_err();
        assert_eq!(err.error_code(), "DAEMON_UNAVAILABLE");
        assert!(err.message().starts_with("Failed to connect to daemon: "));
    }

    #[tokio::test]
    async fn test_skips_foreign_and_malformed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server = scripted_daemon(
            &socket,
            vec![
                "garbage".to_string(),
                r#"{"id":"someone-else","success":true,"data":{"pong":true,"pid":1}}"#.to_string(),
                r#"{"id":"$ID","success":true,"data":{"pong":true,"pid":4242}}"#.to_string(),
            ],
        )
        .await;

        assert_eq!(DaemonClient::new(&socket).ping().await.unwrap(), 4242);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_skips_non_utf8_frame() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let line = BufReader::new(reader).lines().next_line().await.unwrap().unwrap();
            let request: DaemonRequest = serde_json::from_str(&line).unwrap();

            writer.write_all(b"\xc3\x28 not utf-8\n").await.unwrap();
            let reply = DaemonResponse::ok(request.id, json!({"pong": true, "pid": 7}));
            writer.write_all(reply.to_frame().unwrap().as_bytes()).await.unwrap();
        });

        assert_eq!(DaemonClient::new(&socket).ping().await.unwrap(), 7);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_response_becomes_daemon_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server = scripted_daemon(
            &socket,
            vec![r#"{"id":"$ID","success":false,"error":"Unknown command: nope"}"#.to_string()],
        )
        .await;

        let err = DaemonClient::new(&socket).call("nope", None).await.unwrap_err();
        assert_eq!(err.error_code(), "DAEMON_ERROR");
        assert_eq!(err.message(), "Unknown command: nope");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_data_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server =
            scripted_daemon(&socket, vec![r#"{"id":"$ID","success":true}"#.to_string()]).await;

        assert_eq!(DaemonClient::new(&socket).call("ping", None).await.unwrap(), Value::Null);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_before_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let server = scripted_daemon(&socket, Vec::new()).await;

        let err = DaemonClient::new(&socket).call("ping", None).await.unwrap_err();
        assert_eq!(err.message(), "Connection to daemon closed unexpectedly");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let client = DaemonClient::new(&socket).with_timeout(Duration::from_millis(100));
        let err = client.call("ping", None).await.unwrap_err();
        assert_eq!(err.error_code(), "DAEMON_TIMEOUT");
        assert_eq!(err.message(), "Daemon request timed out");
        server.abort();
    }
}
