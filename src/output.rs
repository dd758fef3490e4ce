//! JSON Output Envelope Types
//!
//! Every CLI command prints exactly one envelope on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "via": "daemon", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `via` says whether the daemon answered or the CLI opened its own connection.

use serde::{Deserialize, Serialize};

use crate::error::SherlockError;

/// Where a command was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutedVia {
    Daemon,
    Direct,
}

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<ExecutedVia>,

    /// Command-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), via: None, data, meta }
    }

    #[must_use]
    pub fn via(mut self, via: ExecutedVia) -> Self {
        self.via = Some(via);
        self
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    /// Create error envelope from `SherlockError`
    pub fn from_error(command: impl Into<String>, err: &SherlockError) -> Self {
        Self::new(command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "VALIDATION_FAILED", "DAEMON_TIMEOUT")
    pub code: String,

    /// Human-readable error message, never containing resolved secrets
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (query results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    #[must_use]
    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "query",
            serde_json::json!({"row_count": 1}),
            Metadata::with_rows(42, 1),
        )
        .via(ExecutedVia::Daemon);

        insta::assert_snapshot!(
            serde_json::to_string(&envelope).unwrap(),
            @r#"{"ok":true,"command":"query","via":"daemon","data":{"row_count":1},"meta":{"execution_ms":42,"rows_returned":1}}"#
        );
    }

    #[test]
    fn test_via_omitted_when_unset() {
        let envelope = SuccessEnvelope::new("validate", serde_json::json!({}), Metadata::new(0));
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("via"));
        assert!(!json.contains("rows_returned"));
    }

    #[test]
    fn test_error_envelope_from_error() {
        let err = SherlockError::validation("Multiple statements are not allowed (read-only mode)");
        let envelope = ErrorEnvelope::from_error("query", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.command, "query");
        assert_eq!(envelope.error.code, "VALIDATION_FAILED");
        assert_eq!(envelope.error.message, "Multiple statements are not allowed (read-only mode)");
    }

    #[test]
    fn test_error_envelope_serialization() {
        let envelope = ErrorEnvelope::from_error("tables", &SherlockError::DaemonTimeout);
        insta::assert_snapshot!(
            serde_json::to_string(&envelope).unwrap(),
            @r#"{"ok":false,"command":"tables","error":{"code":"DAEMON_TIMEOUT","message":"Daemon request timed out"}}"#
        );
    }
}
