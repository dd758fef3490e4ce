//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Sherlock.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `Validation`: Statements or cache commands rejected by the read-only gate
//! - `CredentialUnresolved` / `NoProvider` / `UnsafeIdentifier`: credential resolution failures
//! - `CredentialStore` / `CredentialStoreDenied`: OS keychain failures
//! - `ConnectionFailed` / `QueryFailed` / `EngineError`: database failures
//! - `DaemonUnavailable` / `DaemonTimeout` / `DaemonError` / `AlreadyRunning`: daemon transport and lifecycle
//! - `ConfigError` / `InvalidInput` / `Io`: everything else

use thiserror::Error;

/// Main error type for Sherlock operations
#[derive(Error, Debug)]
pub enum SherlockError {
    /// Statement or command rejected by the validation gate
    #[error("{0}")]
    Validation(String),

    /// A credential reference was claimed by a provider but could not be resolved
    #[error("{0}")]
    CredentialUnresolved(String),

    /// No registered provider claims the reference
    #[error("No credential provider found for: {0}")]
    NoProvider(String),

    /// Keychain service/account contains characters outside the allowed set
    #[error("Unsafe keychain identifier for {field}: {value:?}")]
    UnsafeIdentifier { field: &'static str, value: String },

    /// The OS credential store failed
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// The OS credential store refused access; treated as fatal
    #[error("Credential store access denied: {0}")]
    CredentialStoreDenied(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, unresolved fields)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Daemon socket could not be reached or closed early
    #[error("{0}")]
    DaemonUnavailable(String),

    /// No matching response arrived in time
    #[error("Daemon request timed out")]
    DaemonTimeout,

    /// The daemon answered with `success=false`
    #[error("{0}")]
    DaemonError(String),

    /// Another live daemon owns the socket or pid lock
    #[error("Daemon already running: {0}")]
    AlreadyRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SherlockError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::CredentialUnresolved(_) => "CREDENTIAL_UNRESOLVED",
            Self::NoProvider(_) => "NO_PROVIDER",
            Self::UnsafeIdentifier { .. } => "UNSAFE_IDENTIFIER",
            Self::CredentialStore(_) => "CREDENTIAL_STORE",
            Self::CredentialStoreDenied(_) => "CREDENTIAL_STORE_DENIED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::DaemonUnavailable(_) => "DAEMON_UNAVAILABLE",
            Self::DaemonTimeout => "DAEMON_TIMEOUT",
            Self::DaemonError(_) => "DAEMON_ERROR",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Get human-readable error message
    ///
    /// Messages never contain resolved secrets.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Errors that must stop the daemon instead of being logged and skipped
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AlreadyRunning(_) | Self::CredentialStoreDenied(_))
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an unresolved credential error
    pub fn credential_unresolved(message: impl Into<String>) -> Self {
        Self::CredentialUnresolved(message.into())
    }

    /// Create a no-provider error from a rendered reference
    pub fn no_provider(reference: impl Into<String>) -> Self {
        Self::NoProvider(reference.into())
    }

    pub fn unsafe_identifier(field: &'static str, value: impl Into<String>) -> Self {
        Self::UnsafeIdentifier { field, value: value.into() }
    }

    /// Create a credential store error
    pub fn credential_store(message: impl Into<String>) -> Self {
        Self::CredentialStore(message.into())
    }

    /// Create a fatal credential store error
    pub fn credential_store_denied(message: impl Into<String>) -> Self {
        Self::CredentialStoreDenied(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn daemon_unavailable(message: impl Into<String>) -> Self {
        Self::DaemonUnavailable(message.into())
    }

    pub fn daemon_error(message: impl Into<String>) -> Self {
        Self::DaemonError(message.into())
    }

    pub fn already_running(message: impl Into<String>) -> Self {
        Self::AlreadyRunning(message.into())
    }
}

/// Result type alias for Sherlock operations
pub type Result<T> = std::result::Result<T, SherlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SherlockError::validation("test").error_code(), "VALIDATION_FAILED");
        assert_eq!(SherlockError::no_provider("{}").error_code(), "NO_PROVIDER");
        assert_eq!(SherlockError::unsafe_identifier("account", "a b").error_code(), "UNSAFE_IDENTIFIER");
        assert_eq!(SherlockError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(SherlockError::query_failed("test").error_code(), "QUERY_FAILED");
        assert_eq!(SherlockError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(SherlockError::engine_error("mysql", "test").error_code(), "ENGINE_ERROR");
        assert_eq!(SherlockError::config_error("test").error_code(), "CONFIG_ERROR");
        assert_eq!(SherlockError::DaemonTimeout.error_code(), "DAEMON_TIMEOUT");
        assert_eq!(SherlockError::already_running("pid 1").error_code(), "ALREADY_RUNNING");
    }

    #[test]
    fn test_error_messages() {
        let err = SherlockError::no_provider(r#"{"$vault":"x"}"#);
        assert!(err.message().starts_with("No credential provider found for:"));

        let err = SherlockError::engine_error("postgres", "connection timeout");
        assert!(err.message().contains("postgres"));
        assert!(err.message().contains("connection timeout"));

        assert_eq!(SherlockError::DaemonTimeout.message(), "Daemon request timed out");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SherlockError::already_running("pid 42").is_fatal());
        assert!(SherlockError::credential_store_denied("user canceled").is_fatal());
        assert!(!SherlockError::credential_unresolved("missing").is_fatal());
        assert!(!SherlockError::credential_store("locked").is_fatal());
    }
}
