//! Sherlock - Read-Only Database Exploration
//!
//! Sherlock lets a user (or an agent) look at databases without being able to
//! change them. Its core is the trust boundary around that:
//!
//! - credentials are described by references (`{"$env": ...}`,
//!   `{"$keychain": ...}`, or a literal) and resolved by priority-ordered
//!   providers;
//! - every SQL statement and cache command passes a read-only validation gate
//!   before it can reach a live connection;
//! - a background daemon resolves credentials once and multiplexes many
//!   short-lived CLI invocations over cached connections.
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`credentials`] - Credential references, providers and the resolver
//! - [`validation`] - Read-only SQL and cache-command gate
//! - [`config`] - Config file discovery and connection resolution
//! - [`engine`] - Live handles for `PostgreSQL`, `MySQL`, `SQLite` and Redis
//! - [`daemon`] - Connection-caching daemon, its client and wire protocol
//! - [`context`] - Process-wide context built once by the binary
//! - [`output`] - JSON output envelope types

pub mod config;
pub mod context;
pub mod credentials;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod output;
pub mod validation;

pub use config::{resolve_connection, ConnectionConfig, SherlockConfig};
pub use context::AppContext;
pub use credentials::{
    CredentialProvider, CredentialReference, CredentialResolver, KeychainProvider, SecretStore,
};
pub use daemon::{Daemon, DaemonClient, DaemonPaths, DaemonSettings, DaemonState};
pub use engine::{
    ColumnInfo, EngineKind, LiveHandle, QueryResult, ResolvedConnectionConfig, SchemaInfo,
    TableDescription,
};
pub use error::{Result, SherlockError};
pub use output::{ErrorEnvelope, ErrorInfo, ExecutedVia, Metadata, SuccessEnvelope};
pub use validation::{validate_cache_command, validate_query, ValidationResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        assert!(validate_query("SELECT 1").valid);
        assert!(!validate_cache_command("FLUSHALL", &[] as &[&str]).valid);
        assert_eq!(EngineKind::SQLite.as_str(), "sqlite");
        assert_eq!(CredentialResolver::new().provider_names(), vec!["env", "literal"]);
    }
}
