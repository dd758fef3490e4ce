//! Persisted credential-reference syntax
//!
//! ```json
//! { "password": { "$env": "PG_PASSWORD" } }
//! { "password": { "$keychain": "prod-db" } }
//! { "password": { "$keychain": { "service": "corp", "account": "prod-db" } } }
//! { "password": "hunter2" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service name used when a keychain reference names only an account
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "sherlock";

/// Describes how to obtain a secret, never the secret itself (except `Literal`)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialReference {
    /// `{"$env": "VAR"}`
    Env {
        #[serde(rename = "$env")]
        var: String,
    },

    /// `{"$keychain": "account"}` or `{"$keychain": {"service": "...", "account": "..."}}`
    Keychain {
        #[serde(rename = "$keychain")]
        target: KeychainTarget,
    },

    /// Bare string, used verbatim
    Literal(String),
}

/// Account-only or explicit `(service, account)` keychain target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeychainTarget {
    Account(String),
    Entry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
        account: String,
    },
}

impl KeychainTarget {
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Account(_) | Self::Entry { service: None, .. } => DEFAULT_KEYCHAIN_SERVICE,
            Self::Entry { service: Some(service), .. } => service,
        }
    }

    #[must_use]
    pub fn account(&self) -> &str {
        match self {
            Self::Account(account) | Self::Entry { account, .. } => account,
        }
    }
}

impl CredentialReference {
    pub fn env(var: impl Into<String>) -> Self {
        Self::Env { var: var.into() }
    }

    pub fn keychain(account: impl Into<String>) -> Self {
        Self::Keychain { target: KeychainTarget::Account(account.into()) }
    }

    pub fn keychain_entry(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self::Keychain {
            target: KeychainTarget::Entry { service: Some(service.into()), account: account.into() },
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

/// Renders the reference with literal values masked
impl fmt::Display for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env { var } => write!(f, "{{\"$env\":{var:?}}}"),
            Self::Keychain { target: KeychainTarget::Account(account) } => {
                write!(f, "{{\"$keychain\":{account:?}}}")
            }
            Self::Keychain { target: KeychainTarget::Entry { service, account } } => match service {
                Some(service) => write!(
                    f,
                    "{{\"$keychain\":{{\"service\":{service:?},\"account\":{account:?}}}}}"
                ),
                None => write!(f, "{{\"$keychain\":{{\"account\":{account:?}}}}}"),
            },
            Self::Literal(_) => f.write_str("\"<literal>\""),
        }
    }
}

impl fmt::Debug for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialReference({self})")
    }
}
