//! Environment variable provider

use super::{CredentialProvider, CredentialReference};
use crate::error::{Result, SherlockError};

/// Resolves `{"$env": "VAR"}` from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProvider;

impl CredentialProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "env"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_resolve(&self, reference: &CredentialReference) -> bool {
        matches!(reference, CredentialReference::Env { .. })
    }

    fn resolve(&self, reference: &CredentialReference) -> Result<String> {
        let CredentialReference::Env { var } = reference else {
            return Err(SherlockError::invalid_input("env provider only resolves $env references"));
        };

        std::env::var(var).map_err(|_| {
            SherlockError::credential_unresolved(format!("Environment variable not set: {var}"))
        })
    }
}

/// Conventional variable name for a connection field: `SHERLOCK_<CONNECTION>_<FIELD>`
///
/// Hyphens in the connection name become underscores.
#[must_use]
pub fn connection_env_var(connection: &str, field: &str) -> String {
    format!(
        "SHERLOCK_{}_{}",
        connection.to_uppercase().replace('-', "_"),
        field.to_uppercase()
    )
}

/// Read the conventional variable for a connection field, if set
#[must_use]
pub fn lookup_connection_env(connection: &str, field: &str) -> Option<String> {
    std::env::var(connection_env_var(connection, field)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_env_var() {
        assert_eq!(connection_env_var("prod-db", "password"), "SHERLOCK_PROD_DB_PASSWORD");
        assert_eq!(connection_env_var("default", "HOST"), "SHERLOCK_DEFAULT_HOST");
    }

    #[test]
    fn test_resolve_set_variable() {
        std::env::set_var("SHERLOCK_TEST_ENV_PROVIDER_SET", "s3cret");
        let value = EnvProvider
            .resolve(&CredentialReference::env("SHERLOCK_TEST_ENV_PROVIDER_SET"))
            .unwrap();
        assert_eq!(value, "s3cret");
    }

    #[test]
    fn test_resolve_missing_variable() {
        let err = EnvProvider
            .resolve(&CredentialReference::env("SHERLOCK_TEST_ENV_PROVIDER_MISSING"))
            .unwrap_err();
        assert_eq!(err.message(), "Environment variable not set: SHERLOCK_TEST_ENV_PROVIDER_MISSING");
    }

    #[test]
    fn test_claims_only_env() {
        assert!(EnvProvider.can_resolve(&CredentialReference::env("X")));
        assert!(!EnvProvider.can_resolve(&CredentialReference::literal("X")));
        assert!(!EnvProvider.can_resolve(&CredentialReference::keychain("X")));
    }
}
