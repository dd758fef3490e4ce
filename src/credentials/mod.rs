//! Credential Resolution
//!
//! A [`CredentialReference`] says *how* to obtain a secret. The
//! [`CredentialResolver`] walks its providers in descending priority and hands
//! the reference to the first one that claims it.
//!
//! | Provider | Claims | Priority |
//! |----------|--------|----------|
//! | [`EnvProvider`] | `{"$env": ...}` | 100 |
//! | [`KeychainProvider`] | `{"$keychain": ...}` | 80 |
//! | [`LiteralProvider`] | bare string | 0 |
//!
//! Providers with equal priority are tried in registration order.

pub mod env;
pub mod keychain;
pub mod literal;
pub mod reference;

pub use env::{connection_env_var, lookup_connection_env, EnvProvider};
pub use keychain::{
    validate_identifier, KeychainProvider, KeyringStore, MemorySecretStore, SecretStore,
};
pub use literal::LiteralProvider;
pub use reference::{CredentialReference, KeychainTarget, DEFAULT_KEYCHAIN_SERVICE};

use tracing::debug;

use crate::error::{Result, SherlockError};

/// Strategy for resolving one class of credential reference
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher values are consulted first
    fn priority(&self) -> i32;

    fn can_resolve(&self, reference: &CredentialReference) -> bool;

    fn resolve(&self, reference: &CredentialReference) -> Result<String>;

    /// Drop anything remembered from earlier lookups
    fn invalidate(&self) {}
}

/// Priority-ordered dispatcher over credential providers
pub struct CredentialResolver {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver").field("providers", &self.provider_names()).finish()
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Resolver with the environment and literal providers
    #[must_use]
    pub fn new() -> Self {
        let mut resolver = Self::empty();
        resolver.register(Box::new(EnvProvider));
        resolver.register(Box::new(LiteralProvider));
        resolver
    }

    /// Resolver with no providers registered
    #[must_use]
    pub const fn empty() -> Self {
        Self { providers: Vec::new() }
    }

    /// Environment and literal providers plus `keychain`, if given
    #[must_use]
    pub fn with_keychain(keychain: Option<KeychainProvider>) -> Self {
        let mut resolver = Self::new();
        if let Some(keychain) = keychain {
            resolver.register(Box::new(keychain));
        }
        resolver
    }

    /// Environment, literal and the platform keychain when one is available
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::with_keychain(KeychainProvider::system())
    }

    /// Add a provider; the list stays sorted by descending priority
    pub fn register(&mut self, provider: Box<dyn CredentialProvider>) {
        self.providers.push(provider);
        // stable: equal priorities keep registration order
        self.providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
    }

    /// Provider names in consultation order
    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve through the first provider that claims `reference`
    pub fn resolve(&self, reference: &CredentialReference) -> Result<String> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.can_resolve(reference))
            .ok_or_else(|| SherlockError::no_provider(reference.to_string()))?;

        debug!(provider = provider.name(), "resolving credential");
        provider.resolve(reference)
    }

    /// Make every provider forget cached secrets before a re-resolution
    pub fn invalidate(&self) {
        for provider in &self.providers {
            provider.invalidate();
        }
    }

    /// `None` passes through unchanged
    pub fn resolve_value(&self, reference: Option<&CredentialReference>) -> Result<Option<String>> {
        reference.map(|r| self.resolve(r)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct FixedProvider {
        name: &'static str,
        priority: i32,
        value: &'static str,
    }

    impl CredentialProvider for FixedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn can_resolve(&self, _reference: &CredentialReference) -> bool {
            true
        }

        fn resolve(&self, _reference: &CredentialReference) -> Result<String> {
            Ok(self.value.to_string())
        }
    }

    #[test]
    fn test_default_order() {
        let keychain = KeychainProvider::new(Arc::new(MemorySecretStore::new()));
        let resolver = CredentialResolver::with_keychain(Some(keychain));
        assert_eq!(resolver.provider_names(), vec!["env", "keychain", "literal"]);
    }

    #[test]
    fn test_literal_resolves_unchanged() {
        let resolver = CredentialResolver::new();
        assert_eq!(resolver.resolve(&CredentialReference::literal("abc")).unwrap(), "abc");
    }

    #[test]
    fn test_absent_passes_through() {
        let resolver = CredentialResolver::new();
        assert_eq!(resolver.resolve_value(None).unwrap(), None);
    }

    #[test]
    fn test_unclaimed_reference_names_it() {
        let resolver = CredentialResolver::new();
        let err = resolver.resolve(&CredentialReference::keychain("prod")).unwrap_err();
        assert_eq!(err.error_code(), "NO_PROVIDER");
        assert_eq!(err.message(), r#"No credential provider found for: {"$keychain":"prod"}"#);
    }

    #[test]
    fn test_empty_resolver_has_no_provider() {
        let resolver = CredentialResolver::empty();
        assert!(resolver.resolve(&CredentialReference::literal("x")).is_err());
    }

    #[test]
    fn test_highest_priority_wins_regardless_of_registration_order() {
        let mut low_first = CredentialResolver::empty();
        low_first.register(Box::new(FixedProvider { name: "low", priority: 1, value: "low" }));
        low_first.register(Box::new(FixedProvider { name: "high", priority: 9, value: "high" }));

        let mut high_first = CredentialResolver::empty();
        high_first.register(Box::new(FixedProvider { name: "high", priority: 9, value: "high" }));
        high_first.register(Box::new(FixedProvider { name: "low", priority: 1, value: "low" }));

        let reference = CredentialReference::literal("x");
        assert_eq!(low_first.resolve(&reference).unwrap(), "high");
        assert_eq!(high_first.resolve(&reference).unwrap(), "high");
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let mut resolver = CredentialResolver::empty();
        resolver.register(Box::new(FixedProvider { name: "first", priority: 5, value: "first" }));
        resolver.register(Box::new(FixedProvider { name: "second", priority: 5, value: "second" }));
        assert_eq!(resolver.resolve(&CredentialReference::literal("x")).unwrap(), "first");
        assert_eq!(resolver.provider_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_invalidate_reaches_keychain_cache() {
        let store = Arc::new(MemorySecretStore::new().with_entry("sherlock", "rotating", "v1"));
        let resolver = CredentialResolver::with_keychain(Some(KeychainProvider::new(store.clone())));
        let reference = CredentialReference::keychain("rotating");
        assert_eq!(resolver.resolve(&reference).unwrap(), "v1");

        store.set("sherlock", "rotating", "v2").unwrap();
        assert_eq!(resolver.resolve(&reference).unwrap(), "v1");

        resolver.invalidate();
        assert_eq!(resolver.resolve(&reference).unwrap(), "v2");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        std::env::set_var("SHERLOCK_TEST_RESOLVER_IDEMPOTENT", "v1");
        let resolver = CredentialResolver::new();
        let reference = CredentialReference::env("SHERLOCK_TEST_RESOLVER_IDEMPOTENT");
        let first = resolver.resolve(&reference).unwrap();
        let second = resolver.resolve(&reference).unwrap();
        assert_eq!(first, second);
    }
}
