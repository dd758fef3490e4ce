//! OS keychain provider
//!
//! Secrets are fetched through a [`SecretStore`]; [`KeyringStore`] is the
//! platform store via the `keyring` crate.
//!
//! Lookups are cached per `(service, account)`, including misses, so one
//! process triggers at most one OS authorization prompt per entry until the
//! cache is cleared (the daemon clears it on `reload`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::{CredentialProvider, CredentialReference};
use crate::error::{Result, SherlockError};

/// Backend holding secrets keyed by `(service, account)`
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when no entry exists
    fn get(&self, service: &str, account: &str) -> Result<Option<String>>;

    /// Create or overwrite an entry
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()>;

    /// Returns whether an entry was removed
    fn delete(&self, service: &str, account: &str) -> Result<bool>;
}

/// Reject identifiers outside `[A-Za-z0-9_.-]+`
pub fn validate_identifier(field: &'static str, value: &str) -> Result<()> {
    let safe = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if safe {
        Ok(())
    } else {
        Err(SherlockError::unsafe_identifier(field, value))
    }
}

type CacheKey = (String, String);

/// Resolves `{"$keychain": ...}` references
#[derive(Clone)]
pub struct KeychainProvider {
    store: Arc<dyn SecretStore>,
    cache: Arc<Mutex<HashMap<CacheKey, Option<String>>>>,
}

impl std::fmt::Debug for KeychainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainProvider").finish_non_exhaustive()
    }
}

impl KeychainProvider {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store, cache: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Provider backed by the platform keychain, if this platform has one
    #[must_use]
    pub fn system() -> Option<Self> {
        KeyringStore::is_supported().then(|| Self::new(Arc::new(KeyringStore)))
    }

    /// Forget every cached lookup; the next `get` asks the store again
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Cached lookup; the store is consulted at most once per entry
    pub fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        validate_identifier("service", service)?;
        validate_identifier("account", account)?;

        let key = (service.to_string(), account.to_string());
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }

        debug!(service, account, "keychain lookup");
        let value = self.store.get(service, account)?;
        cache.insert(key, value.clone());
        Ok(value)
    }

    /// Store a secret and refresh the cache entry
    pub fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        validate_identifier("service", service)?;
        validate_identifier("account", account)?;

        self.store.set(service, account, secret)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), Some(secret.to_string()));
        Ok(())
    }

    /// Remove a secret; the cache records the entry as absent
    pub fn delete(&self, service: &str, account: &str) -> Result<bool> {
        validate_identifier("service", service)?;
        validate_identifier("account", account)?;

        let removed = self.store.delete(service, account)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), None);
        Ok(removed)
    }

    pub fn has(&self, service: &str, account: &str) -> Result<bool> {
        Ok(self.get(service, account)?.is_some())
    }
}

impl CredentialProvider for KeychainProvider {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn can_resolve(&self, reference: &CredentialReference) -> bool {
        matches!(reference, CredentialReference::Keychain { .. })
    }

    fn invalidate(&self) {
        debug!("clearing keychain cache");
        self.clear_cache();
    }

    fn resolve(&self, reference: &CredentialReference) -> Result<String> {
        let CredentialReference::Keychain { target } = reference else {
            return Err(SherlockError::invalid_input(
                "keychain provider only resolves $keychain references",
            ));
        };

        let (service, account) = (target.service(), target.account());
        if account.is_empty() {
            return Err(SherlockError::invalid_input(
                "Keychain reference must specify an account name",
            ));
        }

        self.get(service, account)?.ok_or_else(|| {
            SherlockError::credential_unresolved(format!(
                "No password found in keychain for service=\"{service}\" account=\"{account}\". \
                 Use 'sherlock keychain set {account}' to store one."
            ))
        })
    }
}

/// The OS credential store: macOS Keychain, Windows Credential Manager, or
/// the Secret Service on Linux and the BSDs
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    #[must_use]
    pub const fn is_supported() -> bool {
        cfg!(any(
            target_os = "macos",
            target_os = "windows",
            target_os = "linux",
            target_os = "freebsd",
            target_os = "openbsd"
        ))
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, account).map_err(store_error)
    }
}

/// Refusals by the store (locked keychain, denied prompt) are fatal
fn store_error(err: keyring::Error) -> SherlockError {
    match err {
        keyring::Error::NoStorageAccess(e) => SherlockError::credential_store_denied(e.to_string()),
        other => SherlockError::credential_store(other.to_string()),
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        Self::entry(service, account)?.set_password(secret).map_err(store_error)
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(store_error(e)),
        }
    }
}

/// In-process store for tests and embedders without an OS keychain
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<CacheKey, String>>,
    lookups: std::sync::atomic::AtomicUsize,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for fixtures
    #[must_use]
    pub fn with_entry(self, service: &str, account: &str, secret: &str) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), secret.to_string());
        self
    }

    /// Number of `get` calls that reached this store
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&(service.to_string(), account.to_string())).cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(&(service.to_string(), account.to_string())).is_some())
    }
}
