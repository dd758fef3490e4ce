//! Process Context
//!
//! Everything a command needs, built once in `main` and passed down:
//! the config directory, the credential resolver (with the platform keychain
//! when there is one) and the daemon file locations.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::{self, ConfigSearch, SherlockConfig};
use crate::credentials::{CredentialResolver, KeychainProvider};
use crate::daemon::{is_daemon_running, DaemonClient, DaemonPaths, DaemonSettings};
use crate::engine::ResolvedConnectionConfig;
use crate::error::{Result, SherlockError};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config_dir: PathBuf,
    pub paths: DaemonPaths,
    pub resolver: Arc<CredentialResolver>,
    keychain: Option<KeychainProvider>,
    config_override: Option<PathBuf>,
}

impl AppContext {
    /// Context for this process
    ///
    /// Creates the config directory and loads its `.env` file. Loading sets
    /// environment variables, so call this before any other thread starts.
    pub fn from_process(config_override: Option<PathBuf>) -> Result<Self> {
        let config_dir = config::config_dir()?;
        config::ensure_config_dir(&config_dir)?;
        config::load_env_file(&config_dir)?;
        Ok(Self::new(config_dir, config_override, KeychainProvider::system()))
    }

    /// Context over explicit parts
    #[must_use]
    pub fn new(
        config_dir: PathBuf,
        config_override: Option<PathBuf>,
        keychain: Option<KeychainProvider>,
    ) -> Self {
        let resolver = Arc::new(CredentialResolver::with_keychain(keychain.clone()));
        debug!(providers = ?resolver.provider_names(), "credential resolver ready");
        Self {
            paths: DaemonPaths::in_dir(&config_dir),
            config_dir,
            resolver,
            keychain,
            config_override,
        }
    }

    /// Locate the config file
    pub fn config_path(&self) -> Result<PathBuf> {
        ConfigSearch::from_process(self.config_override.clone(), self.config_dir.clone())?.find()
    }

    /// Locate and parse the config file
    pub fn load_config(&self) -> Result<(PathBuf, SherlockConfig)> {
        let path = self.config_path()?;
        let config = SherlockConfig::load(&path)?;
        debug!(path = %path.display(), connections = config.connections.len(), "config loaded");
        Ok((path, config))
    }

    /// Resolve `name` from a freshly loaded config
    pub fn resolve(&self, name: &str) -> Result<ResolvedConnectionConfig> {
        let (_, config) = self.load_config()?;
        config::resolve_connection(&config, name, &self.resolver)
    }

    pub fn keychain(&self) -> Result<&KeychainProvider> {
        self.keychain.as_ref().ok_or_else(|| {
            SherlockError::credential_store("No keychain backend is available on this platform")
        })
    }

    #[must_use]
    pub fn daemon_settings(&self) -> DaemonSettings {
        DaemonSettings::new(self.paths.clone())
    }

    #[must_use]
    pub fn daemon_client(&self) -> DaemonClient {
        DaemonClient::new(&self.paths.socket)
    }

    #[must_use]
    pub fn daemon_running(&self) -> bool {
        is_daemon_running(&self.paths)
    }
}
