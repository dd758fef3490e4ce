//! Configuration Management
//!
//! This module loads the connection configuration file and turns a named
//! connection into a [`ResolvedConnectionConfig`].
//!
//! # Configuration Locations
//! Discovery stops at the first hit:
//! 1. `--config <path>` (must exist)
//! 2. `SHERLOCK_CONFIG` (must exist)
//! 3. `./.sherlock.json` (project-local)
//! 4. `<config_dir>/config.json` (per-user)
//!
//! `<config_dir>` is `$XDG_CONFIG_HOME/sherlock`, falling back to
//! `~/.config/sherlock`. A `.env` file in it is loaded into the process
//! environment before any credential is resolved; variables that are already
//! set win.
//!
//! # Resolution
//! A `url` reference takes precedence and the engine is detected from its
//! scheme. Otherwise `SQLite` uses `filename`/`path`/`database`, and network
//! engines build a URL from `host`/`username`/`password`/`database`, falling
//! back to `SHERLOCK_<CONNECTION>_<FIELD>` variables for missing fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::credentials::{connection_env_var, lookup_connection_env, CredentialReference, CredentialResolver};
use crate::engine::{EngineKind, ResolvedConnectionConfig};
use crate::error::{Result, SherlockError};

pub const APP_NAME: &str = "sherlock";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SHERLOCK_CONFIG";

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".sherlock.json";

/// Per-user config file name inside the config dir
pub const USER_CONFIG_FILE: &str = "config.json";

/// Connection used when a command names none
pub const DEFAULT_CONNECTION: &str = "default";

/// Root of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SherlockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Named connections
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

/// One named connection as written in the config file
///
/// Either `url`, or the individual fields. `url`, `host`, `username` and
/// `password` accept credential references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine; detected from `url` when present
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EngineKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<CredentialReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<CredentialReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<CredentialReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<CredentialReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// `SQLite` file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Alias for `filename`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Log every executed statement for this connection at `info`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
}

impl SherlockConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            SherlockError::config_error(format!(
                "Could not read config file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SherlockError::config_error(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| SherlockError::config_error(format!("Invalid config format: {e}")))
    }

    /// Look up a connection by name
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections.get(name).ok_or_else(|| {
            SherlockError::config_error(format!(
                "Connection \"{name}\" not found in config. Available connections: {}",
                self.connection_names().join(", ")
            ))
        })
    }

    /// Connection names, sorted
    #[must_use]
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Whether statements on `name` should be logged
    #[must_use]
    pub fn query_logging(&self, name: &str) -> bool {
        self.connections.get(name).and_then(|c| c.logging).unwrap_or(false)
    }
}

/// Per-user configuration directory
///
/// `$XDG_CONFIG_HOME/sherlock`, else `~/.config/sherlock`. On Windows the
/// platform config dir is used.
pub fn config_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or_else(|| SherlockError::config_error("Could not determine user config directory"))
    }

    #[cfg(not(windows))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(xdg).join(APP_NAME));
        }
        dirs::home_dir()
            .map(|home| home.join(".config").join(APP_NAME))
            .ok_or_else(|| SherlockError::config_error("Could not determine home directory"))
    }
}

/// Create `dir` (owner-only on Unix) if missing
pub fn ensure_config_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| {
        SherlockError::config_error(format!(
            "Could not create config directory {}: {e}",
            dir.display()
        ))
    })
}

/// Config file search inputs
#[derive(Debug, Clone)]
pub struct ConfigSearch {
    /// `--config` flag
    pub explicit: Option<PathBuf>,
    /// `SHERLOCK_CONFIG` value
    pub from_env: Option<PathBuf>,
    /// Directory searched for the project-local file; relative paths resolve here
    pub cwd: PathBuf,
    pub config_dir: PathBuf,
}

impl ConfigSearch {
    /// Search inputs taken from the process environment
    pub fn from_process(explicit: Option<PathBuf>, config_dir: PathBuf) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| {
            SherlockError::config_error(format!("Could not determine current directory: {e}"))
        })?;
        let from_env = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()).map(PathBuf::from);
        Ok(Self { explicit, from_env, cwd, config_dir })
    }

    /// First existing config file in discovery order
    pub fn find(&self) -> Result<PathBuf> {
        if let Some(explicit) = &self.explicit {
            let path = self.cwd.join(explicit);
            if path.is_file() {
                return Ok(path);
            }
            return Err(SherlockError::config_error(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        if let Some(from_env) = &self.from_env {
            let path = self.cwd.join(from_env);
            if path.is_file() {
                return Ok(path);
            }
            return Err(SherlockError::config_error(format!(
                "Config file not found: {} (from {CONFIG_ENV_VAR} env var)",
                path.display()
            )));
        }

        let local = self.cwd.join(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Ok(local);
        }

        let user = self.config_dir.join(USER_CONFIG_FILE);
        if user.is_file() {
            return Ok(user);
        }

        Err(SherlockError::config_error(format!(
            "No configuration file found. Create one at {} (project-local) or {} (user config), \
             or set {CONFIG_ENV_VAR} to your config file path.",
            local.display(),
            user.display()
        )))
    }
}

/// Parse `.env` content into `(key, value)` pairs
///
/// Blank lines, `#` comments and lines without `=` are skipped. One pair of
/// matching surrounding quotes is removed from the value.
#[must_use]
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Load `<dir>/.env` into the environment; returns how many variables were set
pub fn load_env_file(dir: &Path) -> Result<usize> {
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(0);
    }

    let contents = fs::read_to_string(&path)?;
    let mut applied = 0;
    for (key, value) in parse_env_file(&contents) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    debug!(path = %path.display(), applied, "loaded env file");
    Ok(applied)
}

/// Resolve one named connection into a connectable URL
pub fn resolve_connection(
    config: &SherlockConfig,
    name: &str,
    resolver: &CredentialResolver,
) -> Result<ResolvedConnectionConfig> {
    let conn = config.get_connection(name)?;

    if let Some(url_ref) = &conn.url {
        let url = resolver.resolve(url_ref)?;
        if url.is_empty() {
            return Err(SherlockError::config_error(format!(
                "Connection URL for \"{name}\" resolved to an empty value"
            )));
        }
        let kind = EngineKind::from_url(&url).or(conn.kind).unwrap_or(EngineKind::Postgres);
        return Ok(ResolvedConnectionConfig::new(kind, url));
    }

    match conn.kind.unwrap_or(EngineKind::Postgres) {
        EngineKind::SQLite => {
            let file = conn
                .filename
                .as_deref()
                .or(conn.path.as_deref())
                .or(conn.database.as_deref())
                .unwrap_or(":memory:");
            Ok(ResolvedConnectionConfig::new(EngineKind::SQLite, file))
        }
        kind => build_network_url(name, conn, kind, resolver),
    }
}

/// Resolve every configured connection independently
///
/// One failing connection never hides the others.
pub fn resolve_all(
    config: &SherlockConfig,
    resolver: &CredentialResolver,
) -> BTreeMap<String, Result<ResolvedConnectionConfig>> {
    config
        .connections
        .keys()
        .map(|name| (name.clone(), resolve_connection(config, name, resolver)))
        .collect()
}

fn build_network_url(
    name: &str,
    conn: &ConnectionConfig,
    kind: EngineKind,
    resolver: &CredentialResolver,
) -> Result<ResolvedConnectionConfig> {
    if conn.password.as_ref().is_some_and(CredentialReference::is_literal) {
        warn!(
            connection = name,
            "Password for connection \"{name}\" is stored as plaintext. Consider using {{\"$env\": \"{}\"}}",
            connection_env_var(name, "PASSWORD")
        );
    }

    let host = resolver
        .resolve_value(conn.host.as_ref())?
        .filter(|v| !v.is_empty())
        .or_else(|| lookup_connection_env(name, "HOST"));
    let username = resolver
        .resolve_value(conn.username.as_ref())?
        .filter(|v| !v.is_empty())
        .or_else(|| lookup_connection_env(name, "USERNAME"))
        .or_else(|| lookup_connection_env(name, "USER"));
    let password = resolver
        .resolve_value(conn.password.as_ref())?
        .filter(|v| !v.is_empty())
        .or_else(|| lookup_connection_env(name, "PASSWORD"));
    let database = conn
        .database
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| lookup_connection_env(name, "DATABASE"));

    // Redis only needs a host; everything else is optional
    let mut required = vec![("host", host.is_some())];
    if kind != EngineKind::Redis {
        required.extend([
            ("username", username.is_some()),
            ("password", password.is_some()),
            ("database", database.is_some()),
        ]);
    }
    let missing: Vec<&str> =
        required.into_iter().filter(|(_, present)| !present).map(|(field, _)| field).collect();
    if !missing.is_empty() {
        let vars: Vec<String> = missing.iter().map(|field| connection_env_var(name, field)).collect();
        return Err(SherlockError::config_error(format!(
            "Missing required connection parameters for \"{name}\": {}. \
             Provide them in the config file or set: {}",
            missing.join(", "),
            vars.join(", ")
        )));
    }

    let host = host.unwrap_or_default();
    let port = conn.port.or_else(|| kind.default_port()).unwrap_or_default();

    let url = match kind {
        EngineKind::Redis => {
            let auth = match (&username, &password) {
                (Some(user), Some(pass)) => {
                    format!("{}:{}@", urlencoding::encode(user), urlencoding::encode(pass))
                }
                (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
                _ => String::new(),
            };
            let db = database.map(|db| format!("/{db}")).unwrap_or_default();
            format!("redis://{auth}{host}:{port}{db}")
        }
        _ => format!(
            "{}://{}:{}@{host}:{port}/{}",
            kind.as_str(),
            urlencoding::encode(&username.unwrap_or_default()),
            urlencoding::encode(&password.unwrap_or_default()),
            database.unwrap_or_default()
        ),
    };

    debug!(connection = name, kind = %kind, "built connection url");
    Ok(ResolvedConnectionConfig::new(kind, url))
}
