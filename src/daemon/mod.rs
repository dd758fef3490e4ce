//! Connection-Caching Daemon
//!
//! A resident process that resolves every configured credential once and keeps
//! one live handle per connection name. Short-lived CLI invocations talk to it
//! over a Unix socket using newline-delimited JSON frames.
//!
//! # Module Organization
//! - [`protocol`] - Request/response frames and command names
//! - [`lifecycle`] - Pid file lock, socket binding, liveness check
//! - [`server`] - The [`Daemon`] itself
//! - [`client`] - [`DaemonClient`], one socket connection per call

use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod client;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use lifecycle::{daemon_pid, is_daemon_running, PidFileGuard};
pub use protocol::{DaemonCommand, DaemonRequest, DaemonResponse};
pub use server::{Daemon, DaemonState};

pub const SOCKET_FILE: &str = "sherlock.sock";
pub const PID_FILE: &str = "sherlock.pid";

/// Client wait and server-side per-request budget
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;

/// Socket and pid file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub socket: PathBuf,
    pub pid_file: PathBuf,
}

impl DaemonPaths {
    /// Standard file names inside `dir`
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self { socket: dir.join(SOCKET_FILE), pid_file: dir.join(PID_FILE) }
    }
}

/// Daemon tuning
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub paths: DaemonPaths,

    /// Longest a single request may run before it is answered with an error
    pub request_timeout: Duration,

    /// Requests handled at once across all client connections
    pub max_concurrent_requests: usize,
}

impl DaemonSettings {
    #[must_use]
    pub fn new(paths: DaemonPaths) -> Self {
        Self {
            paths,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(DaemonPaths::in_dir(dir))
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Zero is treated as one
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_in_dir() {
        let paths = DaemonPaths::in_dir(Path::new("/tmp/sherlock"));
        assert_eq!(paths.socket, PathBuf::from("/tmp/sherlock/sherlock.sock"));
        assert_eq!(paths.pid_file, PathBuf::from("/tmp/sherlock/sherlock.pid"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = DaemonSettings::in_dir(Path::new("/tmp/sherlock"));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_concurrent_requests, 64);
        assert_eq!(settings.with_max_concurrent_requests(0).max_concurrent_requests, 1);
    }
}
