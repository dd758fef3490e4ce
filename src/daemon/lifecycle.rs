//! Daemon Lifecycle
//!
//! Single-instance guard and the liveness check clients use before calling.
//!
//! The advisory lock on the pid file is the source of truth: a daemon is
//! "running" while some process holds that lock and the socket exists. Files
//! nobody holds a lock for are left over from a dead daemon and are removed,
//! whatever pid they record.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{debug, info};

use super::DaemonPaths;
use crate::error::{Result, SherlockError};

/// Exclusive advisory lock on the pid file, held for the daemon's lifetime
///
/// Dropping the guard removes the file and releases the lock.
#[derive(Debug)]
pub struct PidFileGuard {
    file: File,
    path: PathBuf,
}

impl PidFileGuard {
    /// Lock `path` and record the current pid in it
    ///
    /// Fails with `AlreadyRunning` when another process holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if ret != 0 {
                let pid = read_pid(path).map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
                return Err(SherlockError::already_running(format!(
                    "pid {pid}. Use `sherlock daemon stop` first."
                )));
            }
        }

        // Only truncate once the lock is ours
        file.set_len(0)?;
        file.rewind()?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        set_owner_only(path)?;

        debug!(path = %path.display(), "pid file locked");
        Ok(Self { file, path: path.to_path_buf() })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = self.file.flush();
    }
}

/// Removes the socket file on drop
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Bind the daemon socket, replacing any stale file, and restrict it to the owner
pub fn bind_socket(path: &Path) -> Result<(UnixListener, SocketGuard)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    let guard = SocketGuard { path: path.to_path_buf() };
    set_owner_only(path)?;
    Ok((listener, guard))
}

fn set_owner_only(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Pid recorded in the pid file, if readable
#[must_use]
pub fn daemon_pid(paths: &DaemonPaths) -> Option<u32> {
    read_pid(&paths.pid_file)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether some process holds the lock on `pid_file`
///
/// Tries a shared non-blocking lock, released before returning.
#[must_use]
pub fn lock_held(pid_file: &Path) -> bool {
    let Ok(file) = File::open(pid_file) else {
        return false;
    };

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
        if ret == 0 {
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            return false;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EWOULDBLOCK)
    }

    #[cfg(not(unix))]
    {
        drop(file);
        false
    }
}

/// Liveness check; removes files no daemon holds
#[must_use]
pub fn is_daemon_running(paths: &DaemonPaths) -> bool {
    if lock_held(&paths.pid_file) {
        // a starting daemon holds the lock before it binds the socket
        return paths.socket.exists();
    }
    if paths.socket.exists() || paths.pid_file.exists() {
        remove_stale_files(paths);
    }
    false
}

fn remove_stale_files(paths: &DaemonPaths) {
    info!(socket = %paths.socket.display(), "removing stale daemon files");
    let _ = fs::remove_file(&paths.socket);
    let _ = fs::remove_file(&paths.pid_file);
}
