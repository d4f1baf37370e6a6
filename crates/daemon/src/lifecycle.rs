// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, single instance.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use gob_core::{RuntimePaths, SystemClock};
use gob_engine::JobManager;

/// Manager with the concrete clock used by the daemon.
pub(crate) type DaemonManager = JobManager<SystemClock>;

/// Mode of the listening socket.
const SOCKET_MODE: u32 = 0o600;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime directory paths (socket, pid file, logs).
    pub paths: RuntimePaths,
}

impl Config {
    /// Load configuration for the user-level daemon from the environment.
    pub fn load() -> Self {
        Self {
            paths: RuntimePaths::resolve(),
        }
    }
}

/// Live daemon resources.
///
/// Holding `lock_file` keeps the exclusive pid-file lock for the life of
/// the process; it is released by the kernel on exit, so a crashed
/// daemon never wedges the next startup.
#[derive(Debug)]
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive file lock
    #[allow(dead_code)]
    lock_file: File,
}

/// Result of daemon startup: state plus the bound listener to spawn.
#[derive(Debug)]
pub struct StartupResult {
    pub state: DaemonState,
    pub listener: UnixListener,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Acquire the runtime directory, pid lock and socket.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create the runtime directory (0700).
    config.paths.ensure()?;

    // 2. Acquire the pid-file lock FIRST - prevents startup races.
    // Open without truncating so a losing racer doesn't wipe the
    // winner's pid.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.paths.pid_path())?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write our pid now that we hold the lock.
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    lock_file.flush()?;

    // 3. Remove a stale socket left by a crashed daemon, then bind.
    let socket_path = config.paths.socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| LifecycleError::BindFailed(socket_path.clone(), e))?;
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!(socket = %socket_path.display(), "daemon started");

    Ok(StartupResult {
        state: DaemonState {
            config: config.clone(),
            lock_file,
        },
        listener,
    })
}

impl DaemonState {
    /// Graceful shutdown: stop accepting and remove the socket and pid
    /// files. Children are deliberately left alive; a fresh daemon
    /// starts with a clean slate and running children continue as
    /// orphans.
    pub fn shutdown(&mut self) {
        info!("shutting down daemon...");

        let socket_path = self.config.paths.socket_path();
        if socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&socket_path) {
                warn!("failed to remove socket file: {}", e);
            }
        }

        let pid_path = self.config.paths.pid_path();
        if pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&pid_path) {
                warn!("failed to remove pid file: {}", e);
            }
        }

        // The pid-file lock is released when self.lock_file drops.
        info!("daemon shutdown complete");
    }
}

/// Pid recorded in the pid file, if readable (for "already running"
/// diagnostics).
pub fn read_locked_pid(config: &Config) -> Option<u32> {
    std::fs::read_to_string(config.paths.pid_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Clean up resources on startup failure.
fn cleanup_on_failure(config: &Config) {
    let socket_path = config.paths.socket_path();
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    let pid_path = config.paths.pid_path();
    if pid_path.exists() {
        let _ = std::fs::remove_file(&pid_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
