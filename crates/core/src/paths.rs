// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime directory and file-path resolution

use crate::id::RunId;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Mode of the per-user runtime directory.
const RUNTIME_DIR_MODE: u32 = 0o700;

/// Locations of everything the daemon owns on disk.
///
/// All paths live inside the per-user runtime directory:
/// `$GOB_RUNTIME_DIR` (test isolation) when set, else
/// `$XDG_RUNTIME_DIR/gob`, else `/tmp/gob-{uid}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    /// Resolve the runtime directory from the environment.
    pub fn resolve() -> Self {
        if let Ok(dir) = std::env::var("GOB_RUNTIME_DIR") {
            return Self { root: PathBuf::from(dir) };
        }

        if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
            return Self {
                root: PathBuf::from(xdg).join("gob"),
            };
        }

        let uid = nix::unistd::Uid::current();
        Self {
            root: PathBuf::from(format!("/tmp/gob-{uid}")),
        }
    }

    /// Use an explicit directory (tests, embedded use).
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { root: dir.into() }
    }

    /// Create the runtime directory with mode 0700 if absent.
    pub fn ensure(&self) -> io::Result<()> {
        if !self.root.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(RUNTIME_DIR_MODE)
                .create(&self.root)?;
        }
        // Recursive creation applies the mode only to the leaf; make sure
        // an inherited directory is tightened too.
        let perms = std::fs::Permissions::from_mode(RUNTIME_DIR_MODE);
        std::fs::set_permissions(&self.root, perms)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unix-domain stream socket, mode 0600.
    pub fn socket_path(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    /// ASCII decimal pid, newline-terminated.
    pub fn pid_path(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    /// The daemon's own stdout/stderr redirection.
    pub fn log_path(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    /// Child stdout for one run: `{run_id}.stdout.log`.
    pub fn run_stdout_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{run_id}.stdout.log"))
    }

    /// Child stderr for one run: `{run_id}.stderr.log`.
    pub fn run_stderr_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{run_id}.stderr.log"))
    }
}

/// Persistent state directory for external collaborators (telemetry, db).
///
/// `$GOB_STATE_DIR`, else `$XDG_STATE_HOME/gob`, else `~/.local/state/gob`.
/// The core itself only touches the runtime directory.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("GOB_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("gob"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local/state/gob"))
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
