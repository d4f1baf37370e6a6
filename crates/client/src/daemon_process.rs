// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process management utilities.
//!
//! Functions for locating, starting and probing the gobd daemon process.

use crate::client::ClientError;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use gob_core::RuntimePaths;

/// Start the daemon in the background, returning the child handle.
///
/// The child runs in its own process group with closed stdio; it
/// redirects its own output to `daemon.log` once up.
pub fn start_daemon_background() -> Result<std::process::Child, ClientError> {
    let gobd_path = find_gobd_binary();

    Command::new(&gobd_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(format!("{}: {e}", gobd_path.display())))
}

/// Find the gobd binary.
///
/// `GOB_DAEMON_BINARY` wins (tests point it at a build artifact), then a
/// sibling of the current executable, then `gobd` on PATH.
fn find_gobd_binary() -> PathBuf {
    if let Ok(path) = std::env::var("GOB_DAEMON_BINARY") {
        return PathBuf::from(path);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("gobd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("gobd")
}

/// Get the pid from the daemon pid file, if one is readable.
pub fn read_daemon_pid(paths: &RuntimePaths) -> Option<u32> {
    std::fs::read_to_string(paths.pid_path())
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok())
}

/// Check whether a process with the given pid exists.
pub fn process_exists(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Probe whether a Unix socket is accepting connections.
pub fn probe_socket(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// Remove stale socket and pid files when the daemon is not running.
///
/// Called when a connection attempt failed. If the pid file names a
/// dead process (or is unreadable, or absent), the leftovers are
/// removed so a fresh daemon can bind.
pub fn cleanup_stale_socket(paths: &RuntimePaths) {
    let socket_path = paths.socket_path();
    let pid_path = paths.pid_path();

    if pid_path.exists() {
        match read_daemon_pid(paths) {
            Some(pid) if process_exists(pid) => {} // live daemon, leave its files
            _ => {
                let _ = std::fs::remove_file(&socket_path);
                let _ = std::fs::remove_file(&pid_path);
            }
        }
    } else if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
}

/// Startup marker prefix the daemon writes to its log before anything else.
const STARTUP_MARKER_PREFIX: &str = "--- gobd: starting (pid: ";

/// Failure line the daemon writes synchronously when startup fails.
const STARTUP_FAILURE_NEEDLE: &str = "Failed to start daemon: ";

/// Read the failure from the daemon log's most recent startup attempt.
pub fn read_startup_error(paths: &RuntimePaths) -> Option<String> {
    let content = std::fs::read_to_string(paths.log_path()).ok()?;
    parse_startup_error(&content)
}

/// Extract the failure message of the latest startup attempt.
///
/// The log accumulates across attempts: each one opens with a marker
/// line and, on failure, ends with one synchronous
/// `ERROR Failed to start daemon: ...` line. A single forward scan
/// keeps only the failure belonging to the last marker seen, so stale
/// errors from earlier attempts never leak into the result.
fn parse_startup_error(content: &str) -> Option<String> {
    let mut in_attempt = false;
    let mut failure = None;

    for line in content.lines() {
        if line.starts_with(STARTUP_MARKER_PREFIX) {
            in_attempt = true;
            failure = None; // a newer attempt supersedes older failures
        } else if in_attempt {
            if let Some(at) = line.find(STARTUP_FAILURE_NEEDLE) {
                let message = line[at + STARTUP_FAILURE_NEEDLE.len()..].trim();
                if !message.is_empty() {
                    failure = Some(message.to_string());
                }
            }
        }
    }

    failure
}

/// Attach startup-log context to a connection failure, when available.
pub fn wrap_with_startup_error(paths: &RuntimePaths, err: ClientError) -> ClientError {
    if matches!(err, ClientError::DaemonStartFailed(_)) {
        return err;
    }

    match read_startup_error(paths) {
        Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
        None => err,
    }
}

#[cfg(test)]
#[path = "daemon_process_tests.rs"]
mod tests;
