// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gob daemon (gobd)
//!
//! Long-lived per-user process that owns every managed child, serves the
//! request/reply protocol over a Unix socket, and broadcasts lifecycle
//! events to subscribed clients.
//!
//! Architecture:
//! - Listener task: accepts connections, one handler task per client
//! - Waiter tasks: one per run, blocking on the child's exit
//! - Event pump: manager → broadcaster → subscribed connections
//! - Port scanner: periodic listening-socket diffs for running jobs

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod broadcast;
mod lifecycle;
mod listener;
mod protocol;

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info};

use gob_engine::{JobManager, PortScanner, StopPolicy, SystemExecutor};

use crate::broadcast::{spawn_event_pump, Broadcaster};
use crate::lifecycle::{Config, LifecycleError};
use crate::listener::{ListenCtx, Listener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("gobd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("gobd {}", env!("CARGO_PKG_VERSION"));
                println!("gob daemon - owns managed processes and serves the gob socket protocol");
                println!();
                println!("USAGE:");
                println!("    gobd");
                println!();
                println!("The daemon is typically auto-started by gob clients and should");
                println!("not be invoked directly. It listens on a Unix socket in the");
                println!("per-user runtime directory.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: gobd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load();

    // Rotate the daemon's own log if it has grown too large
    rotate_log_if_needed(&config.paths.log_path());

    // Write startup marker to log (before tracing setup, so clients can
    // find where this attempt begins)
    write_startup_marker(&config)?;

    let log_guard = setup_logging(&config)?;

    info!("starting gob daemon");

    let lifecycle::StartupResult {
        mut state,
        listener: unix_listener,
    } = match lifecycle::startup(&config).await {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            // Another daemon holds the pid lock — report and bow out.
            eprintln!("gobd is already running");
            if let Some(pid) = lifecycle::read_locked_pid(&config) {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            // Write the error synchronously (tracing is non-blocking and
            // may not flush before exit)
            write_startup_error(&config, &e);
            error!("failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    // Manager → broadcaster plumbing
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let manager = Arc::new(
        JobManager::new(
            Arc::new(SystemExecutor),
            config.paths.clone(),
            event_tx,
            gob_core::SystemClock,
        )
        .with_stop_policy(StopPolicy::from_env()),
    );
    let broadcaster = Arc::new(Broadcaster::new());
    spawn_event_pump(event_rx, Arc::clone(&broadcaster));

    // Shutdown signal raised by an unfiltered nuke
    let shutdown_notify = Arc::new(Notify::new());

    // Listener task
    let ctx = Arc::new(ListenCtx {
        manager: Arc::clone(&manager),
        broadcaster: Arc::clone(&broadcaster),
        shutdown: Arc::clone(&shutdown_notify),
    });
    let listener = Listener::new(unix_listener, ctx);
    tokio::spawn(listener.run());

    // Port scanner task
    tokio::spawn(PortScanner::new(Arc::clone(&manager)).run());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        socket = %config.paths.socket_path().display(),
        "daemon ready"
    );

    tokio::select! {
        _ = shutdown_notify.notified() => {
            info!("shutdown requested via nuke");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down...");
        }
    }

    // Graceful shutdown: close the socket and pid file. In-memory state
    // is gone with the process; running children continue as orphans.
    state.shutdown();
    info!("daemon stopped");
    Ok(())
}

/// Maximum daemon log size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently
/// ignored so the daemon still starts. Child run logs are never rotated.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else.
/// Clients use this to find where the current startup attempt begins.
/// Full format: "--- gobd: starting (pid: 12345) ---"
const STARTUP_MARKER_PREFIX: &str = "--- gobd: starting (pid: ";

/// Append the startup marker to the log file.
fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    config.paths.ensure()?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.paths.log_path())?;
    writeln!(
        file,
        "{}{}) ---\n",
        STARTUP_MARKER_PREFIX,
        std::process::id()
    )?;

    Ok(())
}

/// Write a startup error synchronously to the log file so it is visible
/// to the auto-start shim even if this process exits immediately.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.paths.log_path())
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    config.paths.ensure()?;

    let file_appender =
        tracing_appender::rolling::never(config.paths.root(), "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
