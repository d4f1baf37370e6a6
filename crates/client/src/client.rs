// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client: connect, auto-start, request/reply, subscribe.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use gob_core::{Event, RuntimePaths};
use gob_daemon::protocol::{self, ProtocolError, Reply, Request, DEFAULT_TIMEOUT};

use crate::daemon_process::{
    cleanup_stale_socket, start_daemon_background, wrap_with_startup_error,
};

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for waiting for an auto-started daemon to accept.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("GOB_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(2))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("GOB_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection to the daemon.
///
/// One connection can issue any number of sequential requests; replies
/// come back in request order. [`DaemonClient::subscribe`] consumes the
/// connection and turns it into an event stream.
#[derive(Debug)]
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    paths: RuntimePaths,
}

impl DaemonClient {
    /// Connect to the daemon for this user's runtime directory.
    pub async fn connect() -> Result<Self, ClientError> {
        Self::connect_to(RuntimePaths::resolve()).await
    }

    /// Connect, auto-starting a daemon when none is listening.
    ///
    /// Probe → fork a detached gobd → wait (bounded) for the socket →
    /// connect. On failure the daemon log's startup section is attached
    /// to the error.
    pub async fn connect_or_start() -> Result<Self, ClientError> {
        Self::connect_or_start_at(RuntimePaths::resolve()).await
    }

    /// Connect to the daemon of an explicit runtime directory.
    pub async fn connect_to(paths: RuntimePaths) -> Result<Self, ClientError> {
        let socket_path = paths.socket_path();
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                let (reader, writer) = stream.into_split();
                Ok(Self {
                    reader: BufReader::new(reader),
                    writer,
                    paths,
                })
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                Err(ClientError::DaemonNotRunning)
            }
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    /// [`DaemonClient::connect_or_start`] against an explicit runtime
    /// directory.
    pub async fn connect_or_start_at(paths: RuntimePaths) -> Result<Self, ClientError> {
        match Self::connect_to(paths.clone()).await {
            Ok(client) => Ok(client),
            Err(ClientError::DaemonNotRunning) => {
                // Clear anything a crashed daemon left behind, then fork
                // a fresh one. A concurrent auto-start race is fine: the
                // losing daemon exits on the pid lock and both clients
                // connect to the winner.
                cleanup_stale_socket(&paths);
                debug!("daemon not running, auto-starting");
                let child = start_daemon_background()?;
                Self::connect_with_retry(paths, timeout_connect(), child).await
            }
            Err(e) => Err(wrap_with_startup_error(&paths, e)),
        }
    }

    /// Poll for the socket until the deadline, watching for the daemon
    /// exiting early.
    async fn connect_with_retry(
        paths: RuntimePaths,
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Self::connect_to(paths.clone()).await {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {}
                Err(e) => return Err(wrap_with_startup_error(&paths, e)),
            }

            if let Ok(Some(status)) = child.try_wait() {
                // A loser of the single-instance race exits promptly;
                // the winner's socket may still be coming up.
                if let Ok(client) = Self::connect_to(paths.clone()).await {
                    return Ok(client);
                }
                return Err(wrap_with_startup_error(
                    &paths,
                    ClientError::DaemonStartFailed(format!("daemon exited early: {status}")),
                ));
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(wrap_with_startup_error(&paths, ClientError::DaemonStartTimeout));
            }
            tokio::time::sleep(poll_interval()).await;
        }
    }

    /// Runtime paths this client resolved.
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Send one request and read its reply.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, ClientError> {
        protocol::write_frame(&mut self.writer, request, DEFAULT_TIMEOUT).await?;
        match protocol::read_frame::<_, Reply>(&mut self.reader).await? {
            Some(reply) => Ok(reply),
            None => Err(ClientError::Protocol(ProtocolError::ConnectionClosed)),
        }
    }

    /// Send one request; error unless the daemon reports success.
    pub async fn call(&mut self, request: &Request) -> Result<Reply, ClientError> {
        let reply = self.request(request).await?;
        if reply.success {
            Ok(reply)
        } else {
            Err(ClientError::Rejected(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Enter event-only mode with an optional workdir filter.
    pub async fn subscribe(
        mut self,
        workdir: Option<PathBuf>,
    ) -> Result<EventStream, ClientError> {
        self.call(&Request::Subscribe { workdir }).await?;
        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Event frames from a subscribed connection, in emission order.
///
/// The stream ends (`None`) when the daemon shuts down or drops this
/// subscriber for falling behind; re-subscribe to recover.
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Held so the daemon does not see EOF while we are subscribed.
    _writer: OwnedWriteHalf,
}

impl EventStream {
    pub async fn next(&mut self) -> Result<Option<Event>, ClientError> {
        Ok(protocol::read_frame(&mut self.reader).await?)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
