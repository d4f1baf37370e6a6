// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! The listener accepts connections and spawns one task per client. A
//! handler reads request frames in order and answers each before reading
//! the next; after `subscribe` it stops reading and forwards event
//! frames until the client goes away or falls behind.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use gob_core::{Error as ManagerError, JobId};

use crate::broadcast::Broadcaster;
use crate::lifecycle::DaemonManager;
use crate::protocol::{
    self, AddData, AddDisposition, CleanupData, JobData, JobsData, NukeData, PidData, PortsData,
    Reply, Request, RunsData, StatsData, DEFAULT_TIMEOUT,
};

/// Shared daemon context for all request handlers.
pub(crate) struct ListenCtx {
    pub manager: Arc<DaemonManager>,
    pub broadcaster: Arc<Broadcaster>,
    pub shutdown: Arc<Notify>,
}

/// Listener task for accepting socket connections.
pub(crate) struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop until the daemon shuts down, spawning a task
    /// per connection. A panicking handler takes down its own task only.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            match e {
                                ConnectionError::Protocol(
                                    protocol::ProtocolError::ConnectionClosed,
                                ) => debug!("client disconnected mid-frame"),
                                ConnectionError::Protocol(protocol::ProtocolError::Timeout) => {
                                    warn!("connection write timeout")
                                }
                                _ => error!("connection error: {}", e),
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(stream: UnixStream, ctx: &ListenCtx) -> Result<(), ConnectionError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = match protocol::read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()), // EOF at frame boundary
            Err(e @ protocol::ProtocolError::Json(_)) => {
                // Malformed frame: answer with an error, then close.
                let reply = Reply::err(format!("protocol error: {e}"));
                let _ = protocol::write_frame(&mut writer, &reply, DEFAULT_TIMEOUT).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        match &request {
            Request::Ping {}
            | Request::List { .. }
            | Request::GetJob { .. }
            | Request::Runs { .. }
            | Request::Stats { .. }
            | Request::Ports { .. } => {
                debug!(kind = request.kind(), "received query")
            }
            _ => info!(kind = request.kind(), "received request"),
        }

        match request {
            Request::Subscribe { workdir } => {
                protocol::write_frame(&mut writer, &Reply::ok_empty(), DEFAULT_TIMEOUT).await?;
                return run_subscriber(writer, ctx, workdir).await;
            }
            Request::Nuke { workdir } => {
                let unfiltered = workdir.is_none();
                let report = ctx.manager.nuke(workdir.as_deref()).await;
                let reply = Reply::ok(NukeData {
                    stopped: report.stopped,
                    logs_deleted: report.logs_deleted,
                    removed: report.removed,
                });
                protocol::write_frame(&mut writer, &reply, DEFAULT_TIMEOUT).await?;
                if unfiltered {
                    // Full reset: the daemon exits once the reply is on
                    // the wire.
                    info!("unfiltered nuke, requesting shutdown");
                    ctx.shutdown.notify_one();
                    return Ok(());
                }
            }
            request => {
                let reply = dispatch(request, ctx).await;
                protocol::write_frame(&mut writer, &reply, DEFAULT_TIMEOUT).await?;
            }
        }
    }
}

/// Forward events to a subscribed connection until it goes away.
///
/// The receiving queue is bounded; if the broadcaster drops this
/// subscriber for falling behind, the channel closes and so does the
/// connection. Further request frames from the client are never read.
async fn run_subscriber(
    mut writer: OwnedWriteHalf,
    ctx: &ListenCtx,
    workdir: Option<PathBuf>,
) -> Result<(), ConnectionError> {
    let mut subscription = ctx.broadcaster.subscribe(workdir);
    while let Some(event) = subscription.rx.recv().await {
        if let Err(e) = protocol::write_frame(&mut writer, &*event, DEFAULT_TIMEOUT).await {
            debug!(subscriber = subscription.id, error = %e, "subscriber write failed");
            ctx.broadcaster.unsubscribe(subscription.id);
            return Ok(());
        }
    }
    // Dropped by the broadcaster (backpressure) or daemon shutdown.
    Ok(())
}

/// Handle one request and build its reply.
async fn dispatch(request: Request, ctx: &ListenCtx) -> Reply {
    match request {
        Request::Ping {} => Reply::ok("pong"),

        Request::Add {
            command,
            workdir,
            env,
            description,
        } => match ctx.manager.add_job(command, workdir, env, description) {
            Ok((job, outcome)) => Reply::ok(AddData {
                job,
                outcome: outcome.into(),
                already_running: false,
            }),
            Err(ManagerError::AlreadyRunning { job_id }) => match ctx.manager.get_job(&job_id) {
                // Success-with-note so idempotent setup flows stay simple.
                Ok(job) => Reply::ok(AddData {
                    job,
                    outcome: AddDisposition::AlreadyRunning,
                    already_running: true,
                }),
                Err(e) => Reply::err(e.to_string()),
            },
            Err(e) => Reply::err(e.to_string()),
        },

        Request::Create {
            command,
            workdir,
            env: _,
            description,
        } => match ctx.manager.create_job(command, workdir, description) {
            Ok((job, created)) => Reply::ok(AddData {
                job,
                outcome: if created {
                    AddDisposition::Created
                } else {
                    AddDisposition::AlreadyExists
                },
                already_running: false,
            }),
            Err(e) => Reply::err(e.to_string()),
        },

        Request::List { workdir } => Reply::ok(JobsData {
            jobs: ctx.manager.list_jobs(workdir.as_deref()),
        }),

        Request::GetJob { job_id } => match ctx.manager.get_job(&JobId::new(job_id)) {
            Ok(job) => Reply::ok(JobData { job }),
            Err(e) => Reply::err(e.to_string()),
        },

        Request::Start { job_id, env } => {
            match ctx.manager.start_job(&JobId::new(job_id), env) {
                Ok(job) => Reply::ok(JobData { job }),
                Err(e) => Reply::err(e.to_string()),
            }
        }

        Request::Stop { job_id, force } => {
            match ctx.manager.stop_job(&JobId::new(job_id), force).await {
                Ok(pid) => Reply::ok(PidData { pid }),
                Err(e) => Reply::err(e.to_string()),
            }
        }

        Request::Restart { job_id, env } => {
            match ctx.manager.restart_job(&JobId::new(job_id), env).await {
                Ok(job) => Reply::ok(JobData { job }),
                Err(e) => Reply::err(e.to_string()),
            }
        }

        Request::Signal { job_id, signum } => {
            match ctx.manager.signal_job(&JobId::new(job_id), signum) {
                Ok(pid) => Reply::ok(PidData { pid: Some(pid) }),
                Err(e) => Reply::err(e.to_string()),
            }
        }

        Request::Remove { job_id } => match ctx.manager.remove_job(&JobId::new(job_id)) {
            Ok(pid) => Reply::ok(PidData { pid }),
            Err(e) => Reply::err(e.to_string()),
        },

        Request::Cleanup { workdir } => Reply::ok(CleanupData {
            removed_count: ctx.manager.cleanup(workdir.as_deref()),
        }),

        Request::Runs { job_id } => match ctx.manager.runs_for_job(&JobId::new(job_id)) {
            Ok(runs) => Reply::ok(RunsData { runs }),
            Err(e) => Reply::err(e.to_string()),
        },

        Request::Stats { job_id } => match ctx.manager.stats_for_job(&JobId::new(job_id)) {
            Ok(stats) => Reply::ok(StatsData { stats }),
            Err(e) => Reply::err(e.to_string()),
        },

        Request::Ports { job_id } => {
            let job_id = job_id.map(JobId::new);
            match ctx.manager.ports(job_id.as_ref()) {
                Ok(ports) => Reply::ok(PortsData { ports }),
                Err(e) => Reply::err(e.to_string()),
            }
        }

        // Handled in the connection loop before dispatch.
        Request::Subscribe { .. } | Request::Nuke { .. } => {
            Reply::err("request handled out of band")
        }
    }
}

impl From<gob_engine::AddOutcome> for AddDisposition {
    fn from(outcome: gob_engine::AddOutcome) -> Self {
        match outcome {
            gob_engine::AddOutcome::Created => AddDisposition::Created,
            gob_engine::AddOutcome::StartedExisting => AddDisposition::StartedExisting,
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
