// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: one JSON frame per line, UTF-8. Requests are
//! `{"type": <kind>, "payload": {...}}`; every non-subscribe request is
//! answered with a `{"success", "error", "data"}` envelope. After
//! `subscribe`, the connection carries bare event frames only.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use gob_core::{JobSnapshot, PortInfo, Run, StatsSnapshot};

#[path = "protocol_wire.rs"]
mod wire;
pub use wire::{
    read_frame, read_request, write_frame, ProtocolError, DEFAULT_TIMEOUT, MAX_FRAME_SIZE,
};

/// Request from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Request {
    /// Health check.
    Ping {},

    /// Start (or create-and-start) a job for a command.
    Add {
        command: Vec<String>,
        workdir: PathBuf,
        #[serde(default)]
        env: Vec<String>,
        #[serde(default)]
        description: Option<String>,
    },

    /// Register a job without starting it; idempotent.
    Create {
        command: Vec<String>,
        workdir: PathBuf,
        #[serde(default)]
        env: Vec<String>,
        #[serde(default)]
        description: Option<String>,
    },

    /// List jobs, optionally scoped to one workdir.
    List {
        #[serde(default)]
        workdir: Option<PathBuf>,
    },

    /// Fetch one job snapshot.
    GetJob { job_id: String },

    /// Start a new run on a stopped job.
    Start {
        job_id: String,
        #[serde(default)]
        env: Vec<String>,
    },

    /// Stop the current run (SIGTERM escalation, or SIGKILL with force).
    Stop {
        job_id: String,
        #[serde(default)]
        force: bool,
    },

    /// Stop then start.
    Restart {
        job_id: String,
        #[serde(default)]
        env: Vec<String>,
    },

    /// Deliver a signal to the current run's process group.
    Signal { job_id: String, signum: i32 },

    /// Remove a stopped job and its log files.
    Remove { job_id: String },

    /// Remove every stopped job matching the workdir filter.
    Cleanup {
        #[serde(default)]
        workdir: Option<PathBuf>,
    },

    /// Stop and remove every matching job; unfiltered, the daemon exits
    /// after replying.
    Nuke {
        #[serde(default)]
        workdir: Option<PathBuf>,
    },

    /// List runs of one job.
    Runs { job_id: String },

    /// Cached statistics of one job.
    Stats { job_id: String },

    /// Listening-port snapshot for one job or all running jobs.
    Ports {
        #[serde(default)]
        job_id: Option<String>,
    },

    /// Switch this connection to event-only mode.
    Subscribe {
        #[serde(default)]
        workdir: Option<PathBuf>,
    },
}

impl Request {
    /// Wire name of this request kind (for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ping {} => "ping",
            Request::Add { .. } => "add",
            Request::Create { .. } => "create",
            Request::List { .. } => "list",
            Request::GetJob { .. } => "get_job",
            Request::Start { .. } => "start",
            Request::Stop { .. } => "stop",
            Request::Restart { .. } => "restart",
            Request::Signal { .. } => "signal",
            Request::Remove { .. } => "remove",
            Request::Cleanup { .. } => "cleanup",
            Request::Nuke { .. } => "nuke",
            Request::Runs { .. } => "runs",
            Request::Stats { .. } => "stats",
            Request::Ports { .. } => "ports",
            Request::Subscribe { .. } => "subscribe",
        }
    }
}

/// Reply envelope. Exactly one per non-subscribe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Reply {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                error: None,
                data: Some(value),
            },
            Err(e) => Self::err(format!("failed to encode reply: {e}")),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// Decode the data payload into a typed struct (client side).
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self.data.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

/// How an `add` or `create` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddDisposition {
    /// New job inserted (and, for `add`, its first run started).
    Created,
    /// Existing stopped job acquired a new run.
    StartedExisting,
    /// The job already had a live run; nothing was started.
    AlreadyRunning,
    /// `create` found the job already registered.
    AlreadyExists,
}

/// Data payload for `add` and `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddData {
    pub job: JobSnapshot,
    pub outcome: AddDisposition,
    #[serde(default)]
    pub already_running: bool,
}

/// Data payload carrying a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    pub job: JobSnapshot,
}

/// Data payload for `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsData {
    pub jobs: Vec<JobSnapshot>,
}

/// Data payload for `stop`/`signal`/`remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidData {
    pub pid: Option<u32>,
}

/// Data payload for `cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupData {
    pub removed_count: usize,
}

/// Data payload for `nuke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NukeData {
    pub stopped: usize,
    pub logs_deleted: usize,
    pub removed: usize,
}

/// Data payload for `runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunsData {
    pub runs: Vec<Run>,
}

/// Data payload for `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsData {
    pub stats: StatsSnapshot,
}

/// Data payload for `ports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortsData {
    pub ports: Vec<PortInfo>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
