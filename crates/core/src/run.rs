// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single execution of a job

use crate::id::{JobId, RunId};
use crate::ports::PortInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One execution of a job's command.
///
/// Timestamps are epoch milliseconds. A stopped run is immutable: once
/// `finish` has been applied, no field changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: JobId,
    /// Sequence number within the owning job (internal ordering key).
    #[serde(skip)]
    pub seq: u64,
    /// Pid of the child's process-group leader.
    pub pid: u32,
    pub status: RunStatus,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<u64>,
    /// Set iff the child exited normally; unset when killed by a signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Last observed listening-socket snapshot (empty once stopped).
    #[serde(default)]
    pub ports: Vec<PortInfo>,
}

impl Run {
    pub fn new(
        id: RunId,
        job_id: JobId,
        seq: u64,
        pid: u32,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
        started_at: u64,
    ) -> Self {
        Self {
            id,
            job_id,
            seq,
            pid,
            status: RunStatus::Running,
            stdout_path,
            stderr_path,
            started_at,
            stopped_at: None,
            exit_code: None,
            ports: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Transition to stopped, recording the exit classification and
    /// clearing the port snapshot.
    pub fn finish(&mut self, stopped_at: u64, exit_code: Option<i32>) {
        self.status = RunStatus::Stopped;
        self.stopped_at = Some(stopped_at.max(self.started_at));
        self.exit_code = exit_code;
        self.ports.clear();
    }

    /// Wall-clock duration, available once the run has stopped.
    pub fn duration_ms(&self) -> Option<u64> {
        self.stopped_at
            .map(|stopped| stopped.saturating_sub(self.started_at))
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
