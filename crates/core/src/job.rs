// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identity and cached statistics

use crate::id::{JobId, RunId};
use crate::ports::PortInfo;
use crate::run::{Run, RunStatus};
use crate::signature::command_signature;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Derived status of a job: running iff it has a current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Durable-within-daemon identity keyed by `(command_signature, workdir)`.
///
/// A job owns a sequence of runs through `next_run_seq` and caches the
/// aggregate statistics of every completed run. The active run, if any,
/// is referenced by id only; runs are owned by the manager's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub command_signature: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<RunId>,
    pub next_run_seq: u64,
    /// Epoch milliseconds.
    pub created_at: u64,
    #[serde(default)]
    pub stats: JobStats,
}

impl Job {
    pub fn new(
        id: JobId,
        command: Vec<String>,
        workdir: PathBuf,
        description: String,
        created_at: u64,
    ) -> Self {
        let command_signature = command_signature(&command);
        Self {
            id,
            command,
            workdir,
            command_signature,
            description,
            current_run_id: None,
            next_run_seq: 1,
            created_at,
            stats: JobStats::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_run_id.is_some()
    }

    pub fn status(&self) -> JobStatus {
        if self.is_running() {
            JobStatus::Running
        } else {
            JobStatus::Stopped
        }
    }

    /// Build the client-facing snapshot.
    ///
    /// `run` is the current run when running, else the latest historical
    /// run; pid, paths and timing all refer to it.
    pub fn snapshot(&self, run: Option<&Run>) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status(),
            command: self.command.clone(),
            workdir: self.workdir.clone(),
            description: self.description.clone(),
            pid: run.map(|r| r.pid),
            exit_code: run.and_then(|r| r.exit_code),
            started_at: run.map(|r| r.started_at),
            stopped_at: run.and_then(|r| r.stopped_at),
            stdout_path: run.map(|r| r.stdout_path.clone()),
            stderr_path: run.map(|r| r.stderr_path.clone()),
            ports: run
                .filter(|r| r.status == RunStatus::Running)
                .map(|r| r.ports.clone())
                .unwrap_or_default(),
        }
    }
}

/// Aggregates over a job's completed runs (the active run is excluded
/// until it finishes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub run_count: u64,
    pub success_count: u64,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl JobStats {
    /// Fold one completed run into the aggregates.
    pub fn record(&mut self, duration_ms: u64, success: bool) {
        self.run_count += 1;
        if success {
            self.success_count += 1;
        }
        self.total_duration_ms += duration_ms;
        self.min_duration_ms = Some(match self.min_duration_ms {
            Some(min) => min.min(duration_ms),
            None => duration_ms,
        });
        self.max_duration_ms = Some(match self.max_duration_ms {
            Some(max) => max.max(duration_ms),
            None => duration_ms,
        });
    }

    pub fn avg_duration_ms(&self) -> u64 {
        if self.run_count == 0 {
            0
        } else {
            self.total_duration_ms / self.run_count
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.run_count as f64
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            run_count: self.run_count,
            success_count: self.success_count,
            success_rate: self.success_rate(),
            avg_duration_ms: self.avg_duration_ms(),
            min_duration_ms: self.min_duration_ms,
            max_duration_ms: self.max_duration_ms,
            total_duration_ms: self.total_duration_ms,
        }
    }
}

/// Client-facing statistics with the derived ratios filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub run_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    pub total_duration_ms: u64,
}

/// Wire shape of a job as returned in replies and events.
///
/// `pid`, paths and timing refer to the current run if running, else the
/// latest run; all are null for a job that has never run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub description: String,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<u64>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub ports: Vec<PortInfo>,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
