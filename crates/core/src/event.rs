// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events broadcast to subscribed clients

use crate::id::JobId;
use crate::job::{JobSnapshot, StatsSnapshot};
use crate::ports::PortInfo;
use crate::run::Run;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// New job inserted and its first run started.
    JobAdded,
    /// Existing job acquired a new run.
    JobStarted,
    /// A run transitioned to stopped.
    JobStopped,
    /// A job was removed (singly or via cleanup/nuke).
    JobRemoved,
    /// Any run was created (may coincide with `JobAdded`/`JobStarted`).
    RunStarted,
    /// A run stopped (coincides with `JobStopped`; carries the run).
    RunStopped,
    /// Port-scanner diff for a job.
    PortsUpdated,
    /// Mutable attributes changed (e.g. description).
    JobUpdated,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::JobAdded => "job_added",
            EventKind::JobStarted => "job_started",
            EventKind::JobStopped => "job_stopped",
            EventKind::JobRemoved => "job_removed",
            EventKind::RunStarted => "run_started",
            EventKind::RunStopped => "run_stopped",
            EventKind::PortsUpdated => "ports_updated",
            EventKind::JobUpdated => "job_updated",
        };
        write!(f, "{name}")
    }
}

/// One broadcast frame.
///
/// Sent to subscribed connections verbatim (no reply envelope). `job` is
/// the snapshot taken when the event was emitted; `job_count` is the
/// number of live jobs after the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: JobId,
    pub job: JobSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortInfo>>,
    pub job_count: usize,
}

impl Event {
    /// Whether this event passes a subscriber's workdir filter.
    ///
    /// `None` is the "all" filter; otherwise the job's workdir must equal
    /// the filter exactly.
    pub fn matches_workdir(&self, filter: Option<&Path>) -> bool {
        match filter {
            None => true,
            Some(dir) => self.job.workdir == dir,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
