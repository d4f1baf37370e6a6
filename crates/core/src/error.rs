// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the manager and its callers

use crate::id::JobId;
use thiserror::Error;

/// Errors surfaced by manager operations.
///
/// The connection handler maps these onto the `{success:false, error}`
/// reply envelope; `AlreadyRunning` is special-cased for `add`, where it
/// is surfaced as success with a note.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty command, missing job id, malformed signal number.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Operation conflicts with the job's current state (remove of a
    /// running job, signal of a stopped one).
    #[error("{0}")]
    StateConflict(String),

    /// `add`/`start` of a command whose job already has a live run;
    /// carries the existing job id.
    #[error("job {job_id} is already running")]
    AlreadyRunning { job_id: JobId },

    /// The executor could not launch the child; no run was created.
    #[error("failed to start: {0}")]
    StartFailure(String),

    /// SIGKILL did not clear the run within the follow-up grace window.
    #[error("job {0} did not stop after SIGKILL")]
    StopFailure(JobId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable taxonomy name for logging and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::StateConflict(_) => "state_conflict",
            Error::AlreadyRunning { .. } => "state_conflict",
            Error::StartFailure(_) => "start_failure",
            Error::StopFailure(_) => "stop_failure",
            Error::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
