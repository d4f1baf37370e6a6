// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gob daemon library
//!
//! This module exposes the IPC protocol types for use by clients.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod protocol;

pub use protocol::{
    AddData, AddDisposition, CleanupData, JobData, JobsData, NukeData, PidData, PortsData,
    ProtocolError, Reply, Request, RunsData, StatsData, DEFAULT_TIMEOUT, MAX_FRAME_SIZE,
};
