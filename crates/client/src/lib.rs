// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gob-client: daemon client with auto-start
//!
//! Short-lived gob commands connect through this crate: probe the
//! socket, fork a detached daemon when none is listening, and speak the
//! newline-delimited JSON protocol.

pub mod client;
pub mod daemon_process;

pub use client::{ClientError, DaemonClient, EventStream};
