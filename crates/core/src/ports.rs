// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listening-socket observations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "tcp"),
            PortProtocol::Udp => write!(f, "udp"),
        }
    }
}

/// One listening socket owned by a process in a job's tree.
///
/// Snapshots are kept sorted by the derived ordering so they compare
/// structurally between scanner ticks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: u16,
    pub protocol: PortProtocol,
    pub address: String,
    pub pid: u32,
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
