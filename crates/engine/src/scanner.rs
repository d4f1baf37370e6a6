// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic discovery of listening sockets per job
//!
//! Every tick, listening TCP/UDP sockets are enumerated system-wide and
//! attributed to running jobs by walking the process tree down from each
//! run's group leader. Snapshots are sorted so a plain equality check
//! detects diffs; the manager emits `ports_updated` only on change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState};
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use gob_core::{Clock, PortInfo, PortProtocol};

use crate::manager::JobManager;

/// Re-scan cadence for running jobs.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Drives the scan loop against a manager.
pub struct PortScanner<C: Clock> {
    manager: Arc<JobManager<C>>,
    interval: Duration,
    system: System,
}

impl<C: Clock> PortScanner<C> {
    pub fn new(manager: Arc<JobManager<C>>) -> Self {
        Self {
            manager,
            interval: SCAN_INTERVAL,
            system: System::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run forever; ticks are skipped, not bunched, under load.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            self.scan_once();
        }
    }

    /// One pass over every running run.
    pub fn scan_once(&mut self) {
        let targets = self.manager.running_runs();
        if targets.is_empty() {
            return;
        }

        let sockets = match listening_sockets() {
            Ok(sockets) => sockets,
            Err(e) => {
                debug!(error = %e, "socket enumeration failed, skipping tick");
                return;
            }
        };

        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let parents: HashMap<u32, u32> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                process.parent().map(|parent| (pid.as_u32(), parent.as_u32()))
            })
            .collect();

        for (job_id, run_id, root_pid) in targets {
            let tree = descendants(&parents, root_pid);
            let mut ports: Vec<PortInfo> = sockets
                .iter()
                .filter(|socket| tree.contains(&socket.pid))
                .cloned()
                .collect();
            ports.sort();
            ports.dedup();
            self.manager.apply_port_snapshot(&job_id, &run_id, ports);
        }
    }
}

/// All listening TCP sockets and bound UDP sockets, one entry per
/// owning pid.
fn listening_sockets() -> Result<Vec<PortInfo>, netstat2::error::Error> {
    let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;

    let mut out = Vec::new();
    for socket in netstat2::get_sockets_info(af_flags, proto_flags)? {
        match &socket.protocol_socket_info {
            ProtocolSocketInfo::Tcp(tcp) if tcp.state == TcpState::Listen => {
                for pid in &socket.associated_pids {
                    out.push(PortInfo {
                        port: tcp.local_port,
                        protocol: PortProtocol::Tcp,
                        address: tcp.local_addr.to_string(),
                        pid: *pid,
                    });
                }
            }
            ProtocolSocketInfo::Tcp(_) => {}
            ProtocolSocketInfo::Udp(udp) => {
                for pid in &socket.associated_pids {
                    out.push(PortInfo {
                        port: udp.local_port,
                        protocol: PortProtocol::Udp,
                        address: udp.local_addr.to_string(),
                        pid: *pid,
                    });
                }
            }
        }
    }
    Ok(out)
}

/// Pids reachable from `root` through parent links, including `root`.
fn descendants(parents: &HashMap<u32, u32>, root: u32) -> HashSet<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, parent) in parents {
        children.entry(*parent).or_default().push(*pid);
    }

    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if seen.insert(*kid) {
                    frontier.push(*kid);
                }
            }
        }
    }
    seen
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
