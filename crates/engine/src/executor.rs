// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process execution behind a capability interface

use async_trait::async_trait;
use gob_core::Error;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// What to launch and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSpec {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    /// `KEY=VALUE` entries. Empty inherits the daemon's environment;
    /// non-empty replaces it wholesale.
    pub env: Vec<String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// Terminal state of a child: a normal exit code, or none when the
/// process was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub code: Option<i32>,
}

impl Exit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle to a started child.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Pid of the child (leader of its own process group).
    fn pid(&self) -> u32;

    /// Block until the child terminates.
    async fn wait(&mut self) -> Exit;
}

/// Starts children. The manager calls only through this interface, so a
/// scripted double can stand in for the real thing.
pub trait Executor: Send + Sync {
    fn start(&self, spec: &StartSpec) -> Result<Box<dyn ProcessHandle>, Error>;
}

/// Real executor.
///
/// The child is placed in its own process group (`setpgid(0, 0)`) so the
/// daemon can signal the whole tree by group id, and stdout/stderr are
/// redirected to freshly truncated log files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn start(&self, spec: &StartSpec) -> Result<Box<dyn ProcessHandle>, Error> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| Error::InvalidArgument("empty command".to_string()))?;

        let stdout = std::fs::File::create(&spec.stdout_path)
            .map_err(|e| Error::StartFailure(format!("open {}: {e}", spec.stdout_path.display())))?;
        let stderr = std::fs::File::create(&spec.stderr_path)
            .map_err(|e| Error::StartFailure(format!("open {}: {e}", spec.stderr_path.display())))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        if !spec.env.is_empty() {
            cmd.env_clear();
            cmd.envs(spec.env.iter().filter_map(|kv| kv.split_once('=')));
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::StartFailure(format!("{program}: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::StartFailure(format!("{program}: no pid after spawn")))?;

        Ok(Box::new(SystemHandle { pid, child }))
    }
}

struct SystemHandle {
    pid: u32,
    child: Child,
}

#[async_trait]
impl ProcessHandle for SystemHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Exit {
        match self.child.wait().await {
            Ok(status) => Exit {
                code: status.code(),
            },
            // A wait failure means no exit code is recoverable; classify
            // as a signal kill.
            Err(_) => Exit { code: None },
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
