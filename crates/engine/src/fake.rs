// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted executor double for manager tests

use crate::executor::{Executor, Exit, ProcessHandle, StartSpec};
use async_trait::async_trait;
use gob_core::Error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// First pid handed out. High enough that a stray `killpg` from a test
/// never lands on a real process group.
const FAKE_PID_BASE: u32 = 3_000_000;

#[derive(Default)]
struct FakeState {
    starts: Vec<StartSpec>,
    fail_next: Option<String>,
    running: HashMap<u32, oneshot::Sender<Exit>>,
}

/// Records every start and completes runs on command.
///
/// Each started "process" blocks in `wait()` until the test calls
/// [`FakeExecutor::finish`] for its pid.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    state: Arc<Mutex<FakeState>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start spec seen so far, in order.
    pub fn starts(&self) -> Vec<StartSpec> {
        self.state.lock().starts.clone()
    }

    /// Make the next `start` fail with the given message.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Pids of fake processes that have not finished yet.
    pub fn running_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.state.lock().running.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Complete the fake process with the given exit. Returns false if
    /// the pid is unknown or already finished.
    pub fn finish(&self, pid: u32, exit: Exit) -> bool {
        let tx = self.state.lock().running.remove(&pid);
        match tx {
            Some(tx) => tx.send(exit).is_ok(),
            None => false,
        }
    }

    /// Complete every running fake process.
    pub fn finish_all(&self, exit: Exit) {
        for pid in self.running_pids() {
            self.finish(pid, exit);
        }
    }
}

impl Executor for FakeExecutor {
    fn start(&self, spec: &StartSpec) -> Result<Box<dyn ProcessHandle>, Error> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(Error::StartFailure(message));
        }
        let pid = FAKE_PID_BASE + state.starts.len() as u32;
        state.starts.push(spec.clone());
        let (tx, rx) = oneshot::channel();
        state.running.insert(pid, tx);
        Ok(Box::new(FakeHandle { pid, rx: Some(rx) }))
    }
}

struct FakeHandle {
    pid: u32,
    rx: Option<oneshot::Receiver<Exit>>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Exit {
        match self.rx.take() {
            Some(rx) => rx.await.unwrap_or(Exit { code: None }),
            None => Exit { code: None },
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
