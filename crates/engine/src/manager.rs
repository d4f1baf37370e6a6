// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job registry and run supervision
//!
//! All state lives in three maps behind one reader/writer lock: jobs by
//! id, runs by run id, and the `(signature ⧺ NUL ⧺ workdir)` index used
//! to deduplicate jobs. Signal delivery, process waits and the stop
//! polling loops all happen outside the lock. Events are pushed onto
//! the (never-blocking) pump channel while the lock is still held, so
//! the channel order always matches state-change order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gob_core::{
    index_key, mint_job_id, Clock, Error, Event, EventKind, Job, JobId, JobSnapshot, PortInfo, Run,
    RunId, RuntimePaths, StatsSnapshot,
};

use crate::executor::{Executor, Exit, ProcessHandle, StartSpec};

/// Grace windows for the stop escalation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub term_grace: Duration,
    /// Wait after SIGKILL before reporting a stop failure.
    pub kill_grace: Duration,
    /// Poll cadence while waiting for the run to clear.
    pub poll_interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            term_grace: Duration::from_secs(10),
            kill_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl StopPolicy {
    /// Defaults overridable via `GOB_STOP_TERM_GRACE_MS`,
    /// `GOB_STOP_KILL_GRACE_MS` and `GOB_STOP_POLL_MS`.
    pub fn from_env() -> Self {
        fn ms(var: &str) -> Option<Duration> {
            std::env::var(var)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
        }
        let defaults = Self::default();
        Self {
            term_grace: ms("GOB_STOP_TERM_GRACE_MS").unwrap_or(defaults.term_grace),
            kill_grace: ms("GOB_STOP_KILL_GRACE_MS").unwrap_or(defaults.kill_grace),
            poll_interval: ms("GOB_STOP_POLL_MS").unwrap_or(defaults.poll_interval),
        }
    }
}

/// How an `add` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    /// New job inserted and its first run started.
    Created,
    /// Existing stopped job acquired a new run.
    StartedExisting,
}

/// Counts reported by `nuke`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NukeReport {
    pub stopped: usize,
    pub logs_deleted: usize,
    pub removed: usize,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, Job>,
    runs: HashMap<RunId, Run>,
    job_index: HashMap<String, JobId>,
}

impl Registry {
    fn latest_run(&self, job_id: &JobId) -> Option<&Run> {
        self.runs
            .values()
            .filter(|r| &r.job_id == job_id)
            .max_by_key(|r| (r.started_at, r.seq))
    }

    /// The run a snapshot should describe: the current run if running,
    /// else the latest historical one.
    fn run_for_snapshot(&self, job: &Job) -> Option<&Run> {
        match &job.current_run_id {
            Some(run_id) => self.runs.get(run_id),
            None => self.latest_run(&job.id),
        }
    }

    fn snapshot(&self, job: &Job) -> JobSnapshot {
        job.snapshot(self.run_for_snapshot(job))
    }

    fn snapshot_by_id(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|job| self.snapshot(job))
    }
}

/// What a removal tore down, for the caller to report and emit.
struct Removal {
    snapshot: JobSnapshot,
    last_pid: Option<u32>,
    logs_deleted: usize,
}

struct ManagerInner<C: Clock> {
    registry: RwLock<Registry>,
    executor: Arc<dyn Executor>,
    paths: RuntimePaths,
    events: mpsc::UnboundedSender<Event>,
    stop_policy: StopPolicy,
    clock: C,
}

/// Thread-safe registry of jobs and runs.
///
/// Owns every [`Job`] and [`Run`]; children are started through the
/// injected [`Executor`] and supervised by one spawned waiter task per
/// run. Lifecycle events are pushed to the daemon's broadcaster over
/// the channel handed in at construction. Cloning is cheap and shares
/// the same state.
pub struct JobManager<C: Clock> {
    inner: Arc<ManagerInner<C>>,
}

impl<C: Clock> Clone for JobManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> JobManager<C> {
    pub fn new(
        executor: Arc<dyn Executor>,
        paths: RuntimePaths,
        events: mpsc::UnboundedSender<Event>,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: RwLock::new(Registry::default()),
                executor,
                paths,
                events,
                stop_policy: StopPolicy::default(),
                clock,
            }),
        }
    }

    /// Override the stop policy; only meaningful before the manager is
    /// shared.
    pub fn with_stop_policy(mut self, stop_policy: StopPolicy) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.stop_policy = stop_policy;
        }
        self
    }

    pub fn stop_policy(&self) -> StopPolicy {
        self.inner.stop_policy
    }

    /// Number of live jobs.
    pub fn job_count(&self) -> usize {
        self.inner.registry.read().jobs.len()
    }

    /// Start (or create-and-start) a job for `command` in `workdir`.
    ///
    /// If a job for the same `(command, workdir)` exists and is running,
    /// fails with [`Error::AlreadyRunning`] carrying its id. If it
    /// exists but is stopped, a new run is started on it (updating the
    /// description when one is given). Otherwise a fresh job is minted;
    /// a run-start failure rolls the insertion back.
    pub fn add_job(
        &self,
        command: Vec<String>,
        workdir: PathBuf,
        env: Vec<String>,
        description: Option<String>,
    ) -> Result<(JobSnapshot, AddOutcome), Error> {
        validate_command(&command, &workdir)?;
        let key = index_key(&gob_core::command_signature(&command), &workdir);

        let mut reg = self.inner.registry.write();
        let (snapshot, run, outcome) = if let Some(job_id) = reg.job_index.get(&key).cloned() {
            let job = reg
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| Error::NotFound(job_id.clone()))?;
            if job.is_running() {
                return Err(Error::AlreadyRunning { job_id });
            }
            if let Some(desc) = description {
                job.description = desc;
            }
            let run_id = self.start_run_locked(&mut reg, &job_id, &env)?;
            let run = reg.runs.get(&run_id).cloned();
            let snapshot = reg
                .snapshot_by_id(&job_id)
                .ok_or_else(|| Error::NotFound(job_id.clone()))?;
            (snapshot, run, AddOutcome::StartedExisting)
        } else {
            let id = JobId::new(mint_job_id(|candidate| reg.jobs.contains_key(candidate)));
            let job = Job::new(
                id.clone(),
                command,
                workdir,
                description.unwrap_or_default(),
                self.inner.clock.epoch_ms(),
            );
            reg.jobs.insert(id.clone(), job);
            reg.job_index.insert(key.clone(), id.clone());
            let run_id = match self.start_run_locked(&mut reg, &id, &env) {
                Ok(run_id) => run_id,
                Err(e) => {
                    // Roll back the insertion; the failed add leaves
                    // no trace.
                    reg.jobs.remove(&id);
                    reg.job_index.remove(&key);
                    return Err(e);
                }
            };
            let run = reg.runs.get(&run_id).cloned();
            let snapshot = reg
                .snapshot_by_id(&id)
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            (snapshot, run, AddOutcome::Created)
        };

        let kind = match outcome {
            AddOutcome::Created => EventKind::JobAdded,
            AddOutcome::StartedExisting => EventKind::JobStarted,
        };
        let job_count = reg.jobs.len();
        self.emit(kind, snapshot.clone(), run.clone(), None, None, job_count);
        self.emit(
            EventKind::RunStarted,
            snapshot.clone(),
            run,
            None,
            None,
            job_count,
        );
        drop(reg);

        info!(job_id = %snapshot.id, ?outcome, "job added");
        Ok((snapshot, outcome))
    }

    /// Register a job without starting it. Idempotent: a second create
    /// for the same `(command, workdir)` returns the same job, updating
    /// the description if it changed.
    pub fn create_job(
        &self,
        command: Vec<String>,
        workdir: PathBuf,
        description: Option<String>,
    ) -> Result<(JobSnapshot, bool), Error> {
        validate_command(&command, &workdir)?;
        let key = index_key(&gob_core::command_signature(&command), &workdir);

        let mut reg = self.inner.registry.write();
        let (snapshot, created, description_changed) =
            if let Some(job_id) = reg.job_index.get(&key).cloned() {
                let job = reg
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| Error::NotFound(job_id.clone()))?;
                let mut changed = false;
                if let Some(desc) = description {
                    if job.description != desc {
                        job.description = desc;
                        changed = true;
                    }
                }
                let snapshot = reg
                    .snapshot_by_id(&job_id)
                    .ok_or_else(|| Error::NotFound(job_id.clone()))?;
                (snapshot, false, changed)
            } else {
                let id = JobId::new(mint_job_id(|candidate| reg.jobs.contains_key(candidate)));
                let job = Job::new(
                    id.clone(),
                    command,
                    workdir,
                    description.unwrap_or_default(),
                    self.inner.clock.epoch_ms(),
                );
                reg.jobs.insert(id.clone(), job);
                reg.job_index.insert(key, id.clone());
                let snapshot = reg
                    .snapshot_by_id(&id)
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                (snapshot, true, false)
            };

        let job_count = reg.jobs.len();
        if created {
            self.emit(
                EventKind::JobAdded,
                snapshot.clone(),
                None,
                None,
                None,
                job_count,
            );
        } else if description_changed {
            self.emit(
                EventKind::JobUpdated,
                snapshot.clone(),
                None,
                None,
                None,
                job_count,
            );
        }
        drop(reg);
        Ok((snapshot, created))
    }

    /// Start a new run on an existing, stopped job.
    pub fn start_job(&self, job_id: &JobId, env: Vec<String>) -> Result<JobSnapshot, Error> {
        let mut reg = self.inner.registry.write();
        let job = reg
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::NotFound(job_id.clone()))?;
        if job.is_running() {
            return Err(Error::AlreadyRunning {
                job_id: job_id.clone(),
            });
        }
        let run_id = self.start_run_locked(&mut reg, job_id, &env)?;
        let run = reg.runs.get(&run_id).cloned();
        let snapshot = reg
            .snapshot_by_id(job_id)
            .ok_or_else(|| Error::NotFound(job_id.clone()))?;

        let job_count = reg.jobs.len();
        self.emit(
            EventKind::JobStarted,
            snapshot.clone(),
            run.clone(),
            None,
            None,
            job_count,
        );
        self.emit(
            EventKind::RunStarted,
            snapshot.clone(),
            run,
            None,
            None,
            job_count,
        );
        drop(reg);

        info!(job_id = %snapshot.id, "job started");
        Ok(snapshot)
    }

    /// Stop a job's current run.
    ///
    /// `force` sends SIGKILL to the process group immediately. Otherwise
    /// SIGTERM, a grace wait, SIGKILL, a follow-up wait, and only then a
    /// stop failure. Stopping an already-stopped job succeeds and
    /// reports the last-known pid. The waiter task emits `job_stopped`;
    /// this method emits nothing itself.
    pub async fn stop_job(&self, job_id: &JobId, force: bool) -> Result<Option<u32>, Error> {
        let (pid, run_id) = {
            let reg = self.inner.registry.read();
            let job = reg
                .jobs
                .get(job_id)
                .ok_or_else(|| Error::NotFound(job_id.clone()))?;
            match job
                .current_run_id
                .as_ref()
                .and_then(|run_id| reg.runs.get(run_id))
            {
                Some(run) => (run.pid, run.id.clone()),
                None => return Ok(reg.latest_run(job_id).map(|r| r.pid)),
            }
        };

        if force {
            signal_group(pid, Signal::SIGKILL)?;
            return Ok(Some(pid));
        }

        signal_group(pid, Signal::SIGTERM)?;
        if self
            .wait_for_run_clear(job_id, &run_id, self.inner.stop_policy.term_grace)
            .await
        {
            return Ok(Some(pid));
        }

        warn!(%job_id, pid, "TERM grace expired, escalating to SIGKILL");
        signal_group(pid, Signal::SIGKILL)?;
        if self
            .wait_for_run_clear(job_id, &run_id, self.inner.stop_policy.kill_grace)
            .await
        {
            return Ok(Some(pid));
        }

        Err(Error::StopFailure(job_id.clone()))
    }

    /// Stop the current run (graceful escalation), then start a new one.
    ///
    /// Between the two phases the job briefly has no current run;
    /// concurrent operations observe it as stopped during that window.
    pub async fn restart_job(
        &self,
        job_id: &JobId,
        env: Vec<String>,
    ) -> Result<JobSnapshot, Error> {
        self.stop_job(job_id, false).await?;
        self.start_job(job_id, env)
    }

    /// Deliver `signum` to the current run's process group.
    pub fn signal_job(&self, job_id: &JobId, signum: i32) -> Result<u32, Error> {
        let signal = Signal::try_from(signum)
            .map_err(|_| Error::InvalidArgument(format!("invalid signal number: {signum}")))?;
        let pid = {
            let reg = self.inner.registry.read();
            let job = reg
                .jobs
                .get(job_id)
                .ok_or_else(|| Error::NotFound(job_id.clone()))?;
            let run = job
                .current_run_id
                .as_ref()
                .and_then(|run_id| reg.runs.get(run_id))
                .ok_or_else(|| Error::StateConflict(format!("job {job_id} is not running")))?;
            run.pid
        };
        signal_group(pid, signal)?;
        debug!(%job_id, pid, signal = %signal, "signal delivered");
        Ok(pid)
    }

    /// Remove a stopped job, its runs and their log files.
    pub fn remove_job(&self, job_id: &JobId) -> Result<Option<u32>, Error> {
        let mut reg = self.inner.registry.write();
        let job = reg
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::NotFound(job_id.clone()))?;
        if job.is_running() {
            return Err(Error::StateConflict(format!(
                "job {job_id} is running; stop it before removing"
            )));
        }
        let removal =
            remove_locked(&mut reg, job_id).ok_or_else(|| Error::NotFound(job_id.clone()))?;
        let job_count = reg.jobs.len();
        self.emit(
            EventKind::JobRemoved,
            removal.snapshot,
            None,
            None,
            None,
            job_count,
        );
        drop(reg);

        info!(%job_id, "job removed");
        Ok(removal.last_pid)
    }

    /// Remove every stopped job whose workdir matches the filter
    /// (every stopped job when the filter is empty). Returns the count.
    pub fn cleanup(&self, workdir: Option<&Path>) -> usize {
        let mut reg = self.inner.registry.write();
        let targets: Vec<JobId> = reg
            .jobs
            .values()
            .filter(|job| !job.is_running() && workdir.map_or(true, |w| job.workdir == w))
            .map(|job| job.id.clone())
            .collect();
        let removals: Vec<Removal> = targets
            .iter()
            .filter_map(|id| remove_locked(&mut reg, id))
            .collect();
        let job_count = reg.jobs.len();
        let count = removals.len();
        for removal in removals {
            self.emit(
                EventKind::JobRemoved,
                removal.snapshot,
                None,
                None,
                None,
                job_count,
            );
        }
        drop(reg);

        if count > 0 {
            info!(count, "cleanup removed jobs");
        }
        count
    }

    /// Stop, delete log files for, and remove every matching job.
    ///
    /// Running jobs get SIGTERM, up to the TERM grace to die, then
    /// SIGKILL and a final settling pause. Jobs are removed afterwards
    /// whether or not their processes obliged; counts are always
    /// reported.
    pub async fn nuke(&self, workdir: Option<&Path>) -> NukeReport {
        let (targets, running) = {
            let reg = self.inner.registry.read();
            let targets: Vec<JobId> = reg
                .jobs
                .values()
                .filter(|job| workdir.map_or(true, |w| job.workdir == w))
                .map(|job| job.id.clone())
                .collect();
            let running: Vec<(JobId, RunId, u32)> = targets
                .iter()
                .filter_map(|id| {
                    let job = reg.jobs.get(id)?;
                    let run = job
                        .current_run_id
                        .as_ref()
                        .and_then(|run_id| reg.runs.get(run_id))?;
                    Some((id.clone(), run.id.clone(), run.pid))
                })
                .collect();
            (targets, running)
        };

        for (_, _, pid) in &running {
            let _ = signal_group(*pid, Signal::SIGTERM);
        }

        let deadline = tokio::time::Instant::now() + self.inner.stop_policy.term_grace;
        loop {
            let all_cleared = running
                .iter()
                .all(|(job_id, run_id, _)| self.run_cleared(job_id, run_id));
            if all_cleared || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.inner.stop_policy.poll_interval).await;
        }

        let mut resisted = false;
        for (job_id, run_id, pid) in &running {
            if !self.run_cleared(job_id, run_id) {
                resisted = true;
                let _ = signal_group(*pid, Signal::SIGKILL);
            }
        }
        if resisted {
            tokio::time::sleep(self.inner.stop_policy.poll_interval).await;
        }

        let mut reg = self.inner.registry.write();
        let removals: Vec<Removal> = targets
            .iter()
            .filter_map(|id| remove_locked(&mut reg, id))
            .collect();
        let job_count = reg.jobs.len();
        let report = NukeReport {
            stopped: running.len(),
            logs_deleted: removals.iter().map(|r| r.logs_deleted).sum(),
            removed: removals.len(),
        };
        for removal in removals {
            self.emit(
                EventKind::JobRemoved,
                removal.snapshot,
                None,
                None,
                None,
                job_count,
            );
        }
        drop(reg);

        info!(
            stopped = report.stopped,
            removed = report.removed,
            logs_deleted = report.logs_deleted,
            "nuke complete"
        );
        report
    }

    /// Jobs sorted by creation time, newest first.
    pub fn list_jobs(&self, workdir: Option<&Path>) -> Vec<JobSnapshot> {
        let reg = self.inner.registry.read();
        let mut jobs: Vec<&Job> = reg
            .jobs
            .values()
            .filter(|job| workdir.map_or(true, |w| job.workdir == w))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs.into_iter().map(|job| reg.snapshot(job)).collect()
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<JobSnapshot, Error> {
        self.inner
            .registry
            .read()
            .snapshot_by_id(job_id)
            .ok_or_else(|| Error::NotFound(job_id.clone()))
    }

    /// Runs of a job, newest first.
    pub fn runs_for_job(&self, job_id: &JobId) -> Result<Vec<Run>, Error> {
        let reg = self.inner.registry.read();
        if !reg.jobs.contains_key(job_id) {
            return Err(Error::NotFound(job_id.clone()));
        }
        let mut runs: Vec<Run> = reg
            .runs
            .values()
            .filter(|run| &run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.seq.cmp(&a.seq)));
        Ok(runs)
    }

    pub fn stats_for_job(&self, job_id: &JobId) -> Result<StatsSnapshot, Error> {
        let reg = self.inner.registry.read();
        reg.jobs
            .get(job_id)
            .map(|job| job.stats.snapshot())
            .ok_or_else(|| Error::NotFound(job_id.clone()))
    }

    /// Current port snapshot: one job's, or all running jobs' merged.
    pub fn ports(&self, job_id: Option<&JobId>) -> Result<Vec<PortInfo>, Error> {
        let reg = self.inner.registry.read();
        match job_id {
            Some(id) => {
                let job = reg.jobs.get(id).ok_or_else(|| Error::NotFound(id.clone()))?;
                Ok(job
                    .current_run_id
                    .as_ref()
                    .and_then(|run_id| reg.runs.get(run_id))
                    .map(|run| run.ports.clone())
                    .unwrap_or_default())
            }
            None => {
                let mut all: Vec<PortInfo> = reg
                    .runs
                    .values()
                    .filter(|run| run.is_running())
                    .flat_map(|run| run.ports.iter().cloned())
                    .collect();
                all.sort();
                Ok(all)
            }
        }
    }

    /// Currently running runs, for the port scanner.
    pub fn running_runs(&self) -> Vec<(JobId, RunId, u32)> {
        self.inner
            .registry
            .read()
            .runs
            .values()
            .filter(|run| run.is_running())
            .map(|run| (run.job_id.clone(), run.id.clone(), run.pid))
            .collect()
    }

    /// Install a fresh port snapshot for a running run; emits
    /// `ports_updated` iff it differs from the stored one.
    pub fn apply_port_snapshot(&self, job_id: &JobId, run_id: &RunId, ports: Vec<PortInfo>) {
        let mut reg = self.inner.registry.write();
        let still_current = reg
            .jobs
            .get(job_id)
            .is_some_and(|job| job.current_run_id.as_ref() == Some(run_id));
        if !still_current {
            return;
        }
        let Some(run) = reg.runs.get_mut(run_id) else {
            return;
        };
        if !run.is_running() || run.ports == ports {
            return;
        }
        run.ports = ports.clone();
        let Some(snapshot) = reg.snapshot_by_id(job_id) else {
            return;
        };
        let job_count = reg.jobs.len();
        self.emit(
            EventKind::PortsUpdated,
            snapshot,
            None,
            None,
            Some(ports.clone()),
            job_count,
        );
        drop(reg);

        debug!(%job_id, count = ports.len(), "ports updated");
    }

    /// Mint a run id, start the child, install the run. Caller holds the
    /// write lock. On executor failure the sequence number is rewound
    /// and no run exists.
    fn start_run_locked(
        &self,
        reg: &mut Registry,
        job_id: &JobId,
        env: &[String],
    ) -> Result<RunId, Error> {
        let job = reg
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(job_id.clone()))?;
        let seq = job.next_run_seq;
        let run_id = RunId::compose(&job.id, seq);
        job.next_run_seq += 1;

        let spec = StartSpec {
            command: job.command.clone(),
            workdir: job.workdir.clone(),
            env: env.to_vec(),
            stdout_path: self.inner.paths.run_stdout_path(&run_id),
            stderr_path: self.inner.paths.run_stderr_path(&run_id),
        };

        let handle = match self.inner.executor.start(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                job.next_run_seq = seq;
                return Err(e);
            }
        };

        let pid = handle.pid();
        let run = Run::new(
            run_id.clone(),
            job_id.clone(),
            seq,
            pid,
            spec.stdout_path,
            spec.stderr_path,
            self.inner.clock.epoch_ms(),
        );
        reg.runs.insert(run_id.clone(), run);
        job.current_run_id = Some(run_id.clone());

        self.spawn_waiter(job_id.clone(), run_id.clone(), handle);
        debug!(%job_id, %run_id, pid, "run started");
        Ok(run_id)
    }

    /// One task per run blocks on the child's wait and folds the result
    /// back into the registry.
    fn spawn_waiter(&self, job_id: JobId, run_id: RunId, mut handle: Box<dyn ProcessHandle>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let exit = handle.wait().await;
            manager.finish_run(&job_id, &run_id, exit);
        });
    }

    /// Transition a run to stopped: freeze it, clear the job's current
    /// run, fold stats, emit `job_stopped`/`run_stopped`.
    fn finish_run(&self, job_id: &JobId, run_id: &RunId, exit: Exit) {
        let mut reg = self.inner.registry.write();
        let now = self.inner.clock.epoch_ms();

        let Some(run) = reg.runs.get_mut(run_id) else {
            // Run was nuked while the waiter was pending.
            return;
        };
        if !run.is_running() {
            return;
        }
        run.finish(now, exit.code);
        let duration = run.duration_ms().unwrap_or_default();
        let run = run.clone();

        let Some(job) = reg.jobs.get_mut(job_id) else {
            return;
        };
        if job.current_run_id.as_ref() == Some(run_id) {
            job.current_run_id = None;
        }
        job.stats.record(duration, exit.success());
        let stats = job.stats.snapshot();

        let Some(snapshot) = reg.snapshot_by_id(job_id) else {
            return;
        };
        let job_count = reg.jobs.len();
        self.emit(
            EventKind::JobStopped,
            snapshot.clone(),
            Some(run.clone()),
            Some(stats.clone()),
            Some(Vec::new()),
            job_count,
        );
        self.emit(
            EventKind::RunStopped,
            snapshot,
            Some(run),
            Some(stats),
            None,
            job_count,
        );
        drop(reg);

        info!(%job_id, %run_id, exit_code = ?exit.code, "run stopped");
    }

    fn run_cleared(&self, job_id: &JobId, run_id: &RunId) -> bool {
        let reg = self.inner.registry.read();
        match reg.jobs.get(job_id) {
            None => true,
            Some(job) => job.current_run_id.as_ref() != Some(run_id),
        }
    }

    async fn wait_for_run_clear(&self, job_id: &JobId, run_id: &RunId, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.run_cleared(job_id, run_id) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.inner.stop_policy.poll_interval).await;
        }
    }

    fn emit(
        &self,
        kind: EventKind,
        job: JobSnapshot,
        run: Option<Run>,
        stats: Option<StatsSnapshot>,
        ports: Option<Vec<PortInfo>>,
        job_count: usize,
    ) {
        let event = Event {
            kind,
            job_id: job.id.clone(),
            job,
            run,
            stats,
            ports,
            job_count,
        };
        // The receiver only disappears during shutdown.
        let _ = self.inner.events.send(event);
    }
}

/// Drop a job, its runs and their log files from the registry.
/// Deletion failures are ignored; the job goes away regardless.
fn remove_locked(reg: &mut Registry, job_id: &JobId) -> Option<Removal> {
    let job = reg.jobs.get(job_id)?;
    let key = index_key(&job.command_signature, &job.workdir);
    let snapshot = reg.snapshot(job);
    let last_pid = snapshot.pid;

    let run_ids: Vec<RunId> = reg
        .runs
        .values()
        .filter(|run| &run.job_id == job_id)
        .map(|run| run.id.clone())
        .collect();
    let mut logs_deleted = 0;
    for run_id in &run_ids {
        if let Some(run) = reg.runs.remove(run_id) {
            if std::fs::remove_file(&run.stdout_path).is_ok() {
                logs_deleted += 1;
            }
            if std::fs::remove_file(&run.stderr_path).is_ok() {
                logs_deleted += 1;
            }
        }
    }

    reg.job_index.remove(&key);
    reg.jobs.remove(job_id);
    Some(Removal {
        snapshot,
        last_pid,
        logs_deleted,
    })
}

fn validate_command(command: &[String], workdir: &Path) -> Result<(), Error> {
    if command.is_empty() {
        return Err(Error::InvalidArgument("empty command".to_string()));
    }
    if !workdir.is_absolute() {
        return Err(Error::InvalidArgument(format!(
            "workdir must be absolute: {}",
            workdir.display()
        )));
    }
    Ok(())
}

/// Signal a process group, treating "no such process" as success: if the
/// group died between the state check and the signal, the intent is
/// already satisfied.
fn signal_group(pid: u32, signal: Signal) -> Result<(), Error> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(Error::Io(std::io::Error::from_raw_os_error(errno as i32))),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
