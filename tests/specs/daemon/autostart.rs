//! Auto-start shim specs: probe, fork, crash reset.

use crate::prelude::*;
use gob_client::DaemonClient;
use gob_core::RuntimePaths;
use gob_daemon::protocol::{JobsData, Reply, Request};
use serial_test::serial;
use std::time::Duration;

async fn list_jobs(client: &mut DaemonClient) -> Vec<gob_core::JobSnapshot> {
    let reply: Reply = client
        .call(&Request::List { workdir: None })
        .await
        .unwrap();
    let data: JobsData = reply.data_as().unwrap();
    data.jobs
}

/// Crash reset: SIGKILL the daemon, auto-start a fresh one, observe a
/// clean slate with the old child still alive as an orphan.
#[tokio::test]
#[serial]
async fn crash_resets_state_and_orphans_children() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::from_dir(tmp.path());

    // The forked daemon inherits these from the test process.
    std::env::set_var("GOB_RUNTIME_DIR", tmp.path());
    std::env::set_var("GOB_DAEMON_BINARY", gobd_binary());
    std::env::set_var("GOB_STOP_TERM_GRACE_MS", STOP_TERM_GRACE_MS.to_string());

    let mut client = DaemonClient::connect_or_start_at(paths.clone()).await.unwrap();

    let reply = client
        .call(&Request::Add {
            command: vec!["sleep".into(), "300".into()],
            workdir: "/tmp".into(),
            env: Vec::new(),
            description: None,
        })
        .await
        .unwrap();
    let data: gob_daemon::protocol::AddData = reply.data_as().unwrap();
    let child_pid = data.job.pid.unwrap();
    assert_eq!(list_jobs(&mut client).await.len(), 1);

    // Crash the daemon outright.
    let daemon_pid: u32 = std::fs::read_to_string(paths.pid_path())
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(daemon_pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
    // Wait for the process to be reaped enough that the socket is dead.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The next client call auto-starts a fresh daemon with empty state.
    let mut client = DaemonClient::connect_or_start_at(paths.clone()).await.unwrap();
    assert!(list_jobs(&mut client).await.is_empty());

    // The previous daemon's child survived as an orphan and is invisible
    // to the new daemon.
    assert!(process_alive(child_pid));

    // Clean up: the orphan and the fresh daemon.
    let _ = nix::sys::signal::killpg(
        nix::unistd::Pid::from_raw(child_pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
    let _ = client.call(&Request::Nuke { workdir: None }).await;

    std::env::remove_var("GOB_RUNTIME_DIR");
    std::env::remove_var("GOB_DAEMON_BINARY");
    std::env::remove_var("GOB_STOP_TERM_GRACE_MS");
}

/// Concurrent auto-start: both clients end up talking to one daemon.
#[tokio::test]
#[serial]
async fn concurrent_auto_start_converges_on_one_daemon() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::from_dir(tmp.path());

    std::env::set_var("GOB_RUNTIME_DIR", tmp.path());
    std::env::set_var("GOB_DAEMON_BINARY", gobd_binary());

    let (a, b) = tokio::join!(
        DaemonClient::connect_or_start_at(paths.clone()),
        DaemonClient::connect_or_start_at(paths.clone()),
    );
    let mut a = a.unwrap();
    let mut b = b.unwrap();

    // One daemon serves both: a job added through A is visible to B.
    a.call(&Request::Add {
        command: vec!["sleep".into(), "300".into()],
        workdir: "/tmp".into(),
        env: Vec::new(),
        description: None,
    })
    .await
    .unwrap();
    assert_eq!(list_jobs(&mut b).await.len(), 1);

    let _ = a.call(&Request::Nuke { workdir: None }).await;

    std::env::remove_var("GOB_RUNTIME_DIR");
    std::env::remove_var("GOB_DAEMON_BINARY");
}

/// The shim surfaces an actionable error when the daemon cannot start.
#[tokio::test]
#[serial]
async fn failed_auto_start_reports_the_daemon_log() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::from_dir(tmp.path());

    // Point the shim at a binary that exits immediately without binding.
    std::env::set_var("GOB_DAEMON_BINARY", "/bin/false");
    std::env::set_var("GOB_TIMEOUT_CONNECT_MS", "300");

    let err = DaemonClient::connect_or_start_at(paths).await.unwrap_err();
    match err {
        gob_client::ClientError::DaemonStartFailed(_)
        | gob_client::ClientError::DaemonStartTimeout => {}
        other => panic!("expected start failure, got {other:?}"),
    }

    std::env::remove_var("GOB_DAEMON_BINARY");
    std::env::remove_var("GOB_TIMEOUT_CONNECT_MS");
}
