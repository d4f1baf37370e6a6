//! Job lifecycle specs: add, stop escalation, remove, cleanup, stats.

use crate::prelude::*;
use serde_json::json;
use std::time::{Duration, Instant};

#[test]
fn add_then_ping_and_list() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let reply = conn.request(json!({"type": "ping", "payload": {}}));
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"], "pong");

    let data = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    let job = &data["job"];
    assert_eq!(job["status"], "running");
    let id = job["id"].as_str().unwrap();
    assert_eq!(id.len(), 3);
    assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    assert!(job["pid"].as_u64().unwrap() > 0);

    let data = conn.expect_success(json!({"type": "list", "payload": {"workdir": "/tmp"}}));
    let jobs = data["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], id);
}

#[test]
fn idempotent_add_reports_already_running() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let first = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    let second = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));

    assert_eq!(second["already_running"], true);
    assert_eq!(second["job"]["id"], first["job"]["id"]);
}

#[test]
fn stop_escalates_to_sigkill_for_a_term_proof_child() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.slow_reads();
    let reply = subscriber.request(subscribe(None));
    assert_eq!(reply["success"], true);

    let mut conn = daemon.connect();
    conn.slow_reads();
    let data = conn.expect_success(add(
        &["sh", "-c", "trap '' TERM; sleep 60"],
        "/tmp".as_ref(),
    ));
    let job_id = data["job"]["id"].as_str().unwrap().to_string();

    // Drain the add events before timing the stop.
    assert_eq!(subscriber.read_frame()["type"], "job_added");
    assert_eq!(subscriber.read_frame()["type"], "run_started");

    let started = Instant::now();
    let data = conn.expect_success(json!({
        "type": "stop",
        "payload": {"job_id": &job_id, "force": false},
    }));
    let elapsed = started.elapsed();
    assert!(data["pid"].as_u64().unwrap() > 0);
    // The TERM window must pass before the KILL escalation lands.
    assert!(
        elapsed >= Duration::from_millis(STOP_TERM_GRACE_MS),
        "stop returned during the TERM grace ({elapsed:?})"
    );

    let stopped = subscriber.read_frame();
    assert_eq!(stopped["type"], "job_stopped");
    // Killed by signal: exit_code stays unset.
    assert!(stopped["run"].get("exit_code").is_none());
}

#[test]
fn remove_refuses_running_then_succeeds() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();
    conn.slow_reads();

    let data = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    let job_id = data["job"]["id"].as_str().unwrap().to_string();
    let stdout_log = daemon.runtime_dir().join(format!("{job_id}-1.stdout.log"));
    let stderr_log = daemon.runtime_dir().join(format!("{job_id}-1.stderr.log"));
    assert!(stdout_log.exists());
    assert!(stderr_log.exists());

    let reply = conn.request(json!({"type": "remove", "payload": {"job_id": &job_id}}));
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("running"));

    // sleep(1) dies on plain TERM.
    conn.expect_success(json!({"type": "stop", "payload": {"job_id": &job_id, "force": false}}));

    conn.expect_success(json!({"type": "remove", "payload": {"job_id": &job_id}}));
    assert!(!stdout_log.exists());
    assert!(!stderr_log.exists());

    let data = conn.expect_success(json!({"type": "list", "payload": {}}));
    assert!(data["jobs"].as_array().unwrap().is_empty());
}

#[test]
fn finished_runs_feed_stats_and_runs_queries() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    let mut conn = daemon.connect();
    let data = conn.expect_success(add(&["sh", "-c", "exit 0"], "/tmp".as_ref()));
    let job_id = data["job"]["id"].as_str().unwrap().to_string();

    // Wait for the run to finish.
    loop {
        let event = subscriber.read_frame();
        if event["type"] == "job_stopped" {
            assert_eq!(event["run"]["exit_code"], 0);
            break;
        }
    }

    let data = conn.expect_success(json!({"type": "stats", "payload": {"job_id": &job_id}}));
    assert_eq!(data["stats"]["run_count"], 1);
    assert_eq!(data["stats"]["success_count"], 1);
    assert_eq!(data["stats"]["success_rate"], 1.0);

    let data = conn.expect_success(json!({"type": "runs", "payload": {"job_id": &job_id}}));
    let runs = data["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "stopped");
    assert_eq!(runs[0]["exit_code"], 0);
    assert_eq!(runs[0]["id"], format!("{job_id}-1"));
}

#[test]
fn create_registers_without_starting_and_is_idempotent() {
    let daemon = Daemon::start();
    let mut conn = daemon.connect();

    let frame = |desc: &str| {
        json!({
            "type": "create",
            "payload": {
                "command": ["echo", "hello"],
                "workdir": "/tmp",
                "env": [],
                "description": desc,
            },
        })
    };

    let first = conn.expect_success(frame("initial"));
    assert_eq!(first["job"]["status"], "stopped");
    assert!(first["job"]["pid"].is_null());
    let id = first["job"]["id"].as_str().unwrap().to_string();

    let second = conn.expect_success(frame("updated"));
    assert_eq!(second["job"]["id"], id.as_str());
    assert_eq!(second["job"]["description"], "updated");
    assert_eq!(second["outcome"], "already_exists");
}

#[test]
fn cleanup_reports_the_removed_count() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    let mut conn = daemon.connect();
    conn.expect_success(add(&["sh", "-c", "exit 0"], "/tmp".as_ref()));
    conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));

    // Wait for the short job to stop.
    loop {
        if subscriber.read_frame()["type"] == "job_stopped" {
            break;
        }
    }

    let data = conn.expect_success(json!({"type": "cleanup", "payload": {}}));
    assert_eq!(data["removed_count"], 1);

    // The running job survives cleanup.
    let data = conn.expect_success(json!({"type": "list", "payload": {}}));
    assert_eq!(data["jobs"].as_array().unwrap().len(), 1);
}

#[test]
fn unfiltered_nuke_resets_and_exits_the_daemon() {
    let mut daemon = Daemon::start();
    let mut conn = daemon.connect();
    conn.slow_reads();

    conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    conn.expect_success(add(&["sleep", "301"], "/tmp".as_ref()));

    let data = conn.expect_success(json!({"type": "nuke", "payload": {}}));
    assert_eq!(data["stopped"], 2);
    assert_eq!(data["removed"], 2);
    assert_eq!(data["logs_deleted"], 4);

    // Full reset: after the reply, the daemon exits and cleans up.
    assert!(daemon.wait_for_exit(Duration::from_secs(3)));
    assert!(!daemon.socket_path().exists());
    assert!(!daemon.pid_path().exists());

    // No run logs remain in the runtime directory.
    let leftover_logs: Vec<_> = std::fs::read_dir(daemon.runtime_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".stdout.log") || name.ends_with(".stderr.log"))
        .collect();
    assert!(leftover_logs.is_empty(), "leftover logs: {leftover_logs:?}");
}

#[test]
fn signal_delivers_to_the_process_group() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    let mut conn = daemon.connect();
    let data = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    let job_id = data["job"]["id"].as_str().unwrap().to_string();

    // SIGTERM via the signal operation; sleep dies.
    let data = conn.expect_success(json!({
        "type": "signal",
        "payload": {"job_id": &job_id, "signum": 15},
    }));
    assert!(data["pid"].as_u64().unwrap() > 0);

    loop {
        let event = subscriber.read_frame();
        if event["type"] == "job_stopped" {
            assert!(event["run"].get("exit_code").is_none());
            break;
        }
    }

    // Signaling the now-stopped job is a state conflict.
    let reply = conn.request(json!({
        "type": "signal",
        "payload": {"job_id": &job_id, "signum": 15},
    }));
    assert_eq!(reply["success"], false);
}
