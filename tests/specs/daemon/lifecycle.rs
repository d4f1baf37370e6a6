//! Daemon lifecycle specs: single instance, stale files, shutdown.

use crate::prelude::*;
use std::time::Duration;

#[test]
fn second_daemon_in_the_same_runtime_dir_exits() {
    let daemon = Daemon::start();

    let output = std::process::Command::new(gobd_binary())
        .env("GOB_RUNTIME_DIR", daemon.runtime_dir())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already running"), "stderr: {stderr}");

    // The winner is untouched.
    let mut conn = daemon.connect();
    let reply = conn.request(serde_json::json!({"type": "ping", "payload": {}}));
    assert_eq!(reply["success"], true);
}

#[test]
fn stale_files_from_a_crashed_daemon_are_recovered() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path()).unwrap();
    // Leftovers: a dead pid and an unbound socket file.
    std::fs::write(tmp.path().join("daemon.pid"), "999999999\n").unwrap();
    drop(std::os::unix::net::UnixListener::bind(tmp.path().join("daemon.sock")).unwrap());

    let mut child = Daemon::spawn_gobd(tmp.path());
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    let socket = tmp.path().join("daemon.sock");
    let connected = loop {
        if std::os::unix::net::UnixStream::connect(&socket).is_ok() {
            break true;
        }
        if std::time::Instant::now() >= deadline {
            break false;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert!(connected, "daemon did not recover from stale files");

    let pid: u32 = std::fs::read_to_string(tmp.path().join("daemon.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(pid, child.id());

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn sigterm_shuts_down_cleanly_and_leaves_children_as_orphans() {
    let mut daemon = Daemon::start();
    let mut conn = daemon.connect();

    let data = conn.expect_success(add(&["sleep", "300"], "/tmp".as_ref()));
    let child_pid = data["job"]["pid"].as_u64().unwrap() as u32;

    daemon.signal(nix::sys::signal::Signal::SIGTERM);
    assert!(daemon.wait_for_exit(Duration::from_secs(3)));

    // Socket and pid file are gone; the managed child was left alive.
    assert!(!daemon.socket_path().exists());
    assert!(!daemon.pid_path().exists());
    assert!(process_alive(child_pid), "child should survive daemon exit");

    // Reap the orphan.
    let _ = nix::sys::signal::killpg(
        nix::unistd::Pid::from_raw(child_pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
}

#[test]
fn version_flag_reports_and_exits() {
    let output = std::process::Command::new(gobd_binary())
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("gobd "));

    let output = std::process::Command::new(gobd_binary())
        .arg("--bogus")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
