//! Test helpers for behavioral specifications.
//!
//! Provides a harness that runs the real daemon against a throwaway
//! runtime directory and a line-framed protocol client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

// Aggressive stop-escalation timeouts for fast tests.
pub const STOP_TERM_GRACE_MS: u64 = 600;
pub const STOP_KILL_GRACE_MS: u64 = 400;
pub const STOP_POLL_MS: u64 = 25;

/// How long to wait for the daemon socket to accept connections.
const STARTUP_WAIT: Duration = Duration::from_secs(3);

/// Returns the path to a workspace binary.
///
/// The test binary lives at `target/debug/deps/specs-<hash>`, so its
/// grandparent is `target/debug/` where `gobd` is built.
pub fn gobd_binary() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let debug_dir = exe.parent().and_then(|d| d.parent()).unwrap();
    let path = debug_dir.join("gobd");
    assert!(
        path.exists(),
        "gobd binary not found at {}; build the workspace first",
        path.display()
    );
    path
}

/// A running daemon with an isolated runtime directory.
pub struct Daemon {
    dir: tempfile::TempDir,
    child: Child,
}

impl Daemon {
    /// Spawn `gobd` against a fresh runtime dir and wait for its socket.
    pub fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let child = Self::spawn_gobd(dir.path());
        let daemon = Self { dir, child };
        daemon.wait_for_socket();
        daemon
    }

    pub fn spawn_gobd(runtime_dir: &Path) -> Child {
        Command::new(gobd_binary())
            .env("GOB_RUNTIME_DIR", runtime_dir)
            .env("GOB_STOP_TERM_GRACE_MS", STOP_TERM_GRACE_MS.to_string())
            .env("GOB_STOP_KILL_GRACE_MS", STOP_KILL_GRACE_MS.to_string())
            .env("GOB_STOP_POLL_MS", STOP_POLL_MS.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    pub fn runtime_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("daemon.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.path().join("daemon.pid")
    }

    pub fn daemon_pid(&self) -> u32 {
        self.child.id()
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + STARTUP_WAIT;
        while Instant::now() < deadline {
            if UnixStream::connect(self.socket_path()).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let log = std::fs::read_to_string(self.dir.path().join("daemon.log"))
            .unwrap_or_else(|_| "<no daemon.log>".to_string());
        panic!("daemon did not come up; log:\n{log}");
    }

    /// Open a protocol connection.
    pub fn connect(&self) -> Conn {
        Conn::open(&self.socket_path())
    }

    /// Send the daemon a Unix signal.
    pub fn signal(&self, signal: nix::sys::signal::Signal) {
        let pid = nix::unistd::Pid::from_raw(self.child.id() as i32);
        let _ = nix::sys::signal::kill(pid, signal);
    }

    /// SIGKILL the daemon, simulating a crash.
    pub fn kill_hard(&mut self) {
        self.signal(nix::sys::signal::Signal::SIGKILL);
        let _ = self.child.wait();
    }

    /// Wait for the daemon process to exit on its own.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            // Best-effort nuke to reap children the test left running,
            // then kill the daemon itself. Never panics in drop.
            if let Ok(mut stream) = UnixStream::connect(self.socket_path()) {
                let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
                let _ = stream.write_all(b"{\"type\":\"nuke\",\"payload\":{}}\n");
                let mut line = String::new();
                let _ = BufReader::new(stream).read_line(&mut line);
            }
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Line-framed JSON protocol connection.
pub struct Conn {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Conn {
    pub fn open(socket_path: &Path) -> Self {
        let stream = UnixStream::connect(socket_path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self {
            reader,
            writer: stream,
        }
    }

    pub fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).unwrap();
    }

    /// Read one frame; panics on EOF or timeout.
    pub fn read_frame(&mut self) -> Value {
        self.try_read_frame()
            .expect("connection closed while waiting for a frame")
    }

    /// Read one frame; `None` on EOF or timeout.
    pub fn try_read_frame(&mut self) -> Option<Value> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(serde_json::from_str(&line).expect("malformed frame")),
            Err(_) => None,
        }
    }

    pub fn request(&mut self, frame: Value) -> Value {
        self.send(frame);
        self.read_frame()
    }

    /// Issue a request and assert the reply envelope reports success.
    pub fn expect_success(&mut self, frame: Value) -> Value {
        let reply = self.request(frame);
        assert_eq!(
            reply["success"], true,
            "request failed: {}",
            reply["error"]
        );
        reply["data"].clone()
    }

    /// Raise the read timeout (stop escalation replies take a while).
    pub fn slow_reads(&mut self) {
        self.writer
            .set_read_timeout(Some(Duration::from_secs(15)))
            .unwrap();
    }

    /// Adjust the read timeout (e.g. when probing for event silence).
    pub fn set_short_timeout(&mut self, timeout: Duration) {
        self.writer.set_read_timeout(Some(timeout)).unwrap();
    }
}

/// Frame constructors for the common requests.
pub fn add(command: &[&str], workdir: &Path) -> Value {
    json!({
        "type": "add",
        "payload": {"command": command, "workdir": workdir, "env": []},
    })
}

pub fn subscribe(workdir: Option<&Path>) -> Value {
    match workdir {
        Some(dir) => json!({"type": "subscribe", "payload": {"workdir": dir}}),
        None => json!({"type": "subscribe", "payload": {}}),
    }
}

/// Wait until a predicate over a fresh `list` reply holds.
pub fn wait_for_list(daemon: &Daemon, predicate: impl Fn(&Value) -> bool) -> Value {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let mut conn = daemon.connect();
        let data = conn.expect_success(json!({"type": "list", "payload": {}}));
        if predicate(&data["jobs"]) {
            return data["jobs"].clone();
        }
        assert!(Instant::now() < deadline, "condition never held: {data}");
        std::thread::sleep(Duration::from_millis(25));
    }
}

/// Whether a process (group leader) is still alive.
pub fn process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
