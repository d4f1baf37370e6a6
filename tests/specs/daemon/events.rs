//! Subscription and broadcast specs.

use crate::prelude::*;
use serde_json::json;
use std::time::Duration;

#[test]
fn subscriber_with_workdir_filter_sees_only_its_dir() {
    let daemon = Daemon::start();

    let mut filtered = daemon.connect();
    let reply = filtered.request(subscribe(Some("/a".as_ref())));
    assert_eq!(reply["success"], true);

    let mut actor = daemon.connect();
    actor.expect_success(add(&["sleep", "300"], "/b".as_ref()));

    // Nothing for /b on the /a subscription.
    filtered.set_short_timeout(Duration::from_millis(200));
    assert!(filtered.try_read_frame().is_none());
    filtered.set_short_timeout(Duration::from_secs(5));

    let added = actor.expect_success(add(&["sleep", "301"], "/a".as_ref()));

    let event = filtered.read_frame();
    assert_eq!(event["type"], "job_added");
    assert_eq!(event["job_id"], added["job"]["id"]);
    assert_eq!(event["job"]["workdir"], "/a");
}

#[test]
fn events_arrive_in_emission_order_per_subscriber() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    let mut actor = daemon.connect();
    let data = actor.expect_success(add(&["sh", "-c", "exit 7"], "/tmp".as_ref()));
    let job_id = data["job"]["id"].as_str().unwrap();

    // job_added → run_started → job_stopped → run_stopped, all for the
    // same job, in exactly that order.
    let kinds: Vec<String> = (0..4)
        .map(|_| {
            let event = subscriber.read_frame();
            assert_eq!(event["job_id"], job_id);
            event["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["job_added", "run_started", "job_stopped", "run_stopped"]
    );
}

#[test]
fn job_stopped_carries_run_stats_and_cleared_ports() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    let mut actor = daemon.connect();
    actor.expect_success(add(&["sh", "-c", "exit 0"], "/tmp".as_ref()));

    loop {
        let event = subscriber.read_frame();
        if event["type"] == "job_stopped" {
            assert_eq!(event["run"]["status"], "stopped");
            assert_eq!(event["run"]["exit_code"], 0);
            assert_eq!(event["stats"]["run_count"], 1);
            assert_eq!(event["ports"], json!([]));
            assert_eq!(event["job"]["status"], "stopped");
            assert_eq!(event["job_count"], 1);
            break;
        }
    }
}

#[test]
fn subscriber_connection_stops_serving_requests() {
    let daemon = Daemon::start();

    let mut subscriber = daemon.connect();
    subscriber.request(subscribe(None));

    // Frames after subscribe are not read as requests; no reply comes
    // back (only events would).
    subscriber.send(json!({"type": "ping", "payload": {}}));
    subscriber.set_short_timeout(Duration::from_millis(200));
    assert!(subscriber.try_read_frame().is_none());
}
