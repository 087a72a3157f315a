//! End-to-end tests: a real server on real FIFOs, driven by the client API.

use ems::client::{Client, ClientError};
use ems::server::{self, ServerConfig};
use ems::store::EventStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Start a server on a control pipe inside its own scratch dir and wait for
/// the pipe to appear. The server thread runs until the test process exits.
fn start_server(workers: usize) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let control = dir.path().join("ctl.pipe");

    let config = ServerConfig {
        control_pipe: control.clone(),
        workers,
    };
    let store = Arc::new(EventStore::new(Duration::ZERO));
    std::thread::spawn(move || {
        let _ = server::serve(&config, store);
    });

    for _ in 0..200 {
        if control.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(control.exists(), "server never created its control pipe");
    (dir, control)
}

/// Short session pipe paths in /tmp: the wire format caps paths at 40 bytes,
/// which a nested tempdir path could overrun.
fn session_pipes(tag: &str) -> (PathBuf, PathBuf) {
    let pid = std::process::id();
    (
        PathBuf::from(format!("/tmp/ems-t{}-{}-rq", pid, tag)),
        PathBuf::from(format!("/tmp/ems-t{}-{}-rs", pid, tag)),
    )
}

#[test]
fn session_round_trip() {
    let (_dir, control) = start_server(2);
    let (req, resp) = session_pipes("rt");

    let mut client = Client::setup(&req, &resp, &control).unwrap();
    assert!(client.session_id() >= 0);

    client.create(1, 2, 2).unwrap();

    let mut shown = Vec::new();
    client.show(1, &mut shown).unwrap();
    assert_eq!(String::from_utf8(shown).unwrap(), "0 0\n0 0\n");

    client.reserve(1, &[(1, 1), (2, 2)]).unwrap();

    let mut shown = Vec::new();
    client.show(1, &mut shown).unwrap();
    assert_eq!(String::from_utf8(shown).unwrap(), "1 0\n0 1\n");

    let mut listed = Vec::new();
    client.list_events(&mut listed).unwrap();
    assert_eq!(String::from_utf8(listed).unwrap(), "Event: 1\n");

    client.quit().unwrap();

    // Both pipe objects disappear once the session is torn down.
    for _ in 0..200 {
        if !req.exists() && !resp.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!req.exists(), "request pipe should be removed after quit");
    assert!(!resp.exists(), "response pipe should be removed after quit");
}

#[test]
fn worker_returns_to_pool_after_quit() {
    let (_dir, control) = start_server(1);

    // With a single worker, a second session can only succeed if the worker
    // came back to the pool after the first quit.
    for round in 0..3 {
        let (req, resp) = session_pipes(&format!("pool{}", round));
        let mut client = Client::setup(&req, &resp, &control).unwrap();
        assert_eq!(client.session_id(), 1);
        client.create(round + 10, 1, 1).unwrap();
        client.quit().unwrap();
    }
}

#[test]
fn rejection_keeps_session_alive() {
    let (_dir, control) = start_server(2);
    let (req, resp) = session_pipes("rej");

    let mut client = Client::setup(&req, &resp, &control).unwrap();
    client.create(5, 2, 2).unwrap();

    // Duplicate create is refused with a return code, not a dropped session.
    match client.create(5, 3, 3) {
        Err(ClientError::Rejected(code)) => assert_ne!(code, 0),
        other => panic!("expected rejection, got {:?}", other),
    }

    // Same for a bad reservation.
    match client.reserve(5, &[(9, 9)]) {
        Err(ClientError::Rejected(_)) => {}
        other => panic!("expected rejection, got {:?}", other),
    }
    match client.show(99, &mut Vec::new()) {
        Err(ClientError::Rejected(_)) => {}
        other => panic!("expected rejection, got {:?}", other),
    }

    // The session still works afterwards.
    client.reserve(5, &[(1, 1)]).unwrap();
    let mut shown = Vec::new();
    client.show(5, &mut shown).unwrap();
    assert_eq!(String::from_utf8(shown).unwrap(), "1 0\n0 0\n");

    client.quit().unwrap();
}

#[test]
fn two_concurrent_sessions_make_progress() {
    let (_dir, control) = start_server(2);

    let mut handles = Vec::new();
    for n in 0u32..2 {
        let control = control.clone();
        handles.push(std::thread::spawn(move || {
            let (req, resp) = session_pipes(&format!("cc{}", n));
            let mut client = Client::setup(&req, &resp, &control).unwrap();

            // Each session drives its own event; its command order must hold
            // end-to-end regardless of the other session.
            let event_id = 100 + n;
            client.create(event_id, 2, 2).unwrap();
            client.reserve(event_id, &[(1, 1)]).unwrap();
            client.reserve(event_id, &[(2, 2)]).unwrap();

            let mut shown = Vec::new();
            client.show(event_id, &mut shown).unwrap();
            assert_eq!(String::from_utf8(shown).unwrap(), "1 0\n0 2\n");

            client.quit().unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn sessions_queue_when_all_workers_busy() {
    let (_dir, control) = start_server(1);

    let (req_a, resp_a) = session_pipes("qa");
    let mut first = Client::setup(&req_a, &resp_a, &control).unwrap();
    first.create(200, 1, 1).unwrap();

    // Second client connects while the only worker is occupied; its setup
    // parks until the first session quits.
    let control_b = control.clone();
    let second = std::thread::spawn(move || {
        let (req_b, resp_b) = session_pipes("qb");
        let mut client = Client::setup(&req_b, &resp_b, &control_b).unwrap();
        let mut listed = Vec::new();
        client.list_events(&mut listed).unwrap();
        client.quit().unwrap();
        String::from_utf8(listed).unwrap()
    });

    std::thread::sleep(Duration::from_millis(100));
    first.quit().unwrap();

    let listed = second.join().unwrap();
    assert_eq!(listed, "Event: 200\n");
}
