#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    net::TcpListener,
    time::{Duration, Instant},
};

use common::wait_until;
use svcmgr::conflict::{HostProbe, SystemProbe, extract_port};
use tempfile::tempdir;

#[test]
fn duplicate_pids_finds_a_running_script_by_basename() {
    let temp = tempdir().unwrap();
    let script = temp.path().join("svcmgr_dup_probe.sh");
    fs::write(&script, "sleep 30\n").unwrap();

    let command = format!("sh {}", script.display());
    let mut child = std::process::Command::new("sh")
        .arg(script.as_os_str())
        .spawn()
        .unwrap();

    let probe = SystemProbe;
    let found = wait_until(Duration::from_secs(5), || {
        probe.duplicate_pids(&command).contains(&child.id())
    });

    let _ = child.kill();
    let _ = child.wait();

    assert!(found, "duplicate scan should match the script basename");
}

#[test]
fn duplicate_pids_ignores_commands_nothing_is_running() {
    let probe = SystemProbe;
    let pids = probe.duplicate_pids("definitely_not_a_real_binary_7b3f1 --flag");
    assert!(pids.is_empty());
}

#[test]
fn port_blockers_fails_open_and_stays_bounded() {
    // Whether or not lsof exists on this host, the query must return inside
    // the probe timeout and report our own listener at most.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let probe = SystemProbe;
    let begun = Instant::now();
    let blockers = probe.port_blockers(port);
    assert!(begun.elapsed() < Duration::from_secs(5));

    for blocker in &blockers {
        assert_eq!(blocker.pid, std::process::id());
    }
}

#[test]
fn port_blockers_reports_nothing_for_a_free_port() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let probe = SystemProbe;
    assert!(probe.port_blockers(port).is_empty());
}

#[test]
fn listening_ports_is_empty_or_contains_the_bound_port() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let probe = SystemProbe;
    let ports = probe.listening_ports(std::process::id());

    // Fail-open contract: with lsof absent the set is empty, otherwise it
    // must include the port this test holds open.
    assert!(ports.is_empty() || ports.contains(&port));
}

#[test]
fn extract_port_spec_examples() {
    assert_eq!(extract_port("talkito --mcp-server --port=8000"), Some(8000));
    assert_eq!(extract_port("run -p 9090 --verbose"), Some(9090));
    assert_eq!(extract_port("noport here"), None);
}
