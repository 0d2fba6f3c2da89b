#[path = "common/mod.rs"]
mod common;

use std::{
    collections::BTreeSet,
    fs, thread,
    time::{Duration, Instant},
};

use common::{StubProbe, is_process_alive, supervisor_in, wait_until};
use svcmgr::{conflict::PortBlocker, registry::Registry, supervisor::Supervisor};
use tempfile::tempdir;

#[test]
fn stop_escalation_kills_a_term_ignoring_child_within_bounds() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(
        temp.path(),
        &[("stubborn", "trap '' TERM; while true; do sleep 1; done")],
    );

    assert!(supervisor.start("stubborn"));
    let pid = supervisor.get_pid("stubborn").unwrap();
    assert!(is_process_alive(pid));

    let begun = Instant::now();
    assert!(supervisor.stop("stubborn"));
    let elapsed = begun.elapsed();

    // SIGTERM is ignored, so the stop must run the full 5s wait and then
    // escalate; the whole sequence stays inside the 5s + 3s budget.
    assert!(
        elapsed < Duration::from_secs(10),
        "stop took {elapsed:?}, longer than the escalation budget"
    );
    assert!(supervisor.get_pid("stubborn").is_none());
    assert!(supervisor.tracked().is_empty());
    assert!(wait_until(Duration::from_secs(2), || !is_process_alive(pid)));
}

#[test]
fn stop_signals_the_whole_process_group() {
    let temp = tempdir().unwrap();
    let pid_file = temp.path().join("grandchild.pid");
    let command = format!(
        "sleep 60 & echo $! > {}; wait",
        pid_file.display()
    );
    let supervisor = supervisor_in(temp.path(), &[("spawner", command.as_str())]);

    assert!(supervisor.start("spawner"));
    assert!(wait_until(Duration::from_secs(3), || pid_file.exists()));
    let grandchild: u32 = fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_process_alive(grandchild));

    assert!(supervisor.stop("spawner"));
    assert!(
        wait_until(Duration::from_secs(3), || !is_process_alive(grandchild)),
        "descendant survived a group stop"
    );
}

#[test]
fn repeated_stop_is_idempotent() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(temp.path(), &[("svc", "sleep 30")]);

    assert!(supervisor.start("svc"));
    assert!(supervisor.stop("svc"));
    assert!(supervisor.stop("svc"));
    assert!(supervisor.get_error("svc").is_none());
}

#[test]
fn port_conflict_prevents_spawn_entirely() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("spawned");
    let command = format!("touch {} && sleep 30 --port=8123", marker.display());

    let mut registry = Registry::load(temp.path().join("services.json")).unwrap();
    registry.add("web", &command).unwrap();
    let supervisor = Supervisor::new(
        registry,
        Box::new(StubProbe {
            blockers: vec![PortBlocker {
                pid: 31337,
                name: "nginx".to_string(),
            }],
            ..Default::default()
        }),
    );

    assert!(!supervisor.start("web"));
    assert_eq!(
        supervisor.get_error("web").unwrap(),
        "Port 8123 used by 31337(nginx)"
    );
    assert!(supervisor.tracked().is_empty());

    thread::sleep(Duration::from_millis(200));
    assert!(!marker.exists(), "child was spawned despite a port conflict");
}

#[test]
fn launch_failure_reports_exit_code_and_captured_stderr() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(
        temp.path(),
        &[("broken", "echo 'missing config' >&2; exit 12")],
    );

    assert!(!supervisor.start("broken"));
    let message = supervisor.get_error("broken").unwrap();
    assert!(message.starts_with("Exit code 12"), "got: {message}");
    assert!(message.contains("missing config"), "got: {message}");
}

#[test]
fn restart_succeeds_even_after_the_service_already_died() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(temp.path(), &[("svc", "sleep 30")]);

    assert!(supervisor.start("svc"));
    let pid = supervisor.get_pid("svc").unwrap();

    // Kill it behind the supervisor's back; restart must still work.
    let target = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(target, nix::sys::signal::SIGKILL).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !is_process_alive(pid)));

    assert!(supervisor.restart("svc"));
    let replacement = supervisor.get_pid("svc").unwrap();
    assert_ne!(pid, replacement);

    supervisor.stop("svc");
}

#[test]
fn stop_all_clears_every_tracked_service() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(
        temp.path(),
        &[("one", "sleep 30"), ("two", "sleep 30")],
    );

    assert!(supervisor.start("one"));
    assert!(supervisor.start("two"));
    let pids: Vec<u32> = ["one", "two"]
        .iter()
        .map(|n| supervisor.get_pid(n).unwrap())
        .collect();

    supervisor.stop_all();

    assert!(supervisor.tracked().is_empty());
    for pid in pids {
        assert!(wait_until(Duration::from_secs(2), || !is_process_alive(pid)));
    }
}

#[test]
fn is_running_reports_exit_code_of_a_self_terminated_service() {
    let temp = tempdir().unwrap();
    let supervisor = supervisor_in(temp.path(), &[("flaky", "sleep 1.2; exit 9")]);

    assert!(supervisor.start("flaky"));
    assert!(supervisor.is_running("flaky"));

    assert!(wait_until(Duration::from_secs(3), || {
        !supervisor.is_running("flaky")
    }));
    assert_eq!(
        supervisor.get_error("flaky").unwrap(),
        "Process exited with code 9"
    );
}

#[test]
fn listening_ports_reflect_the_probe_only_while_running() {
    let temp = tempdir().unwrap();
    let mut registry = Registry::load(temp.path().join("services.json")).unwrap();
    registry.add("web", "sleep 30").unwrap();
    let supervisor = Supervisor::new(
        registry,
        Box::new(StubProbe {
            ports: BTreeSet::from([8080, 8443]),
            ..Default::default()
        }),
    );

    assert!(supervisor.listening_ports("web").is_empty());

    assert!(supervisor.start("web"));
    assert_eq!(
        supervisor.listening_ports("web"),
        BTreeSet::from([8080, 8443])
    );

    assert!(supervisor.stop("web"));
    assert!(supervisor.listening_ports("web").is_empty());
}

#[test]
fn operations_on_distinct_names_proceed_in_parallel() {
    let temp = tempdir().unwrap();
    let supervisor = std::sync::Arc::new(supervisor_in(
        temp.path(),
        &[("a", "sleep 30"), ("b", "sleep 30"), ("c", "sleep 30")],
    ));

    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            let supervisor = std::sync::Arc::clone(&supervisor);
            let name = name.to_string();
            thread::spawn(move || supervisor.start(&name))
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(supervisor.tracked().len(), 3);

    supervisor.stop_all();
}
