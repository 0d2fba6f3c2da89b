#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use svcmgr::{
    conflict::{HostProbe, PortBlocker},
    registry::Registry,
    supervisor::Supervisor,
};

/// Probe with canned answers for deterministic conflict behavior.
#[derive(Default)]
pub struct StubProbe {
    pub blockers: Vec<PortBlocker>,
    pub duplicates: Vec<u32>,
    pub ports: BTreeSet<u16>,
}

impl HostProbe for StubProbe {
    fn port_blockers(&self, _port: u16) -> Vec<PortBlocker> {
        self.blockers.clone()
    }

    fn duplicate_pids(&self, _command: &str) -> Vec<u32> {
        self.duplicates.clone()
    }

    fn listening_ports(&self, _pid: u32) -> BTreeSet<u16> {
        self.ports.clone()
    }
}

/// Builds a supervisor over a scratch registry populated with `services`,
/// using a quiet stub probe so host tools never interfere.
pub fn supervisor_in(dir: &Path, services: &[(&str, &str)]) -> Supervisor {
    let mut registry = Registry::load(dir.join("services.json")).unwrap();
    for (name, command) in services {
        registry.add(name, command).unwrap();
    }
    Supervisor::new(registry, Box::new(StubProbe::default()))
}

/// True while `pid` exists (including zombies).
pub fn is_process_alive(pid: u32) -> bool {
    let target = nix::unistd::Pid::from_raw(pid as i32);
    !matches!(
        nix::sys::signal::kill(target, None),
        Err(nix::errno::Errno::ESRCH)
    )
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}
