//! The service-process supervisor.
//!
//! Owns the mapping from service name to live OS process. Every start runs
//! the preflight conflict checks, launches the command detached in its own
//! process group, and watches a short grace window for immediate failures;
//! every stop escalates from SIGTERM to SIGKILL against the whole group.
//! `is_running` doubles as the reconciliation point for processes that exited
//! outside the supervisor's control.
//!
//! Externally-facing operations report success as a boolean and leave the
//! failure description in the per-service error state, so a misbehaving child
//! or missing host tool can never crash the caller.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};
use tracing::{debug, info, warn};

use crate::{
    conflict::{HostProbe, SystemProbe, extract_port},
    constants::{
        CAPTURE_TAIL_BYTES, RESTART_PAUSE, START_GRACE_PERIOD, STOP_KILL_WAIT,
        STOP_TERM_WAIT,
    },
    error::{RegistryError, ServiceError},
    registry::{Registry, ServiceDefinition},
    spawn::{self, CaptureFiles},
};

/// Live handle for a tracked service process. Exists only while the process
/// is believed running.
#[derive(Debug)]
struct ManagedProcess {
    child: std::process::Child,
    /// Process group id; equals the child PID because of `setpgid(0, 0)`.
    pgid: i32,
}

/// Manages service processes: starts, stops, restarts, and reconciles them.
pub struct Supervisor {
    /// Durable service definitions.
    registry: Mutex<Registry>,
    /// Live-process table keyed by service name.
    processes: Mutex<HashMap<String, ManagedProcess>>,
    /// Last known failure per service name.
    errors: Mutex<HashMap<String, ServiceError>>,
    /// Per-name operation locks; same-name operations serialize, distinct
    /// names proceed in parallel.
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Host introspection used by the preflight checks.
    probe: Box<dyn HostProbe>,
}

/// Recovers a guard from a poisoned mutex. The tables stay consistent across
/// a panicking operation because entries are removed before any fallible
/// work touches them.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Supervisor {
    /// Creates a supervisor over `registry` with a custom host probe.
    pub fn new(registry: Registry, probe: Box<dyn HostProbe>) -> Self {
        Self {
            registry: Mutex::new(registry),
            processes: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            probe,
        }
    }

    /// Creates a supervisor backed by the real host tools.
    pub fn with_system_probe(registry: Registry) -> Self {
        Self::new(registry, Box::new(SystemProbe))
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.name_locks);
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Starts a service by name. Idempotent: a service that is already
    /// tracked and alive succeeds immediately without a second launch.
    pub fn start(&self, name: &str) -> bool {
        let guard = self.name_lock(name);
        let _held = lock(&guard);
        self.start_locked(name)
    }

    fn start_locked(&self, name: &str) -> bool {
        {
            let mut processes = lock(&self.processes);
            if let Some(managed) = processes.get_mut(name) {
                match managed.child.try_wait() {
                    Ok(None) => {
                        debug!("Service '{name}' already running; start is a no-op");
                        return true;
                    }
                    _ => {
                        // Stale handle from an unnoticed exit.
                        processes.remove(name);
                    }
                }
            }
        }

        let Some(definition) = self.definition(name) else {
            lock(&self.errors).insert(name.to_string(), ServiceError::ServiceNotFound);
            return false;
        };

        lock(&self.errors).remove(name);

        let port = extract_port(&definition.command);
        if let Some(port) = port {
            let blockers = self.probe.port_blockers(port);
            if !blockers.is_empty() {
                warn!("Refusing to start '{name}': port {port} already in use");
                lock(&self.errors).insert(
                    name.to_string(),
                    ServiceError::PortConflict { port, blockers },
                );
                return false;
            }
        }

        let duplicates = self.probe.duplicate_pids(&definition.command);
        if !duplicates.is_empty() {
            warn!("Refusing to start '{name}': matching process already running");
            lock(&self.errors).insert(
                name.to_string(),
                ServiceError::DuplicateProcess { pids: duplicates },
            );
            return false;
        }

        let (mut child, capture) = match spawn::launch(&definition.command) {
            Ok(launched) => launched,
            Err(err) => {
                lock(&self.errors)
                    .insert(name.to_string(), ServiceError::SpawnFailure(err));
                return false;
            }
        };

        match spawn::wait_with_timeout(&mut child, START_GRACE_PERIOD) {
            Ok(Some(status)) => {
                let error = self.launch_failure(&definition.command, status, capture);
                warn!("Service '{name}' failed inside the grace window: {error}");
                lock(&self.errors).insert(name.to_string(), error);
                false
            }
            Ok(None) => {
                let pid = child.id();
                info!("Service '{name}' started with PID {pid}");
                lock(&self.processes).insert(
                    name.to_string(),
                    ManagedProcess {
                        child,
                        pgid: pid as i32,
                    },
                );
                true
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                lock(&self.errors)
                    .insert(name.to_string(), ServiceError::SpawnFailure(err));
                false
            }
        }
    }

    /// Builds the structured diagnostic for a child that died inside the
    /// grace window, re-running both conflict checks because the early exit
    /// may itself be the losing side of a port-bind race.
    fn launch_failure(
        &self,
        command: &str,
        status: std::process::ExitStatus,
        mut capture: CaptureFiles,
    ) -> ServiceError {
        let stderr_tail = spawn::read_tail(&mut capture.stderr, CAPTURE_TAIL_BYTES);
        let stdout_tail = spawn::read_tail(&mut capture.stdout, CAPTURE_TAIL_BYTES);
        let mut output = format!("{stderr_tail} {stdout_tail}").trim().to_string();
        if output.chars().count() > CAPTURE_TAIL_BYTES as usize {
            output = output.chars().take(CAPTURE_TAIL_BYTES as usize).collect();
        }

        let port_conflict = extract_port(command).and_then(|port| {
            let blockers = self.probe.port_blockers(port);
            (!blockers.is_empty()).then_some((port, blockers))
        });

        ServiceError::LaunchFailure {
            code: spawn::exit_code(status),
            output,
            port_conflict,
            duplicates: self.probe.duplicate_pids(command),
        }
    }

    /// Stops a service by name. Idempotent: an untracked or already-exited
    /// service succeeds trivially. The live handle is removed on every path.
    pub fn stop(&self, name: &str) -> bool {
        let guard = self.name_lock(name);
        let _held = lock(&guard);
        self.stop_locked(name)
    }

    fn stop_locked(&self, name: &str) -> bool {
        lock(&self.errors).remove(name);

        let Some(mut managed) = lock(&self.processes).remove(name) else {
            return true;
        };

        if let Ok(Some(status)) = managed.child.try_wait() {
            debug!("Service '{name}' had already exited with {status:?}");
            return true;
        }

        // Signal the whole group so descendants spawned by the service go
        // down with it.
        if let Err(err) = signal_group(managed.pgid, libc::SIGTERM) {
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!("Process group for '{name}' already gone");
                let _ = spawn::wait_with_timeout(&mut managed.child, STOP_KILL_WAIT);
                return true;
            }

            // Group delivery refused; fall back to the direct child before
            // giving up.
            let pid = nix::unistd::Pid::from_raw(managed.child.id() as i32);
            match nix::sys::signal::kill(pid, Some(nix::sys::signal::SIGTERM)) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(direct_err) => {
                    warn!("Failed to signal service '{name}': {direct_err}");
                    lock(&self.errors).insert(
                        name.to_string(),
                        ServiceError::SignalFailure(std::io::Error::from_raw_os_error(
                            direct_err as i32,
                        )),
                    );
                    // Bounded reap only; the child may be unkillable.
                    let _ = spawn::wait_with_timeout(&mut managed.child, STOP_KILL_WAIT);
                    return false;
                }
            }
        }

        match spawn::wait_with_timeout(&mut managed.child, STOP_TERM_WAIT) {
            Ok(Some(_)) => {}
            _ => {
                warn!("Service '{name}' ignored SIGTERM; sending SIGKILL to its group");
                let _ = signal_group(managed.pgid, libc::SIGKILL);
                let _ = spawn::wait_with_timeout(&mut managed.child, STOP_KILL_WAIT);
            }
        }

        debug!("Service '{name}' stopped");
        true
    }

    /// Restarts a service: stop, a short pause so the OS releases the port,
    /// then start. A failed stop does not prevent the start attempt.
    pub fn restart(&self, name: &str) -> bool {
        let guard = self.name_lock(name);
        let _held = lock(&guard);

        if !self.stop_locked(name) {
            warn!("Stop failed during restart of '{name}'; attempting start anyway");
        }
        thread::sleep(RESTART_PAUSE);
        self.start_locked(name)
    }

    /// Authoritative liveness check and reconciliation point: a tracked
    /// process found dead is removed from the table, and an unexpected-exit
    /// error is recorded unless a failure is already noted for the service.
    pub fn is_running(&self, name: &str) -> bool {
        let guard = self.name_lock(name);
        let _held = lock(&guard);

        let mut processes = lock(&self.processes);
        let Some(managed) = processes.get_mut(name) else {
            return false;
        };

        match managed.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                let code = spawn::exit_code(status);
                info!("Service '{name}' exited on its own with code {code}");
                lock(&self.errors)
                    .entry(name.to_string())
                    .or_insert(ServiceError::UnexpectedExit(code));
                processes.remove(name);
                false
            }
            Err(err) => {
                warn!("Failed to poll service '{name}': {err}");
                true
            }
        }
    }

    /// Live PID, present if and only if the service is currently running.
    pub fn get_pid(&self, name: &str) -> Option<u32> {
        let mut processes = lock(&self.processes);
        let managed = processes.get_mut(name)?;
        match managed.child.try_wait() {
            Ok(None) => Some(managed.child.id()),
            _ => None,
        }
    }

    /// TCP ports observed bound by the service's process group. Empty when
    /// the service is not running or the host query fails.
    pub fn listening_ports(&self, name: &str) -> BTreeSet<u16> {
        match self.get_pid(name) {
            Some(pid) => self.probe.listening_ports(pid),
            None => BTreeSet::new(),
        }
    }

    /// Last failure recorded for the service, rendered for display.
    pub fn get_error(&self, name: &str) -> Option<String> {
        lock(&self.errors).get(name).map(|e| e.to_string())
    }

    /// Names currently present in the live-process table.
    pub fn tracked(&self) -> Vec<String> {
        lock(&self.processes).keys().cloned().collect()
    }

    /// Stops every tracked service. Used at shutdown so no children outlive
    /// the supervisor.
    pub fn stop_all(&self) {
        for name in self.tracked() {
            if !self.stop(&name) {
                warn!("Failed to stop service '{name}' during shutdown");
            }
        }
    }

    fn definition(&self, name: &str) -> Option<ServiceDefinition> {
        lock(&self.registry).get(name).cloned()
    }

    #[cfg(test)]
    fn track_raw(&self, name: &str, child: std::process::Child, pgid: i32) {
        lock(&self.processes).insert(name.to_string(), ManagedProcess { child, pgid });
    }

    /// Registers a new service definition.
    pub fn add_service(&self, name: &str, command: &str) -> Result<(), RegistryError> {
        lock(&self.registry).add(name, command)
    }

    /// Replaces the command of an existing definition.
    pub fn update_command(
        &self,
        name: &str,
        command: &str,
    ) -> Result<(), RegistryError> {
        lock(&self.registry).update_command(name, command)
    }

    /// Removes a definition, stopping its process first if one is tracked.
    pub fn remove_service(&self, name: &str) -> Result<(), RegistryError> {
        self.stop(name);
        lock(&self.registry).remove(name)
    }

    /// Snapshot of all definitions in insertion order.
    pub fn definitions(&self) -> Vec<ServiceDefinition> {
        lock(&self.registry).definitions().to_vec()
    }
}

/// Sends `signal` to an entire process group.
fn signal_group(pgid: i32, signal: i32) -> std::io::Result<()> {
    if unsafe { libc::killpg(pgid, signal) } < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}
