//! Conflict detection against live host state.
//!
//! Before launching a service the supervisor asks two advisory questions: is
//! the port named in the command already taken, and is an equivalent command
//! already running? Both checks are best-effort heuristics over host
//! introspection tools (`lsof`, `pgrep`) and the process table, and both fail
//! open: any tool absence, timeout, or parse failure resolves to "no conflict
//! found" so a start attempt is never blocked or stalled by a broken query.
//! Errors in the launched command surface later through its own exit code.

use regex::Regex;
use std::{
    collections::BTreeSet,
    fmt,
    io::Read,
    process::{Command, Stdio},
    time::{Duration, Instant},
};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::constants::{MAX_CONFLICTS_REPORTED, PROBE_TIMEOUT, WAIT_POLL_INTERVAL};

/// Interpreter executables whose first argument, not the executable itself,
/// identifies what is actually running.
const INTERPRETERS: &[&str] = &["python", "python3", "node", "ruby", "sh", "bash"];

/// Process names excluded from duplicate matching because they are themselves
/// process-listing or search tools.
const SEARCH_TOOLS: &[&str] = &["ps", "pgrep", "grep", "lsof"];

/// One process found listening on a contested port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBlocker {
    /// PID of the listener.
    pub pid: u32,
    /// Short process name, `?` when unresolvable.
    pub name: String,
}

impl fmt::Display for PortBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.pid, self.name)
    }
}

/// Parses a port number out of a command string.
///
/// Recognizes `--port=N`, `--port N`, and `-p N`; returns the first match.
/// This is a best-effort guess from the command text, not a guarantee;
/// commands that specify ports differently are simply not detected.
pub fn extract_port(command: &str) -> Option<u16> {
    let re = Regex::new(r"(?:--port[=\s]|-p\s)(\d+)").unwrap();
    re.captures(command)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
}

/// Narrow interface over host introspection so the supervisor never depends
/// on the concrete query tools. The substring-matching duplicate heuristic is
/// deliberately isolated here; a stricter strategy can replace it without
/// touching the supervisor.
pub trait HostProbe: Send + Sync {
    /// Processes currently listening on `port`, capped at three. Empty means
    /// no conflict found (including every failure mode).
    fn port_blockers(&self, port: u16) -> Vec<PortBlocker>;

    /// PIDs of other processes whose command line matches `command`'s target
    /// token or its basename, capped at three. Empty means no duplicates
    /// found (including every failure mode).
    fn duplicate_pids(&self, command: &str) -> Vec<u32>;

    /// TCP ports observed bound by `pid` or any member of its process group.
    /// Empty on any query failure. Unlike [`extract_port`], this reports
    /// observed reality rather than a guess parsed from the command string.
    fn listening_ports(&self, pid: u32) -> BTreeSet<u16>;
}

/// [`HostProbe`] backed by `lsof`, `pgrep`, and the `sysinfo` process table.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn port_blockers(&self, port: u16) -> Vec<PortBlocker> {
        let mut cmd = Command::new("lsof");
        cmd.args(["-t", "-i", &format!(":{port}"), "-sTCP:LISTEN"]);

        let Some(output) = run_with_timeout(cmd, PROBE_TIMEOUT) else {
            return Vec::new();
        };

        let pids: Vec<u32> = output
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .take(MAX_CONFLICTS_REPORTED)
            .collect();

        if pids.is_empty() {
            return Vec::new();
        }

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        pids.into_iter()
            .map(|pid| {
                let name = system
                    .process(sysinfo::Pid::from_u32(pid))
                    .map(|p| p.name().to_string_lossy().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "?".to_string());
                PortBlocker { pid, name }
            })
            .collect()
    }

    fn duplicate_pids(&self, command: &str) -> Vec<u32> {
        let Some((target, basename)) = command_target(command) else {
            return Vec::new();
        };

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let processes = system.processes().iter().map(|(pid, process)| {
            let cmdline = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            let name = process.name().to_string_lossy().to_string();
            (pid.as_u32(), name, cmdline)
        });

        matching_pids(&target, &basename, std::process::id(), processes)
    }

    fn listening_ports(&self, pid: u32) -> BTreeSet<u16> {
        let mut group = BTreeSet::from([pid]);

        // The supervisor starts services with setsid-style group isolation,
        // so group membership finds descendants the direct handle cannot.
        match nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid as i32))) {
            Ok(pgid) => {
                let mut cmd = Command::new("pgrep");
                cmd.args(["-g", &pgid.to_string()]);
                if let Some(output) = run_with_timeout(cmd, PROBE_TIMEOUT) {
                    group.extend(
                        output
                            .lines()
                            .filter_map(|line| line.trim().parse::<u32>().ok()),
                    );
                }
            }
            Err(err) => {
                debug!("getpgid({pid}) failed: {err}; inspecting the PID alone");
            }
        }

        let pid_list = group
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut cmd = Command::new("lsof");
        cmd.args(["-aPi", "-sTCP:LISTEN", "-p", &pid_list, "-Fn"]);

        let Some(output) = run_with_timeout(cmd, PROBE_TIMEOUT) else {
            return BTreeSet::new();
        };

        parse_lsof_ports(&output)
    }
}

/// Picks the distinctive token of a command: the first word, or the second
/// when the first is an interpreter, plus its path basename.
fn command_target(command: &str) -> Option<(String, String)> {
    let mut parts = command.split_whitespace();
    let first = parts.next()?;

    let first_base = first.rsplit('/').next().unwrap_or(first);
    let target = if INTERPRETERS.contains(&first_base) {
        parts.next().unwrap_or(first)
    } else {
        first
    };

    let basename = target.rsplit('/').next().unwrap_or(target);
    Some((target.to_string(), basename.to_string()))
}

/// Substring match of `target`/`basename` against process command lines.
///
/// Skips the supervisor's own PID and anything that is itself a listing or
/// search tool. This is approximate by design: two different scripts invoked
/// through the same generic executable name can collide.
fn matching_pids(
    target: &str,
    basename: &str,
    own_pid: u32,
    processes: impl IntoIterator<Item = (u32, String, String)>,
) -> Vec<u32> {
    let mut matches = Vec::new();

    for (pid, name, cmdline) in processes {
        if pid == own_pid || cmdline.is_empty() {
            continue;
        }
        if SEARCH_TOOLS.contains(&name.as_str()) {
            continue;
        }
        if cmdline.contains("grep") || cmdline.contains(" pgrep ") {
            continue;
        }

        if cmdline.contains(target) || (!basename.is_empty() && cmdline.contains(basename))
        {
            matches.push(pid);
            if matches.len() == MAX_CONFLICTS_REPORTED {
                break;
            }
        }
    }

    matches
}

/// Extracts port numbers from `lsof -Fn` output lines such as
/// `n*:8080` or `nlocalhost:3000`.
fn parse_lsof_ports(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter(|line| line.starts_with('n') && line.contains(':'))
        .filter_map(|line| line.rsplit(':').next())
        .filter_map(|port| port.trim().parse::<u16>().ok())
        .collect()
}

/// Runs a host query with a hard deadline, returning its stdout on success
/// and `None` on spawn failure, non-trivial wait error, or timeout. The
/// query process is killed on timeout so nothing lingers.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().ok()?;
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    debug!("Host query {cmd:?} exceeded {timeout:?}; killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(WAIT_POLL_INTERVAL);
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }

    let mut output = String::new();
    child.stdout.take()?.read_to_string(&mut output).ok()?;
    Some(output)
}
