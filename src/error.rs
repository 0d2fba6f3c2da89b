//! Error handling for svcmgr.
use thiserror::Error;

use crate::conflict::PortBlocker;

/// Last known failure for a single service, kept by the supervisor and
/// rendered to text only when surfaced to a caller. At most one per service;
/// overwritten, never appended.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Operation referenced a name with no registered definition.
    #[error("Service not found")]
    ServiceNotFound,

    /// Preflight port check found the requested port already listening.
    #[error("Port {port} used by {}", format_blockers(.blockers))]
    PortConflict {
        /// The port parsed out of the service command.
        port: u16,
        /// Processes currently listening on it, capped at three.
        blockers: Vec<PortBlocker>,
    },

    /// Preflight command check found an equivalent process already running.
    #[error("Process running: PID {}", format_pids(.pids))]
    DuplicateProcess {
        /// PIDs whose command lines matched, capped at three.
        pids: Vec<u32>,
    },

    /// The spawn call itself failed before a child existed.
    #[error("Failed to start: {0}")]
    SpawnFailure(#[source] std::io::Error),

    /// The child exited within the start grace window.
    #[error("{}", launch_failure_message(.code, .output, .port_conflict, .duplicates))]
    LaunchFailure {
        /// Exit code, or the negated signal number for signal deaths.
        code: i32,
        /// Trailing portion of the captured stdout/stderr.
        output: String,
        /// Port conflict observed when the checks were re-run after the exit.
        port_conflict: Option<(u16, Vec<PortBlocker>)>,
        /// Duplicate-command PIDs observed after the exit.
        duplicates: Vec<u32>,
    },

    /// Signal delivery during `stop` failed for a reason other than the
    /// process already being gone.
    #[error("Failed to signal process: {0}")]
    SignalFailure(#[source] std::io::Error),

    /// Reconciliation discovered a tracked process had died on its own.
    #[error("Process exited with code {0}")]
    UnexpectedExit(i32),
}

/// Errors raised by the durable service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error reading or writing the registry file.
    #[error("Failed to access registry file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the registry JSON document.
    #[error("Invalid registry format: {0}")]
    Parse(#[from] serde_json::Error),

    /// Error replacing the registry file atomically.
    #[error("Failed to replace registry file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// A definition with this name already exists.
    #[error("Service '{0}' already exists")]
    DuplicateName(String),

    /// No definition with this name exists.
    #[error("Service '{0}' not found in registry")]
    UnknownService(String),
}

/// Renders a blocker list as `PID(name), PID(name)`.
fn format_blockers(blockers: &[PortBlocker]) -> String {
    blockers
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders a PID list as `1234, 5678`.
fn format_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Composes the launch-failure diagnostic. Each `|`-separated segment is
/// present only when the corresponding observation was made.
fn launch_failure_message(
    code: &i32,
    output: &str,
    port_conflict: &Option<(u16, Vec<PortBlocker>)>,
    duplicates: &[u32],
) -> String {
    let mut message = format!("Exit code {code}");

    if !output.is_empty() {
        message.push_str(&format!(" — {output}"));
    }

    if let Some((port, blockers)) = port_conflict {
        message.push_str(&format!(
            " | port {port} held by PID {}",
            format_blockers(blockers)
        ));
    }

    if !duplicates.is_empty() {
        message.push_str(&format!(" | running: {}", format_pids(duplicates)));
    }

    message
}
