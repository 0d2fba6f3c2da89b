//! Timing and bound constants used across the supervisor.

use std::time::Duration;

/// How long a freshly spawned service is observed before the start is
/// considered successful. Immediate failures (missing binary, syntax error,
/// port-bind race) almost always surface inside this window.
pub const START_GRACE_PERIOD: Duration = Duration::from_millis(800);

/// Bounded wait for a service to exit after SIGTERM is delivered to its
/// process group.
pub const STOP_TERM_WAIT: Duration = Duration::from_secs(5);

/// Additional bounded wait after escalating to SIGKILL.
pub const STOP_KILL_WAIT: Duration = Duration::from_secs(3);

/// Pause between the stop and start halves of a restart, giving the OS time
/// to release resources such as listening sockets.
pub const RESTART_PAUSE: Duration = Duration::from_millis(300);

/// Polling interval used when waiting on a child process state change.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interval between reconciliation passes over the live-process table.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on any single host-introspection query (`lsof`, `pgrep`).
/// Conflict checks fail open, so a hung tool must never stall a start.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum number of conflicting PIDs reported for one check.
pub const MAX_CONFLICTS_REPORTED: usize = 3;

/// Number of trailing bytes of captured stdout/stderr included in a
/// launch-failure diagnostic.
pub const CAPTURE_TAIL_BYTES: u64 = 300;
