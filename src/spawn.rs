//! Process launch mechanics and environment sanitation.
//!
//! Services run through the host shell so command strings may use pipes and
//! variable expansion, detached into their own process group so the whole
//! tree can be signalled on stop, with stdin closed and stdout/stderr
//! captured to anonymous temp files for post-mortem diagnostics.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};
use tracing::debug;

use crate::constants::WAIT_POLL_INTERVAL;

/// Environment variables stripped before launch. These leak the supervisor's
/// own runtime or packaging internals into children and can break services
/// that resolve their own interpreter or libraries.
const BUNDLE_VARS: &[&str] = &["PYTHONPATH", "PYTHONHOME", "DYLD_LIBRARY_PATH"];

/// Directory guaranteed to sit near the front of the child PATH so launched
/// commands resolve the same executables regardless of how the supervisor
/// itself was started.
#[cfg(target_os = "macos")]
const PREFERRED_PATH_DIR: &str = "/opt/homebrew/bin";
#[cfg(not(target_os = "macos"))]
const PREFERRED_PATH_DIR: &str = "/usr/local/bin";

/// Capture sinks for a freshly launched child. Anonymous temp files: dropped
/// handles reclaim the space once the child exits.
#[derive(Debug)]
pub struct CaptureFiles {
    /// Child stdout sink.
    pub stdout: File,
    /// Child stderr sink.
    pub stderr: File,
}

/// Sanitized copy of the host environment for child processes: bundle
/// variables stripped, PATH normalized.
pub fn service_environment() -> Vec<(String, String)> {
    sanitize_env(std::env::vars())
}

fn sanitize_env(
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    vars.into_iter()
        .filter(|(key, _)| !BUNDLE_VARS.contains(&key.as_str()))
        .map(|(key, value)| {
            if key == "PATH" {
                (key, normalized_path(&value))
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Prepends the preferred tool directory unless it already appears among the
/// first three PATH entries, keeping tool resolution order deterministic.
fn normalized_path(path: &str) -> String {
    let leading: Vec<&str> = path.split(':').take(3).collect();
    if leading.contains(&PREFERRED_PATH_DIR) {
        path.to_string()
    } else {
        format!("{PREFERRED_PATH_DIR}:{path}")
    }
}

/// Launches `command` through the shell in its own process group.
///
/// The returned child's PID doubles as its process group id because of the
/// `setpgid(0, 0)` performed between fork and exec.
pub fn launch(command: &str) -> std::io::Result<(Child, CaptureFiles)> {
    debug!("Launching command: `{command}`");

    let stdout_file = tempfile::tempfile()?;
    let stderr_file = tempfile::tempfile()?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone()?))
        .stderr(Stdio::from(stderr_file.try_clone()?));

    cmd.env_clear();
    for (key, value) in service_environment() {
        cmd.env(key, value);
    }

    unsafe {
        cmd.pre_exec(|| {
            // Own process group so a stop can signal the entire tree without
            // touching the supervisor's group.
            if libc::setpgid(0, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    debug!("Spawned PID {} for `{command}`", child.id());

    Ok((
        child,
        CaptureFiles {
            stdout: stdout_file,
            stderr: stderr_file,
        },
    ))
}

/// Reads the trailing `max_bytes` of a capture file, lossily decoded.
pub fn read_tail(file: &mut File, max_bytes: u64) -> String {
    let len = match file.metadata() {
        Ok(meta) => meta.len(),
        Err(_) => return String::new(),
    };

    let start = len.saturating_sub(max_bytes);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }

    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }

    String::from_utf8_lossy(&buf).trim().to_string()
}

/// Waits on a child with a deadline, returning `Ok(None)` on timeout.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(WAIT_POLL_INTERVAL);
            }
        }
    }
}

/// Collapses an exit status to a single code: the exit code when present,
/// the negated signal number for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}
