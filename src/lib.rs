//! Svcmgr is a small supervisor for user-defined background services on
//! Unix-like operating systems. It persists named launch commands, starts and
//! stops them as detached child processes, detects port and duplicate-command
//! conflicts before launching, and keeps a per-service error state with enough
//! diagnostic context (exit code, captured output, conflicting PIDs) for a
//! caller to act on.

/// CLI interface.
pub mod cli;

/// Conflict detection against live host state.
pub mod conflict;

/// Timing and bound constants.
pub mod constants;

/// Error handling.
pub mod error;

/// Periodic reconciliation of the live-process table.
pub mod monitor;

/// Durable service definitions.
pub mod registry;

/// Process launch mechanics and environment sanitation.
pub mod spawn;

/// The service-process supervisor.
pub mod supervisor;
