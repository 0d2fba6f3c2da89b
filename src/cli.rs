//! Command-line interface for svcmgr.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from their
/// string names ("info", "debug", etc.).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        if self.0 == LevelFilter::OFF {
            "off"
        } else if self.0 == LevelFilter::ERROR {
            "error"
        } else if self.0 == LevelFilter::WARN {
            "warn"
        } else if self.0 == LevelFilter::INFO {
            "info"
        } else if self.0 == LevelFilter::DEBUG {
            "debug"
        } else {
            "trace"
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let level = match value.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            other => return Err(format!("unsupported log level '{other}'")),
        };
        Ok(LogLevelArg(level))
    }
}

/// Manage named background services.
#[derive(Debug, Parser)]
#[command(name = "svcmgr", version, about)]
pub struct Cli {
    /// Path to the service registry file.
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: LogLevelArg,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register a new service.
    Add {
        /// Unique service name.
        name: String,
        /// Shell command line that launches the service.
        command: String,
    },

    /// Remove a service, stopping it first if it is running.
    Remove {
        /// Service name.
        name: String,
    },

    /// Replace the command of an existing service.
    Update {
        /// Service name.
        name: String,
        /// New shell command line.
        command: String,
    },

    /// List registered services.
    List,

    /// Start services and supervise them in the foreground until Ctrl-C.
    Run {
        /// Services to start; all registered services when omitted.
        services: Vec<String>,
    },
}

/// Parses command-line arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
