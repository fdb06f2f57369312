//! CLI command definitions and output helpers

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::debug;

use crate::events::{Envelope, Event, LogLevel};
use crate::orchestrator::Phase;

/// SpecWeaver - streaming generation pipeline
#[derive(Parser)]
#[command(
    name = "sw",
    about = "Phased requirements, design and code generation over an LLM backend",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the workflow from requirements onwards
    Run {
        /// Product description, or @path to read it from a file
        #[arg(value_name = "TEXT|@FILE")]
        input: String,

        /// Stop after the requirements phase
        #[arg(long)]
        no_auto: bool,

        /// Use single-shot completions instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Last phase to run
        #[arg(long, value_name = "PHASE")]
        through: Option<Phase>,

        /// Continue a previous run from its saved snapshots
        #[arg(long, value_name = "RUN_ID")]
        resume: Option<String>,

        /// Bypass the result cache
        #[arg(short, long)]
        force: bool,
    },

    /// Extract and validate requirements only
    Requirements {
        /// Product description, or @path to read it from a file
        #[arg(value_name = "TEXT|@FILE")]
        input: String,

        /// Bypass the result cache
        #[arg(short, long)]
        force: bool,
    },

    /// Print the resolved configuration
    Config,

    /// Replay the event log of a run
    Events {
        /// Run id printed by `sw run`
        run_id: String,
    },
}

/// Resolve a `TEXT|@FILE` argument to its text
pub fn read_input(arg: &str) -> Result<String> {
    debug!(%arg, "read_input: called");
    match arg.strip_prefix('@') {
        Some(path) => {
            debug!(%path, "read_input: reading file");
            fs::read_to_string(path).context(format!("Failed to read input file {}", path))
        }
        None => Ok(arg.to_string()),
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("specweaver")
        .join("logs")
        .join("specweaver.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// One human-readable line for a bus event; `None` for events too noisy to print
pub fn format_event(envelope: &Envelope, verbose: bool) -> Option<String> {
    let ts = envelope.ts.format("%H:%M:%S").to_string().dimmed();
    let name = envelope.event.name();
    let detail = match &envelope.event {
        Event::PhaseStarted { phase } => format!("{}", phase.as_str().bold()),
        Event::PhaseCompleted { phase } => format!("{} {}", phase.as_str().bold(), "done".green()),
        Event::PhaseUnavailable { phase } => format!("{} {}", phase.as_str().bold(), "not available".yellow()),
        Event::OperationStarted { .. } => String::new(),
        Event::OperationCompleted { from_cache, summary, .. } => {
            if *from_cache {
                format!("{} {}", summary, "(cached)".cyan())
            } else {
                summary.clone()
            }
        }
        Event::OperationFailed { kind, message, .. } => format!("{} {}", kind.to_string().red(), message),
        Event::StreamUpdate { progress, .. } => {
            if !verbose {
                return None;
            }
            format!("{}%", progress)
        }
        Event::StreamCompleted { stream_id } | Event::StreamFailed { stream_id, .. } if !verbose => {
            debug!(%stream_id, "format_event: skipping stream event");
            return None;
        }
        Event::StreamCompleted { stream_id } => stream_id.clone(),
        Event::StreamFailed { kind, message, .. } => format!("{} {}", kind.to_string().red(), message),
        Event::Timeout { task_id } => format!("{}", task_id.red()),
        Event::Log { level, message } => match level {
            LogLevel::Info => message.clone(),
            LogLevel::Warn => format!("{}", message.yellow()),
            LogLevel::Error => format!("{}", message.red()),
        },
        Event::WorkflowFailed { phase, message } => format!("{} {}", phase.as_str().bold(), message.red()),
    };

    let name = if envelope.event.is_error() {
        name.red().to_string()
    } else {
        name.blue().to_string()
    };
    Some(format!("{} {:<28} {}", ts, name, detail).trim_end().to_string())
}
