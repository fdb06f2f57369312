//! SpecWeaver - streaming generation pipeline
//!
//! CLI entry point for running the phased workflow.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use specweaver::cli::{Cli, Command, format_event, generate_after_help, read_input};
use specweaver::config::Config;
use specweaver::events::{Envelope, EventBus, read_run_events, spawn_event_logger};
use specweaver::facade::{PhaseOutcome, RunOptions};
use specweaver::llm::create_client;
use specweaver::orchestrator::{Orchestrator, Phase};
use specweaver::persistence::SnapPersistence;

/// How long to wait for the event logger to drain on exit
const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("specweaver")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("specweaver.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!("SpecWeaver loaded config: provider={} model={}", config.llm.provider, config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run {
            input,
            no_auto,
            no_stream,
            through,
            resume,
            force,
        }) => {
            let mut config = config;
            config.workflow.auto_progress = !no_auto;
            if no_stream {
                config.generation.streaming = false;
            }
            let options = RunOptions {
                force,
                streaming: None,
            };
            let failed = cmd_run(&config, &input, through, resume, options).await?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Requirements { input, force }) => cmd_requirements(&config, &input, force).await,
        Some(Command::Config) => cmd_config(&config),
        Some(Command::Events { run_id }) => cmd_events(&config, &run_id),
        None => {
            Cli::command().after_help(generate_after_help()).print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Everything a backend-facing command needs, torn down in order by `finish`
struct Session {
    orchestrator: Orchestrator,
    bus: EventBus,
    logger: Option<JoinHandle<()>>,
    printer: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Session {
    async fn open(config: &Config, run_id: String, print_events: bool) -> Result<Self> {
        debug!(%run_id, print_events, "Session::open: called");
        config.validate()?;

        let bus = EventBus::new(config.events.channel_capacity);
        let logger = match &config.events.log_dir {
            Some(dir) => Some(spawn_event_logger(&bus, dir).context("Failed to start event logger")?),
            None => None,
        };
        let printer = print_events.then(|| {
            let token = CancellationToken::new();
            let handle = tokio::spawn(print_events_until(bus.subscribe(), token.clone()));
            (token, handle)
        });

        let run_dir = config.storage.dir.join("runs").join(&run_id);
        let persistence = SnapPersistence::open(&run_dir).context(format!("Failed to open {}", run_dir.display()))?;
        let llm = create_client(&config.llm).context("Failed to create LLM client")?;
        let root = std::env::current_dir().context("Failed to resolve working directory")?;

        let orchestrator = Orchestrator::from_config(config, run_id, llm, Arc::new(persistence), &bus, root);
        orchestrator
            .initialize()
            .await
            .context("Failed to initialize workflow")?;

        Ok(Self {
            orchestrator,
            bus,
            logger,
            printer,
        })
    }

    async fn finish(self) {
        debug!("Session::finish: called");
        self.orchestrator.shutdown().await;
        if let Some((token, handle)) = self.printer {
            token.cancel();
            let _ = handle.await;
        }

        // The logger exits once every sender is gone
        drop(self.orchestrator);
        drop(self.bus);
        if let Some(handle) = self.logger
            && tokio::time::timeout(LOGGER_DRAIN_TIMEOUT, handle).await.is_err()
        {
            warn!("Event logger did not drain in time");
        }
    }
}

async fn print_events_until(mut rx: broadcast::Receiver<Envelope>, token: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                while let Ok(envelope) = rx.try_recv() {
                    if let Some(line) = format_event(&envelope, false) {
                        println!("{}", line);
                    }
                }
                break;
            }
            received = rx.recv() => match received {
                Ok(envelope) => {
                    if let Some(line) = format_event(&envelope, false) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Event printer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Run the workflow; returns whether the error flag ended up set
async fn cmd_run(
    config: &Config,
    input: &str,
    through: Option<Phase>,
    resume: Option<String>,
    options: RunOptions,
) -> Result<bool> {
    let text = read_input(input)?;
    let run_id = resume.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    debug!(%run_id, ?through, "cmd_run: called");
    println!("{} {}", "run".bold(), run_id);

    let session = Session::open(config, run_id, true).await?;
    let result = session
        .orchestrator
        .run(Phase::Requirements, Value::String(text), &options, through)
        .await;
    let status = session.orchestrator.status().await;
    session.finish().await;

    match result {
        Ok(outcomes) => {
            println!();
            for (phase, outcome) in &outcomes {
                let line = match outcome {
                    PhaseOutcome::Completed { summary, .. } => format!("{} {}", "completed".green(), summary),
                    PhaseOutcome::Incomplete { summary, .. } => format!("{} {}", "incomplete".yellow(), summary),
                    PhaseOutcome::Unavailable => "not available".yellow().to_string(),
                };
                println!("  {:<14} {}", phase.as_str().bold(), line);
            }
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
        }
    }

    let status = status.context("Failed to read workflow status")?;
    println!("{} {}", "state".bold(), status.current);
    Ok(status.error)
}

async fn cmd_requirements(config: &Config, input: &str, force: bool) -> Result<()> {
    let text = read_input(input)?;
    let run_id = uuid::Uuid::now_v7().to_string();
    debug!(%run_id, force, "cmd_requirements: called");

    let session = Session::open(config, run_id, false).await?;
    let options = RunOptions {
        force,
        streaming: None,
    };
    let result = session
        .orchestrator
        .start_phase(Phase::Requirements, Value::String(text), &options)
        .await;
    let snapshot = match session.orchestrator.facade(Phase::Requirements) {
        Some(facade) => facade.snapshot().await,
        None => Value::Null,
    };
    session.finish().await;

    result.context("Requirements phase failed")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to encode configuration")?);
    Ok(())
}

fn cmd_events(config: &Config, run_id: &str) -> Result<()> {
    debug!(%run_id, "cmd_events: called");
    let Some(dir) = &config.events.log_dir else {
        eyre::bail!("No event log directory configured (events.log-dir)");
    };
    let entries = read_run_events(dir, run_id)?;
    if entries.is_empty() {
        println!("No events recorded for run {}", run_id);
        return Ok(());
    }
    for envelope in &entries {
        if let Some(line) = format_event(envelope, true) {
            println!("{}", line);
        }
    }
    Ok(())
}
