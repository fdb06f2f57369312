//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes every envelope to a
//! per-run JSONL file for history, debugging and replay.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use eyre::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::Envelope;

/// Event logger that writes envelopes to JSONL files
///
/// Envelopes are written to `{runs_dir}/{run-id}/events.jsonl`
pub struct EventLogger {
    /// Base directory for run logs
    runs_dir: PathBuf,
    /// Open file writers per run
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an envelope to its run's log file
    pub fn write_event(&mut self, envelope: &Envelope) -> eyre::Result<()> {
        let run_id = envelope.run_id.as_str();
        debug!(%run_id, event = %envelope.event.name(), "EventLogger::write_event");

        if !self.writers.contains_key(run_id) {
            let run_dir = self.runs_dir.join(run_id);
            fs::create_dir_all(&run_dir).context(format!("Failed to create {}", run_dir.display()))?;

            let log_path = run_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(run_id.to_string(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(run_id) else {
            return Err(eyre::eyre!("no writer for run {}", run_id));
        };

        // Write envelope as JSON line
        let json = serde_json::to_string(envelope)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close writer for a run
    pub fn close_run(&mut self, run_id: &str) {
        debug!(%run_id, "EventLogger::close_run");
        if let Some(mut writer) = self.writers.remove(run_id) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until it closes
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, mut rx: broadcast::Receiver<Envelope>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let Err(e) = self.write_event(&envelope) {
                        error!(run_id = %envelope.run_id, error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                    // Continue processing - we'll catch up
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        // Flush all remaining writers
        for (run_id, mut writer) in self.writers.drain() {
            debug!(%run_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read envelopes from a run's log file
pub fn read_run_events(runs_dir: impl AsRef<Path>, run_id: &str) -> eyre::Result<Vec<Envelope>> {
    let log_path = runs_dir.as_ref().join(run_id).join("events.jsonl");
    debug!(?log_path, "read_run_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path).context(format!("Failed to read {}", log_path.display()))?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_run_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_run_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
///
/// Subscribes before returning so no event published afterwards is missed.
pub fn spawn_event_logger(bus: &EventBus, runs_dir: impl AsRef<Path>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let runs_dir = runs_dir.as_ref();
    fs::create_dir_all(runs_dir).context(format!("Failed to create {}", runs_dir.display()))?;
    let logger = EventLogger::new(runs_dir);
    let rx = bus.subscribe();
    Ok(tokio::spawn(logger.run(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::orchestrator::Phase;
    use tempfile::tempdir;

    fn envelope(run_id: &str, event: Event) -> Envelope {
        Envelope::new(run_id, run_id, event)
    }

    #[test]
    fn test_event_logger_creation() {
        let temp = tempdir().unwrap();
        let logger = EventLogger::new(temp.path());
        assert!(logger.writers.is_empty());
    }

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger
            .write_event(&envelope("run-123", Event::PhaseStarted { phase: Phase::Requirements }))
            .unwrap();

        // Check file was created
        let log_path = temp.path().join("run-123").join("events.jsonl");
        assert!(log_path.exists());

        // Check content
        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("PhaseStarted"));
        assert!(content.contains("run-123"));
    }

    #[test]
    fn test_multiple_runs() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger
            .write_event(&envelope("run-1", Event::PhaseStarted { phase: Phase::Design }))
            .unwrap();
        logger
            .write_event(&envelope("run-2", Event::PhaseStarted { phase: Phase::Codegen }))
            .unwrap();

        assert!(temp.path().join("run-1").join("events.jsonl").exists());
        assert!(temp.path().join("run-2").join("events.jsonl").exists());
    }

    #[test]
    fn test_read_run_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger
            .write_event(&envelope("test-read", Event::PhaseStarted { phase: Phase::Requirements }))
            .unwrap();
        logger
            .write_event(&envelope(
                "test-read",
                Event::PhaseCompleted {
                    phase: Phase::Requirements,
                },
            ))
            .unwrap();

        let entries = read_run_events(temp.path(), "test-read").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.name(), "phase:start");
        assert_eq!(entries[1].event.name(), "phase:complete");
    }

    #[test]
    fn test_read_skips_bad_lines() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("bad");
        fs::create_dir_all(&dir).unwrap();
        let good = serde_json::to_string(&envelope("bad", Event::PhaseStarted { phase: Phase::Testing })).unwrap();
        fs::write(dir.join("events.jsonl"), format!("not json\n{}\n\n", good)).unwrap();

        let entries = read_run_events(temp.path(), "bad").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_read_nonexistent_run() {
        let temp = tempdir().unwrap();
        let entries = read_run_events(temp.path(), "nonexistent").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_close_run() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger
            .write_event(&envelope("test-close", Event::PhaseStarted { phase: Phase::Design }))
            .unwrap();

        assert!(logger.writers.contains_key("test-close"));
        logger.close_run("test-close");
        assert!(!logger.writers.contains_key("test-close"));
    }

    #[tokio::test]
    async fn test_spawned_logger_writes_until_bus_dropped() {
        let temp = tempdir().unwrap();
        let bus = EventBus::new(16);
        let handle = spawn_event_logger(&bus, temp.path()).unwrap();

        bus.emitter_for("live").phase_started(Phase::Requirements);
        drop(bus);
        handle.await.unwrap();

        let entries = read_run_events(temp.path(), "live").unwrap();
        assert_eq!(entries.len(), 1);
    }
}
