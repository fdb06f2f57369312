//! Event types for pipeline observability
//!
//! The closed vocabulary of what happens during a workflow run:
//! - Phase lifecycle (start, complete, unavailable)
//! - Façade operations (start, complete, error)
//! - Stream progress (update, complete, error)
//! - Registry conditions (timeout) and operator messages (log)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::orchestrator::Phase;

/// Severity of a `log` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Core event enum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // === Phase lifecycle ===
    /// A phase has started
    PhaseStarted { phase: Phase },
    /// A phase has completed
    PhaseCompleted { phase: Phase },
    /// Auto-progression reached a phase with no façade
    PhaseUnavailable { phase: Phase },

    // === Façade operations ===
    /// A façade operation has started
    OperationStarted { operation: String },
    /// A façade operation has completed
    OperationCompleted {
        operation: String,
        from_cache: bool,
        /// Short human-readable description of the result
        summary: String,
    },
    /// A façade operation has failed
    OperationFailed {
        operation: String,
        phase: Option<Phase>,
        kind: ErrorKind,
        message: String,
    },

    // === Streams ===
    /// A stream produced a usable partial value
    StreamUpdate {
        stream_id: String,
        progress: u8,
        snapshot: Value,
    },
    /// A stream resolved
    StreamCompleted { stream_id: String },
    /// A stream ended without a value
    StreamFailed {
        stream_id: String,
        kind: ErrorKind,
        message: String,
    },

    // === Registry and workflow ===
    /// A task deadline elapsed while it was still in progress
    Timeout { task_id: String },
    /// Operator-level message for display
    Log { level: LogLevel, message: String },
    /// The workflow error flag was set
    WorkflowFailed { phase: Phase, message: String },
}

impl Event {
    /// Wire name of the event
    pub fn name(&self) -> String {
        match self {
            Event::PhaseStarted { .. } => "phase:start".to_string(),
            Event::PhaseCompleted { .. } => "phase:complete".to_string(),
            Event::PhaseUnavailable { .. } => "phase:unavailable".to_string(),
            Event::OperationStarted { operation } => format!("{}:start", operation),
            Event::OperationCompleted { operation, .. } => format!("{}:complete", operation),
            Event::OperationFailed { operation, .. } => format!("{}:error", operation),
            Event::StreamUpdate { .. } => "stream:update".to_string(),
            Event::StreamCompleted { .. } => "stream:complete".to_string(),
            Event::StreamFailed { .. } => "stream:error".to_string(),
            Event::Timeout { .. } => "timeout".to_string(),
            Event::Log { .. } => "log".to_string(),
            Event::WorkflowFailed { .. } => "workflow:error".to_string(),
        }
    }

    /// Whether this event reports a failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::OperationFailed { .. }
                | Event::StreamFailed { .. }
                | Event::Timeout { .. }
                | Event::WorkflowFailed { .. }
                | Event::Log {
                    level: LogLevel::Error,
                    ..
                }
        )
    }
}

/// An event with its timestamp and correlation ids
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Timestamp of the event
    pub ts: DateTime<Utc>,
    /// Workflow run the event belongs to
    pub run_id: String,
    /// Task, stream or run id the event is about
    pub correlation_id: String,
    /// The event
    pub event: Event,
}

impl Envelope {
    /// Create a new envelope with the current timestamp
    pub fn new(run_id: impl Into<String>, correlation_id: impl Into<String>, event: Event) -> Self {
        Self {
            ts: Utc::now(),
            run_id: run_id.into(),
            correlation_id: correlation_id.into(),
            event,
        }
    }
}
