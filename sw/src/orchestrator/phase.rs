//! Workflow phases and per-phase state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError};

/// Ordered workflow phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Requirements,
    Design,
    Codegen,
    Testing,
}

impl Phase {
    /// All phases in workflow order
    pub const ALL: [Phase; 4] = [Phase::Requirements, Phase::Design, Phase::Codegen, Phase::Testing];

    /// The phase after this one, if any
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Requirements => Some(Phase::Design),
            Phase::Design => Some(Phase::Codegen),
            Phase::Codegen => Some(Phase::Testing),
            Phase::Testing => None,
        }
    }

    /// The phase before this one, if any
    pub fn previous(self) -> Option<Phase> {
        match self {
            Phase::Requirements => None,
            Phase::Design => Some(Phase::Requirements),
            Phase::Codegen => Some(Phase::Design),
            Phase::Testing => Some(Phase::Codegen),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Design => "design",
            Phase::Codegen => "codegen",
            Phase::Testing => "testing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requirements" => Ok(Phase::Requirements),
            "design" => Ok(Phase::Design),
            "codegen" => Ok(Phase::Codegen),
            "testing" => Ok(Phase::Testing),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Position of the workflow pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum WorkflowState {
    Idle,
    Active(Phase),
    Complete,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => write!(f, "idle"),
            WorkflowState::Active(phase) => write!(f, "{}", phase),
            WorkflowState::Complete => write!(f, "complete"),
        }
    }
}

/// Last error recorded against a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub operation: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&PipelineError> for ErrorRecord {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            operation: err.operation(),
            message: err.to_string(),
            at: Utc::now(),
        }
    }
}

/// Per-phase state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub completed: bool,
    pub in_progress: bool,
    /// Free-form progress descriptor for display
    pub progress: String,
    pub last_error: Option<ErrorRecord>,
}

impl PhaseState {
    pub(crate) fn begin(&mut self) {
        self.in_progress = true;
        self.progress = "running".to_string();
    }

    pub(crate) fn succeed(&mut self, summary: impl Into<String>) {
        self.in_progress = false;
        self.completed = true;
        self.progress = summary.into();
        self.last_error = None;
    }

    pub(crate) fn pause(&mut self, summary: impl Into<String>) {
        self.in_progress = false;
        self.progress = summary.into();
    }

    pub(crate) fn fail(&mut self, err: &PipelineError) {
        self.in_progress = false;
        self.progress = "failed".to_string();
        self.last_error = Some(ErrorRecord::from(err));
    }
}
