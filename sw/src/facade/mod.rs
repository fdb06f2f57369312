//! Module façades
//!
//! Each façade owns one slice of workflow state and mediates every
//! generation call for its domain through the shared [`Generator`].
//! Operations are named `<domain>.<op>`; the name appears in events and
//! errors.

mod codegen;
mod design;
mod generator;
mod repair;
mod requirements;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::orchestrator::Phase;

pub use codegen::{CodegenFacade, CodegenState, FileKind, GeneratedFile, PlannedFile};
pub use design::{DesignFacade, DesignState, DiagramKind};
pub use generator::{Call, GenerationSettings, Generator};
pub use repair::{Finding, RepairFacade, RepairState};
pub use requirements::{
    FunctionalRequirement, NonFunctionalRequirement, Priority, RequirementsFacade, RequirementsState, Severity,
    ValidationIssue,
};

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Bypass the cache and replace its entry
    pub force: bool,
    /// Override the configured streaming mode
    pub streaming: Option<bool>,
}

impl RunOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}

/// What running a phase produced
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// The phase is done; `output` feeds the next phase
    Completed { summary: String, output: Value },
    /// Work ran but the phase's completion condition is not met yet
    Incomplete { summary: String, output: Value },
    /// No façade is provisioned for the phase
    Unavailable,
}

impl PhaseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseOutcome::Completed { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            PhaseOutcome::Completed { output, .. } | PhaseOutcome::Incomplete { output, .. } => Some(output),
            PhaseOutcome::Unavailable => None,
        }
    }
}

/// A domain-scoped component the orchestrator sequences
#[async_trait]
pub trait Facade: Send + Sync {
    /// Phase this façade serves
    fn phase(&self) -> Phase;

    /// Domain name; also the persistence key of its snapshot
    fn name(&self) -> &'static str;

    /// Run the façade's whole phase
    async fn run(&self, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError>;

    /// Plain structured export of the merged domain state
    async fn snapshot(&self) -> Value;

    /// Replace the domain state from a snapshot
    async fn restore(&self, snapshot: Value) -> Result<(), PipelineError>;
}

/// Pull a text input out of a façade input value
///
/// Accepts a bare string or an object with a `text` field.
pub(crate) fn input_text(input: &Value) -> Option<&str> {
    match input {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("text").and_then(Value::as_str),
        _ => None,
    }
    .map(str::trim)
    .filter(|s| !s.is_empty())
}
