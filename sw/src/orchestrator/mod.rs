//! Phase orchestration
//!
//! ```text
//! idle -> requirements -> design -> codegen -> testing -> complete
//!                  (error flag is orthogonal)
//! ```
//!
//! Moving to a phase requires the previous phase's completion flag. A phase
//! with no façade is reported as unavailable and the workflow stays put.

mod phase;
mod workflow;

pub use phase::{ErrorRecord, Phase, PhaseState, WorkflowState};
pub use workflow::{Orchestrator, WorkflowStatus, export_all};
