//! Pipeline error taxonomy
//!
//! Every failure that reaches a façade boundary is classified into one of a
//! closed set of kinds. The kind travels on the event bus; the full error
//! carries the originating operation and a human-readable message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::DecodeError;
use crate::llm::LlmError;
use crate::orchestrator::Phase;

/// Closed classification of pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedOutput,
    Backend,
    Timeout,
    Cancelled,
    PhaseBusy,
    PhaseGated,
    Persistence,
    Throttled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MalformedOutput => "malformed_output",
            Self::Backend => "backend",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::PhaseBusy => "phase_busy",
            Self::PhaseGated => "phase_gated",
            Self::Persistence => "persistence",
            Self::Throttled => "throttled",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Errors from the persistence interface
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

/// Errors surfaced by façades, the registry and the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{operation}: backend returned unusable output: {message}")]
    MalformedOutput { operation: String, message: String },

    #[error("{operation}: backend error: {message}")]
    Backend {
        operation: String,
        message: String,
        retryable: bool,
    },

    #[error("{operation}: timed out")]
    Timeout { operation: String },

    #[error("{operation}: cancelled")]
    Cancelled { operation: String },

    #[error("phase {phase} is already in progress")]
    PhaseBusy { phase: Phase },

    #[error("phase {phase} cannot start before {blocking} is complete")]
    PhaseGated { phase: Phase, blocking: Phase },

    #[error("{operation}: persistence failed: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: PersistenceError,
    },

    #[error("{operation}: too many tasks in progress (limit {limit})")]
    Throttled { operation: String, limit: usize },

    #[error("{operation}: {message}")]
    Internal { operation: String, message: String },
}

impl PipelineError {
    /// Closed classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::PhaseBusy { .. } => ErrorKind::PhaseBusy,
            Self::PhaseGated { .. } => ErrorKind::PhaseGated,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Name of the operation (or phase) the error originated from
    pub fn operation(&self) -> String {
        match self {
            Self::MalformedOutput { operation, .. }
            | Self::Backend { operation, .. }
            | Self::Timeout { operation }
            | Self::Cancelled { operation }
            | Self::Persistence { operation, .. }
            | Self::Throttled { operation, .. }
            | Self::Internal { operation, .. } => operation.clone(),
            Self::PhaseBusy { phase } | Self::PhaseGated { phase, .. } => phase.to_string(),
        }
    }

    /// Whether another attempt of the same generation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MalformedOutput { .. } => true,
            Self::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Classify a transport error for the given operation
    pub fn from_llm(operation: &str, err: LlmError) -> Self {
        match err {
            LlmError::Timeout(_) => Self::Timeout {
                operation: operation.to_string(),
            },
            other => Self::Backend {
                operation: operation.to_string(),
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }

    /// Classify a decoder error for the given operation
    pub fn from_decode(operation: &str, err: DecodeError) -> Self {
        match err {
            DecodeError::Aborted => Self::Cancelled {
                operation: operation.to_string(),
            },
            DecodeError::MalformedOutput { reason } => Self::MalformedOutput {
                operation: operation.to_string(),
                message: reason,
            },
        }
    }

    /// Registry actor went away
    pub fn registry_closed(operation: &str) -> Self {
        Self::Internal {
            operation: operation.to_string(),
            message: "task registry is not running".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_classification() {
        let err = PipelineError::Timeout {
            operation: "requirements.extract".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.operation(), "requirements.extract");

        let err = PipelineError::PhaseBusy {
            phase: Phase::Requirements,
        };
        assert_eq!(err.kind(), ErrorKind::PhaseBusy);
        assert_eq!(err.operation(), "requirements");
    }

    #[test]
    fn test_from_llm_timeout_maps_to_timeout() {
        let err = PipelineError::from_llm("codegen.file", LlmError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_from_llm_api_error_keeps_retryability() {
        let err = PipelineError::from_llm(
            "codegen.file",
            LlmError::ApiError {
                status: 503,
                message: "overloaded".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.is_retryable());

        let err = PipelineError::from_llm(
            "codegen.file",
            LlmError::ApiError {
                status: 400,
                message: "bad".to_string(),
            },
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_decode() {
        let err = PipelineError::from_decode("x", DecodeError::Aborted);
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let err = PipelineError::from_decode(
            "x",
            DecodeError::MalformedOutput {
                reason: "no object".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("no object"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MalformedOutput).unwrap();
        assert_eq!(json, "\"malformed_output\"");
    }
}
