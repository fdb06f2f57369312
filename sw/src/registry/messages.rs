//! Task registry messages
//!
//! Commands and responses for the actor pattern.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use super::task::{Task, TaskFailure, TaskHandle, TaskStatus};
use crate::error::PipelineError;

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Too many tasks in progress (limit {limit})")]
    Throttled { limit: usize },

    #[error("Channel error")]
    ChannelError,
}

impl RegistryError {
    /// Attribute the error to a façade operation
    pub fn into_pipeline(self, operation: &str) -> PipelineError {
        match self {
            RegistryError::Throttled { limit } => PipelineError::Throttled {
                operation: operation.to_string(),
                limit,
            },
            RegistryError::NotFound(id) => PipelineError::Internal {
                operation: operation.to_string(),
                message: format!("task {} is not registered", id),
            },
            RegistryError::ChannelError => PipelineError::registry_closed(operation),
        }
    }
}

/// Response from registry operations
pub type RegistryResponse<T> = Result<T, RegistryError>;

/// Counts for status reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Tasks holding an admission slot
    pub active: usize,
    /// Begin requests waiting for a slot
    pub queued: usize,
    pub completed: usize,
    pub error: usize,
    pub timeout: usize,
    pub cancelled: usize,
}

/// Commands sent to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    Begin {
        kind: String,
        timeout: Option<Duration>,
        reply: oneshot::Sender<RegistryResponse<TaskHandle>>,
    },
    AttachSession {
        task_id: String,
        session_id: String,
    },
    UpdateProgress {
        task_id: String,
        progress: u8,
    },
    Complete {
        task_id: String,
        result: Value,
        reply: oneshot::Sender<RegistryResponse<TaskStatus>>,
    },
    Fail {
        task_id: String,
        failure: TaskFailure,
        reply: oneshot::Sender<RegistryResponse<TaskStatus>>,
    },
    /// Sent by deadline timers without a reply
    Expire {
        task_id: String,
        reply: Option<oneshot::Sender<RegistryResponse<TaskStatus>>>,
    },
    Cancel {
        task_id: String,
        reply: oneshot::Sender<RegistryResponse<TaskStatus>>,
    },
    Get {
        task_id: String,
        reply: oneshot::Sender<RegistryResponse<Option<Task>>>,
    },
    List {
        reply: oneshot::Sender<RegistryResponse<Vec<Task>>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryResponse<RegistryStats>>,
    },
    PruneFinished {
        older_than: Duration,
        reply: oneshot::Sender<RegistryResponse<usize>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
