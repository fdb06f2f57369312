//! Task record - one caller-visible unit of work

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;

/// Task lifecycle status
///
/// `InProgress` is the only non-terminal status; transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Error,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }

    /// Terminal status a failure of the given kind finalizes to
    pub fn for_failure(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => TaskStatus::Timeout,
            ErrorKind::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Error,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Timeout => write!(f, "timeout"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// A registered unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Operation name, e.g. `requirements.extract`
    pub kind: String,
    pub status: TaskStatus,
    pub progress: u8,
    /// Stream sessions opened under this task, in order
    pub sessions: Vec<String>,
    pub result: Option<Value>,
    pub failure: Option<TaskFailure>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(kind: impl Into<String>, timeout: Option<Duration>) -> Self {
        let started_at = Utc::now();
        let deadline = timeout
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| started_at + d);
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            kind: kind.into(),
            status: TaskStatus::InProgress,
            progress: 0,
            sessions: Vec::new(),
            result: None,
            failure: None,
            started_at,
            ended_at: None,
            deadline,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise progress; ignored once terminal or when lower than the current value
    pub(crate) fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.is_terminal() || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Move to a terminal status; the first call wins
    ///
    /// Returns the status the task ends up in.
    pub(crate) fn finalize(&mut self, status: TaskStatus, result: Option<Value>, failure: Option<TaskFailure>) -> TaskStatus {
        if self.is_terminal() || !status.is_terminal() {
            return self.status;
        }
        self.status = status;
        if status == TaskStatus::Completed {
            self.progress = 100;
        }
        self.result = result;
        self.failure = failure;
        self.ended_at = Some(Utc::now());
        self.status
    }

    /// Wall-clock duration, up to now if still running
    pub fn elapsed(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// What a caller gets back from `begin_task`
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: String,
    /// Fired on expiry or cancellation; the holder of the transport must stop
    pub token: CancellationToken,
}
