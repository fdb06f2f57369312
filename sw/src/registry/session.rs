//! StreamSession - one in-flight streaming call and its decode state
//!
//! Owned by whoever opened it; never shared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decode::Emission;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Processing,
    Completed,
    Error,
    Timeout,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Processing)
    }
}

impl From<ErrorKind> for SessionStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => SessionStatus::Timeout,
            ErrorKind::Cancelled => SessionStatus::Cancelled,
            _ => SessionStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: String,
    pub task_id: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub raw: String,
    pub snapshot: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            task_id: task_id.into(),
            status: SessionStatus::Processing,
            progress: 0,
            raw: String::new(),
            snapshot: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append raw text while processing
    pub fn append(&mut self, chunk: &str) {
        if !self.is_terminal() {
            self.raw.push_str(chunk);
        }
    }

    /// Record a decoder snapshot
    ///
    /// Returns false (and changes nothing) once terminal. Progress never
    /// decreases and stays below 100 until completion.
    pub fn record(&mut self, emission: &Emission) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.progress = self.progress.max(emission.progress().min(99));
        self.snapshot = Some(emission.value().clone());
        true
    }

    pub fn complete(&mut self, value: Value) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Completed;
        self.progress = 100;
        self.snapshot = Some(value);
        self.ended_at = Some(Utc::now());
        true
    }

    /// End without a value; progress stays frozen
    pub fn fail(&mut self, kind: ErrorKind) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SessionStatus::from(kind);
        self.ended_at = Some(Utc::now());
        true
    }
}
