//! Event Bus - central pub/sub system for pipeline events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all subscribers
//! with minimal latency. Components emit events, consumers (CLI, loggers) subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Envelope, Event, LogLevel};
use crate::error::PipelineError;
use crate::orchestrator::Phase;

/// Default channel capacity (events)
/// Stream updates dominate; this buffers several long streams
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus
///
/// Cheap to clone: every clone sends into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Publish an envelope to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped. If the
    /// channel is full, the oldest events are dropped for slow receivers.
    pub fn publish(&self, envelope: Envelope) {
        debug!(
            event = %envelope.event.name(),
            correlation_id = %envelope.correlation_id,
            "EventBus::publish"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter for a workflow run, correlated to the run itself
    pub fn emitter_for(&self, run_id: impl Into<String>) -> Emitter {
        let run_id = run_id.into();
        debug!(%run_id, "EventBus::emitter_for: creating emitter");
        Emitter {
            bus: self.clone(),
            correlation_id: run_id.clone(),
            run_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
///
/// Bound to a run id and a correlation id; `correlated` derives an emitter
/// for a task or stream within the same run.
#[derive(Clone)]
pub struct Emitter {
    bus: EventBus,
    run_id: String,
    correlation_id: String,
}

impl Emitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Same run, different correlation id
    pub fn correlated(&self, correlation_id: impl Into<String>) -> Emitter {
        Emitter {
            bus: self.bus.clone(),
            run_id: self.run_id.clone(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Emit a raw event
    pub fn emit(&self, event: Event) {
        self.bus
            .publish(Envelope::new(self.run_id.clone(), self.correlation_id.clone(), event));
    }

    // === Convenience methods ===

    pub fn phase_started(&self, phase: Phase) {
        self.emit(Event::PhaseStarted { phase });
    }

    pub fn phase_completed(&self, phase: Phase) {
        self.emit(Event::PhaseCompleted { phase });
    }

    pub fn phase_unavailable(&self, phase: Phase) {
        self.emit(Event::PhaseUnavailable { phase });
    }

    pub fn operation_started(&self, operation: &str) {
        self.emit(Event::OperationStarted {
            operation: operation.to_string(),
        });
    }

    pub fn operation_completed(&self, operation: &str, from_cache: bool, summary: impl Into<String>) {
        self.emit(Event::OperationCompleted {
            operation: operation.to_string(),
            from_cache,
            summary: summary.into(),
        });
    }

    pub fn operation_failed(&self, operation: &str, phase: Option<Phase>, err: &PipelineError) {
        self.emit(Event::OperationFailed {
            operation: operation.to_string(),
            phase,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn stream_update(&self, stream_id: &str, progress: u8, snapshot: serde_json::Value) {
        self.emit(Event::StreamUpdate {
            stream_id: stream_id.to_string(),
            progress,
            snapshot,
        });
    }

    pub fn stream_completed(&self, stream_id: &str) {
        self.emit(Event::StreamCompleted {
            stream_id: stream_id.to_string(),
        });
    }

    pub fn stream_failed(&self, stream_id: &str, err: &PipelineError) {
        self.emit(Event::StreamFailed {
            stream_id: stream_id.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn timeout(&self, task_id: &str) {
        self.emit(Event::Timeout {
            task_id: task_id.to_string(),
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log {
            level,
            message: message.into(),
        });
    }

    pub fn workflow_failed(&self, phase: Phase, message: impl Into<String>) {
        self.emit(Event::WorkflowFailed {
            phase,
            message: message.into(),
        });
    }
}
