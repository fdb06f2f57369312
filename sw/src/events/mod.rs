//! Event bus for pipeline observability
//!
//! Every lifecycle transition in the pipeline is published as a typed event.
//! The bus is the only integration surface for a UI or CLI: consumers
//! subscribe and correlate by task or stream id, never by arrival order.
//!
//! # Architecture
//!
//! ```text
//!   Orchestrator      Façades        Registry
//!   - phase:*         - <op>:*       - timeout
//!                     - stream:*     - log
//!        │               │              │
//!        └───────────────┼──────────────┘
//!                        ▼
//!   ┌───────────────────────────────────────────┐
//!   │                 EVENT BUS                 │
//!   │      (tokio::sync::broadcast channel)     │
//!   └───────────────────────────────────────────┘
//!               │                   │
//!               ▼                   ▼
//!         CLI printer         JSONL logger
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use specweaver::events::EventBus;
//! use specweaver::orchestrator::Phase;
//!
//! let bus = EventBus::with_default_capacity();
//! let emitter = bus.emitter_for("run-123");
//! emitter.phase_started(Phase::Requirements);
//!
//! let mut rx = bus.subscribe();
//! while let Ok(envelope) = rx.recv().await {
//!     println!("{} {}", envelope.event.name(), envelope.correlation_id);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, Emitter, EventBus};
pub use logger::{EventLogger, read_run_events, spawn_event_logger};
pub use types::{Envelope, Event, LogLevel};
