//! SpecWeaver - streaming generation pipeline
//!
//! SpecWeaver turns a free-form product description into requirements,
//! design diagrams, generated source files and repairs, one phase at a
//! time. Every phase talks to an LLM backend whose output arrives as an
//! unreliable, incremental text stream.
//!
//! # Core Concepts
//!
//! - **Incremental decoding**: partial model output is decoded into usable
//!   snapshots while it streams, and resolved as soon as it is complete
//! - **Deterministic caching**: identical requests are served from a
//!   fingerprint-keyed cache instead of the backend
//! - **Bounded work**: every generation runs as a registry task with a
//!   deadline and a concurrency limit
//! - **Gated phases**: a phase only starts once the one before it completed
//!
//! # Modules
//!
//! - [`decode`] - Stream decoder for JSON and fenced-code targets
//! - [`cache`] - Fingerprint-keyed result cache
//! - [`registry`] - Task/stream registry actor
//! - [`facade`] - Domain façades and the shared generator
//! - [`orchestrator`] - Phase state machine
//! - [`events`] - Event bus, emitter and JSONL logger
//! - [`llm`] - LLM client trait and provider implementations
//! - [`persistence`] - Snapshot persistence and autosave
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cache;
pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod facade;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod prompts;
pub mod registry;

// Re-export commonly used types
pub use cache::{Cached, CacheStats, Fingerprint, ResultCache};
pub use config::{Config, LlmConfig};
pub use decode::{Decoder, Emission, Target};
pub use error::{ErrorKind, PersistenceError, PipelineError};
pub use events::{Emitter, Envelope, Event, EventBus, EventLogger, LogLevel, read_run_events, spawn_event_logger};
pub use facade::{
    CodegenFacade, DesignFacade, Facade, GenerationSettings, Generator, PhaseOutcome, RepairFacade,
    RequirementsFacade, RunOptions,
};
pub use llm::{AnthropicClient, GenerationRequest, LlmClient, LlmError, OpenAIClient, StreamChunk, create_client};
pub use orchestrator::{Orchestrator, Phase, PhaseState, WorkflowState, WorkflowStatus, export_all};
pub use persistence::{AutoSaver, MemoryPersistence, Persistence, SnapPersistence};
pub use prompts::{PromptLoader, Template};
pub use registry::{StreamSession, TaskRegistry, TaskStatus};
