//! Task/stream registry
//!
//! Tracks the lifecycle of every unit of work: admission under the
//! concurrency limit, progress, deadlines and the single terminal status.
//! The registry reports conditions; it never touches a transport. Expiry
//! and cancellation fire the task's token and the holder of the transport
//! reacts to it.

mod manager;
mod messages;
mod session;
mod task;

pub use manager::TaskRegistry;
pub use messages::{RegistryCommand, RegistryError, RegistryResponse, RegistryStats};
pub use session::{SessionStatus, StreamSession};
pub use task::{Task, TaskFailure, TaskHandle, TaskStatus};
