pub mod consumer;
pub mod error;
pub mod message;
pub mod runner;

pub use consumer::{MemoryQueue, TaskQueue};
pub use error::QueueError;
pub use message::TaskMessage;
pub use runner::{AbandonedTask, RunOutcome, RunStats, TaskHandler, TaskRunner};
