//! Error type shared by the scope jobs, the resolver and the rule service.

use rulescope_core::RuleId;
use rulescope_queue::QueueError;
use rulescope_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("unknown task: {0}")]
    UnknownTask(String),
}

/// Result alias for rule engine operations.
pub type Result<T> = std::result::Result<T, RulesError>;
