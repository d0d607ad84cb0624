//! Task payloads carried in queue messages.
//!
//! A task is immutable: a continuation is a new task with an advanced cursor,
//! never a mutation of the one being executed.

use std::fmt;

use serde::{Deserialize, Serialize};

use rulescope_core::{PostId, RuleId, TermRef, TicketId};
use rulescope_queue::{QueueError, TaskMessage};
use rulescope_storage::Generation;

use crate::error::{Result, RulesError};

/// Task name of a scope recomputation step.
pub const SCOPE_RECOMPUTE: &str = "rulescope.scope_recompute";

/// Task name of a criterion cleanup step.
pub const CRITERION_CLEANUP: &str = "rulescope.criterion_cleanup";

/// What a scope recomputation rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeCause {
    Rule(RuleId),
    Post(PostId),
    Ticket(TicketId),
    /// No cause: every active rule.
    Sweep,
}

impl fmt::Display for ScopeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeCause::Rule(id) => write!(f, "rule:{id}"),
            ScopeCause::Post(id) => write!(f, "post:{id}"),
            ScopeCause::Ticket(id) => write!(f, "ticket:{id}"),
            ScopeCause::Sweep => f.write_str("sweep"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTask {
    pub cause: ScopeCause,
    /// Offset of the page this execution processes.
    #[serde(default)]
    pub cursor: u64,
    /// Rebuild a continuation belongs to. Zero until a chain has begun; a task
    /// at cursor 0 always begins a new rebuild.
    #[serde(default)]
    pub generation: Generation,
}

impl ScopeTask {
    /// A fresh chain for `cause`, starting at cursor 0.
    pub fn start(cause: ScopeCause) -> Self {
        Self {
            cause,
            cursor: 0,
            generation: 0,
        }
    }

    pub fn at(&self, cursor: u64) -> Self {
        Self { cursor, ..*self }
    }

    pub fn in_generation(&self, generation: Generation) -> Self {
        Self { generation, ..*self }
    }
}

impl fmt::Display for ScopeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cause, self.cursor)?;
        if self.generation > 0 {
            write!(f, "#{}", self.generation)?;
        }
        Ok(())
    }
}

/// Strip a deleted term from every rule scope, one page of rules at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTask {
    pub term: TermRef,
    #[serde(default)]
    pub cursor: u64,
}

impl CleanupTask {
    pub fn start(term: TermRef) -> Self {
        Self { term, cursor: 0 }
    }

    pub fn at(&self, cursor: u64) -> Self {
        Self {
            term: self.term,
            cursor,
        }
    }
}

impl fmt::Display for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup:{}@{}", self.term, self.cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Scope(ScopeTask),
    Cleanup(CleanupTask),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Scope(_) => SCOPE_RECOMPUTE,
            Task::Cleanup(_) => CRITERION_CLEANUP,
        }
    }

    pub fn to_message(&self, max_retries: u32) -> std::result::Result<TaskMessage, QueueError> {
        match self {
            Task::Scope(task) => TaskMessage::new(SCOPE_RECOMPUTE, task, max_retries),
            Task::Cleanup(task) => TaskMessage::new(CRITERION_CLEANUP, task, max_retries),
        }
    }

    pub fn from_message(message: &TaskMessage) -> Result<Self> {
        match message.name.as_str() {
            SCOPE_RECOMPUTE => Ok(Task::Scope(message.decode()?)),
            CRITERION_CLEANUP => Ok(Task::Cleanup(message.decode()?)),
            other => Err(RulesError::UnknownTask(other.to_string())),
        }
    }
}

impl From<ScopeTask> for Task {
    fn from(task: ScopeTask) -> Self {
        Task::Scope(task)
    }
}

impl From<CleanupTask> for Task {
    fn from(task: CleanupTask) -> Self {
        Task::Cleanup(task)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Scope(task) => fmt::Display::fmt(task, f),
            Task::Cleanup(task) => fmt::Display::fmt(task, f),
        }
    }
}
