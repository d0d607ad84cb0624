//! Purchase-rule scope materialization.
//!
//! This crate provides:
//! - Batched, resumable recomputation of the rule/post relationship index
//! - Cleanup of rule scopes when a referenced term is deleted
//! - Effective rule resolution combining the index with manual overrides
//! - The rule persistence hook and the event-to-task dispatcher

pub mod cleanup;
pub mod engine;
pub mod error;
pub mod events;
pub mod matcher;
pub mod recompute;
pub mod resolver;
pub mod service;
pub mod task;
pub mod worker;

pub use cleanup::{CleanupStep, CriterionCleanup};
pub use engine::ScopeEngine;
pub use error::RulesError;
pub use events::{EventSink, ScopeEvent, TaskDispatcher};
pub use matcher::{ScopeMatcher, TermMatcher};
pub use recompute::{ScopeRecompute, Step};
pub use resolver::{AdminEntry, RuleResolver, RuleSource};
pub use service::RuleService;
pub use task::{CleanupTask, ScopeCause, ScopeTask, Task, CRITERION_CLEANUP, SCOPE_RECOMPUTE};
pub use worker::ScopeWorker;
