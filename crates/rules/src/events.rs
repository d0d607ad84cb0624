//! Domain events that trigger scope work, and the sink that turns them into tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rulescope_core::{PostId, RuleId, TermRef, TicketId};
use rulescope_queue::TaskQueue;

use crate::error::Result;
use crate::task::{CleanupTask, ScopeCause, ScopeTask, Task};

/// Topic constants, `rulescope.<domain>.<event>`.
pub mod topics {
    /// A rule was created, re-activated, or its scope changed.
    pub const RULE_SCOPE_UPDATED: &str = "rulescope.rule.scope_updated";

    /// A post gained or lost tickets, or its terms changed.
    pub const POST_TICKETS_CHANGED: &str = "rulescope.post.tickets_changed";

    /// A ticket was created or moved to another post.
    pub const TICKET_CHANGED: &str = "rulescope.ticket.changed";

    /// A tag, category, venue or series term was deleted.
    pub const TERM_DELETED: &str = "rulescope.term.deleted";

    /// Operator asked for a full rebuild.
    pub const SWEEP_REQUESTED: &str = "rulescope.sweep.requested";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeEvent {
    RuleScopeUpdated { rule_id: RuleId },
    PostTicketsChanged { post_id: PostId },
    TicketChanged { ticket_id: TicketId },
    TermDeleted { term: TermRef },
    SweepRequested,
}

impl ScopeEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ScopeEvent::RuleScopeUpdated { .. } => topics::RULE_SCOPE_UPDATED,
            ScopeEvent::PostTicketsChanged { .. } => topics::POST_TICKETS_CHANGED,
            ScopeEvent::TicketChanged { .. } => topics::TICKET_CHANGED,
            ScopeEvent::TermDeleted { .. } => topics::TERM_DELETED,
            ScopeEvent::SweepRequested => topics::SWEEP_REQUESTED,
        }
    }

    /// The cursor-0 task that handles this event.
    pub fn task(&self) -> Task {
        match *self {
            ScopeEvent::RuleScopeUpdated { rule_id } => {
                ScopeTask::start(ScopeCause::Rule(rule_id)).into()
            }
            ScopeEvent::PostTicketsChanged { post_id } => {
                ScopeTask::start(ScopeCause::Post(post_id)).into()
            }
            ScopeEvent::TicketChanged { ticket_id } => {
                ScopeTask::start(ScopeCause::Ticket(ticket_id)).into()
            }
            ScopeEvent::TermDeleted { term } => CleanupTask::start(term).into(),
            ScopeEvent::SweepRequested => ScopeTask::start(ScopeCause::Sweep).into(),
        }
    }
}

/// Receives domain events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ScopeEvent) -> Result<()>;
}

/// Event sink that enqueues the task for each event.
///
/// Also the single path through which jobs dispatch their continuations, so
/// every task carries the same retry budget.
#[derive(Clone)]
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    max_retries: u32,
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, max_retries: u32) -> Self {
        Self { queue, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn dispatch(&self, task: impl Into<Task>) -> Result<()> {
        let task = task.into();
        debug!(task = %task, "dispatching");
        self.queue.dispatch(task.to_message(self.max_retries)?).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for TaskDispatcher {
    async fn publish(&self, event: ScopeEvent) -> Result<()> {
        debug!(topic = event.topic(), "scope event");
        self.dispatch(event.task()).await
    }
}

#[cfg(test)]
mod tests {
    use rulescope_core::TermType;
    use rulescope_queue::MemoryQueue;

    use super::*;

    #[test]
    fn every_event_has_its_own_topic() {
        let events = [
            ScopeEvent::RuleScopeUpdated { rule_id: 1 },
            ScopeEvent::PostTicketsChanged { post_id: 1 },
            ScopeEvent::TicketChanged { ticket_id: 1 },
            ScopeEvent::TermDeleted {
                term: TermRef::new(TermType::Tag, 1),
            },
            ScopeEvent::SweepRequested,
        ];
        let mut topics: Vec<_> = events.iter().map(|e| e.topic()).collect();
        topics.sort();
        topics.dedup();
        assert_eq!(topics.len(), events.len());
    }

    #[tokio::test]
    async fn dispatcher_enqueues_cursor_zero_tasks() {
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = TaskDispatcher::new(queue.clone(), 9);

        dispatcher
            .publish(ScopeEvent::TicketChanged { ticket_id: 300 })
            .await
            .unwrap();
        dispatcher
            .publish(ScopeEvent::TermDeleted {
                term: TermRef::new(TermType::Venue, 3),
            })
            .await
            .unwrap();

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|m| m.max_retries == 9 && m.attempt == 0));
        assert_eq!(
            Task::from_message(&pending[0]).unwrap(),
            Task::Scope(ScopeTask::start(ScopeCause::Ticket(300)))
        );
        assert_eq!(
            Task::from_message(&pending[1]).unwrap(),
            Task::Cleanup(CleanupTask::start(TermRef::new(TermType::Venue, 3)))
        );
    }
}
