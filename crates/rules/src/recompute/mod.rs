//! Scope recomputation: rebuilds slices of the relationship index in batches.
//!
//! A rebuild writes its rows under a staging id (see `rulescope_core::staging`)
//! and only swaps them in once the last page has been processed, so canonical
//! readers keep seeing the previous membership until the swap.
//!
//! Every chain that starts at cursor 0 begins a new rebuild generation and
//! carries it in its continuations. When a second chain for the same rule or
//! post begins, the first one's staging and promotion are refused and it stops
//! with [`Step::Superseded`]; only the newest chain promotes, and it promotes
//! the complete set it staged.
//!
//! Pages are fetched with one look-ahead row: a page that returns at most
//! `batch_size` rows is the last one. A collection of N items therefore takes
//! exactly `ceil(N / batch_size)` executions (one when it is empty).

mod post;
mod rule;

use std::sync::Arc;

use tracing::info;

use rulescope_storage::{Generation, Stores};

use crate::error::Result;
use crate::events::TaskDispatcher;
use crate::matcher::ScopeMatcher;
use crate::task::{ScopeCause, ScopeTask};

/// Result of a single recomputation execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Last page processed; staged rows were promoted to canonical.
    Finalized { staged: usize, promoted: u64 },
    /// Page processed and a continuation dispatched.
    Continued { staged: usize, next_cursor: u64 },
    /// Rows deleted without a rebuild (inactive rule, post without tickets).
    Cleared { removed: u64 },
    /// Nothing to rebuild (missing rule or ticket).
    Skipped,
    /// A newer rebuild of the same rule or post began; this chain stopped.
    Superseded { generation: Generation },
    /// A page of active rules was rebuilt by a sweep.
    Swept { rules: usize, next_cursor: Option<u64> },
}

/// Position of one execution within a rebuild chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chain {
    cursor: u64,
    generation: Generation,
}

impl Chain {
    const START: Chain = Chain {
        cursor: 0,
        generation: 0,
    };

    fn of(task: &ScopeTask) -> Self {
        Self {
            cursor: task.cursor,
            generation: task.generation,
        }
    }
}

/// A page fetched with one look-ahead row.
struct Page<T> {
    items: Vec<T>,
    more: bool,
}

impl<T> Page<T> {
    fn from_lookahead(mut items: Vec<T>, batch_size: u64) -> Self {
        let limit = usize::try_from(batch_size).unwrap_or(usize::MAX);
        let more = items.len() > limit;
        items.truncate(limit);
        Self { items, more }
    }
}

/// The scope recomputation job.
#[derive(Clone)]
pub struct ScopeRecompute {
    stores: Stores,
    matcher: Arc<dyn ScopeMatcher>,
    dispatcher: TaskDispatcher,
}

impl ScopeRecompute {
    pub fn new(stores: Stores, matcher: Arc<dyn ScopeMatcher>, dispatcher: TaskDispatcher) -> Self {
        Self {
            stores,
            matcher,
            dispatcher,
        }
    }

    /// Execute one step of `task`, processing at most `batch_size` items.
    pub async fn execute(&self, task: &ScopeTask, batch_size: u64) -> Result<Step> {
        let batch_size = batch_size.max(1);
        match task.cause {
            ScopeCause::Rule(rule_id) => self.rule_step(rule_id, Chain::of(task), batch_size).await,
            ScopeCause::Post(post_id) => self.post_step(post_id, Chain::of(task), batch_size).await,
            ScopeCause::Ticket(ticket_id) => self.ticket_step(ticket_id, batch_size).await,
            ScopeCause::Sweep => self.sweep_step(task, batch_size).await,
        }
    }

    /// Rebuild every rule of one page of active rules, each from cursor 0.
    async fn sweep_step(&self, task: &ScopeTask, batch_size: u64) -> Result<Step> {
        let rows = self
            .stores
            .rules
            .active_rules_page(batch_size.saturating_add(1), task.cursor)
            .await?;
        let page = Page::from_lookahead(rows, batch_size);

        for rule in &page.items {
            self.rebuild_rule(rule, Chain::START, batch_size).await?;
        }

        let next_cursor = if page.more {
            let next = task.cursor.saturating_add(batch_size);
            self.dispatcher.dispatch(task.at(next)).await?;
            Some(next)
        } else {
            None
        };
        info!(
            cursor = task.cursor,
            rules = page.items.len(),
            next_cursor = ?next_cursor,
            "sweep page processed"
        );
        Ok(Step::Swept {
            rules: page.items.len(),
            next_cursor,
        })
    }
}
