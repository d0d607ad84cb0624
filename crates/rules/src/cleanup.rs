//! Criterion cleanup: strip a deleted term from rule scopes.

use std::sync::Arc;

use tracing::{debug, info};

use rulescope_core::{Scope, TermRef};
use rulescope_storage::RuleStore;

use crate::error::Result;
use crate::events::TaskDispatcher;
use crate::service::RuleService;
use crate::task::CleanupTask;

/// Result of one cleanup execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStep {
    /// Rules on this page whose scope was rewritten.
    pub changed: usize,
    /// Cursor of the dispatched continuation, if any.
    pub next_cursor: Option<u64>,
}

/// `scope` with every criterion equal to `term` removed, or `None` when the
/// scope does not reference it. A boolean scope left without criteria
/// becomes `none`.
pub fn strip_term(scope: &Scope, term: TermRef) -> Option<Scope> {
    if scope.connector.ignores_criteria() {
        return None;
    }
    let kept: Vec<_> = scope
        .criteria
        .iter()
        .copied()
        .filter(|c| c.term_ref() != term)
        .collect();
    if kept.len() == scope.criteria.len() {
        return None;
    }
    if kept.is_empty() {
        return Some(Scope::none());
    }
    Some(Scope {
        connector: scope.connector,
        criteria: kept,
    })
}

#[derive(Clone)]
pub struct CriterionCleanup {
    rules: Arc<dyn RuleStore>,
    service: RuleService,
    dispatcher: TaskDispatcher,
}

impl CriterionCleanup {
    pub fn new(rules: Arc<dyn RuleStore>, service: RuleService, dispatcher: TaskDispatcher) -> Self {
        Self {
            rules,
            service,
            dispatcher,
        }
    }

    /// Process one page of rules (any status), ordered by id.
    pub async fn execute(&self, task: &CleanupTask, batch_size: u64) -> Result<CleanupStep> {
        let batch_size = batch_size.max(1);
        let mut rules = self
            .rules
            .rules_page(batch_size.saturating_add(1), task.cursor)
            .await?;
        let limit = usize::try_from(batch_size).unwrap_or(usize::MAX);
        let more = rules.len() > limit;
        rules.truncate(limit);

        let mut changed = 0;
        for mut rule in rules {
            let Some(scope) = rule.scope.as_ref().and_then(|s| strip_term(s, task.term)) else {
                continue;
            };
            debug!(rule_id = rule.id, term = %task.term, "removing deleted term from scope");
            rule.scope = Some(scope);
            self.service.update(&rule).await?;
            changed += 1;
        }

        let next_cursor = if more {
            let next = task.cursor.saturating_add(batch_size);
            self.dispatcher.dispatch(task.at(next)).await?;
            Some(next)
        } else {
            None
        };
        info!(
            term = %task.term,
            cursor = task.cursor,
            changed,
            next_cursor = ?next_cursor,
            "criterion cleanup page processed"
        );
        Ok(CleanupStep {
            changed,
            next_cursor,
        })
    }
}
