//! Rule persistence hook.
//!
//! All rule writes go through [`RuleService`] so that scope changes always
//! enqueue a rebuild and deactivation clears the index before returning.

use std::sync::Arc;

use tracing::info;

use rulescope_core::{NewRule, Rule, RuleId, RuleStatus};
use rulescope_storage::{OverrideStore, RelationshipIndex, RuleStore, Stores};

use crate::error::{Result, RulesError};
use crate::events::{EventSink, ScopeEvent};

#[derive(Clone)]
pub struct RuleService {
    rules: Arc<dyn RuleStore>,
    index: Arc<dyn RelationshipIndex>,
    overrides: Arc<dyn OverrideStore>,
    events: Arc<dyn EventSink>,
}

impl RuleService {
    pub fn new(stores: &Stores, events: Arc<dyn EventSink>) -> Self {
        Self {
            rules: stores.rules.clone(),
            index: stores.index.clone(),
            overrides: stores.overrides.clone(),
            events,
        }
    }

    pub async fn create(&self, rule: NewRule) -> Result<Rule> {
        let rule = self.rules.insert_rule(rule).await?;
        info!(rule_id = rule.id, rule_type = %rule.rule_type, status = %rule.status, "rule created");
        if rule.is_active() {
            self.events
                .publish(ScopeEvent::RuleScopeUpdated { rule_id: rule.id })
                .await?;
        }
        Ok(rule)
    }

    /// Save `rule` over its stored version.
    ///
    /// An inactive rule loses its relationship rows before this returns and no
    /// task is dispatched. An active rule whose scope changed, or that was
    /// just re-activated, gets a rebuild enqueued.
    pub async fn update(&self, rule: &Rule) -> Result<Rule> {
        let previous = self
            .rules
            .rule(rule.id)
            .await?
            .ok_or(RulesError::RuleNotFound(rule.id))?;
        let saved = self.rules.save_rule(rule).await?;

        if !saved.is_active() {
            let removed = self.index.delete_rule_rows(saved.id).await?;
            info!(rule_id = saved.id, removed, "rule saved inactive, relationships cleared");
        } else if !previous.is_active() || previous.scope != saved.scope {
            info!(rule_id = saved.id, "rule scope updated");
            self.events
                .publish(ScopeEvent::RuleScopeUpdated { rule_id: saved.id })
                .await?;
        }
        Ok(saved)
    }

    pub async fn set_status(&self, rule_id: RuleId, status: RuleStatus) -> Result<Rule> {
        let mut rule = self
            .rules
            .rule(rule_id)
            .await?
            .ok_or(RulesError::RuleNotFound(rule_id))?;
        rule.status = status;
        self.update(&rule).await
    }

    /// Remove a rule with its relationship rows and override entries.
    /// Returns `false` when the rule did not exist.
    pub async fn delete(&self, rule_id: RuleId) -> Result<bool> {
        let existed = self.rules.delete_rule(rule_id).await?;
        let removed = self.index.delete_rule_rows(rule_id).await?;
        let purged = self.overrides.purge_rule_overrides(rule_id).await?;
        info!(rule_id, existed, removed, purged, "rule deleted");
        Ok(existed)
    }
}
