//! Effective rule resolution: automatic membership combined with manual overrides.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use rulescope_core::{PostId, Rule, RuleId, RuleType};
use rulescope_storage::{OverrideKind, OverrideStore, RelationshipIndex, RuleStore, Stores};

use crate::error::Result;

/// Why a rule shows up for a post in the admin view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// Selected by the rule's scope.
    Automatic,
    /// Enabled by hand for this post.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminEntry {
    pub rule: Rule,
    pub enabled: bool,
    pub source: RuleSource,
}

#[derive(Clone)]
pub struct RuleResolver {
    rules: Arc<dyn RuleStore>,
    index: Arc<dyn RelationshipIndex>,
    overrides: Arc<dyn OverrideStore>,
}

impl RuleResolver {
    pub fn new(stores: &Stores) -> Self {
        Self {
            rules: stores.rules.clone(),
            index: stores.index.clone(),
            overrides: stores.overrides.clone(),
        }
    }

    /// Switch a rule on or off for one post.
    ///
    /// Automatic rules are switched through the disabled set, anything else
    /// through the enabled set, so a rule never sits in both `auto` and
    /// `manual_enabled`.
    pub async fn toggle(&self, rule_id: RuleId, post_id: PostId, enabled: bool) -> Result<()> {
        let auto = self.index.rules_for_post(post_id).await?;
        let overrides = self.overrides.overrides(post_id).await?;

        if auto.contains(&rule_id) {
            if enabled {
                self.overrides
                    .remove_override(post_id, rule_id, OverrideKind::Disabled)
                    .await?;
            } else {
                self.overrides
                    .add_override(post_id, rule_id, OverrideKind::Disabled)
                    .await?;
            }
        }

        if !enabled && overrides.manually_enabled.contains(&rule_id) {
            self.overrides
                .remove_override(post_id, rule_id, OverrideKind::Enabled)
                .await?;
        }

        if enabled && !overrides.manually_disabled.contains(&rule_id) && !auto.contains(&rule_id) {
            self.overrides
                .add_override(post_id, rule_id, OverrideKind::Enabled)
                .await?;
        }

        debug!(rule_id, post_id, enabled, automatic = auto.contains(&rule_id), "rule toggled");
        Ok(())
    }

    /// `(auto \ manual_disabled) ∪ manual_enabled`, before hydration.
    pub async fn effective_rule_ids(&self, post_id: PostId) -> Result<BTreeSet<RuleId>> {
        let auto = self.index.rules_for_post(post_id).await?;
        let overrides = self.overrides.overrides(post_id).await?;
        Ok(auto
            .into_iter()
            .filter(|id| !overrides.manually_disabled.contains(id))
            .chain(overrides.manually_enabled)
            .collect())
    }

    /// Active rules a post honors at checkout, ordered by id.
    pub async fn effective_rules(&self, post_id: PostId) -> Result<Vec<Rule>> {
        let ids: Vec<_> = self.effective_rule_ids(post_id).await?.into_iter().collect();
        let mut rules = self.rules.rules(&ids).await?;
        rules.retain(Rule::is_active);
        Ok(rules)
    }

    pub async fn effective_rules_of_type(&self, post_id: PostId, rule_type: RuleType) -> Result<Vec<Rule>> {
        let mut rules = self.effective_rules(post_id).await?;
        rules.retain(|r| r.rule_type == rule_type);
        Ok(rules)
    }

    /// Every rule an administrator can switch for a post, with its current state.
    pub async fn effective_rules_admin(&self, post_id: PostId) -> Result<Vec<AdminEntry>> {
        let auto = self.index.rules_for_post(post_id).await?;
        let overrides = self.overrides.overrides(post_id).await?;

        let manual: BTreeSet<RuleId> = overrides
            .manually_enabled
            .iter()
            .copied()
            .filter(|id| !auto.contains(id))
            .collect();
        let ids: Vec<_> = auto.union(&manual).copied().collect();

        Ok(self
            .rules
            .rules(&ids)
            .await?
            .into_iter()
            .filter(Rule::is_active)
            .map(|rule| {
                let automatic = auto.contains(&rule.id);
                AdminEntry {
                    enabled: !automatic || !overrides.manually_disabled.contains(&rule.id),
                    source: if automatic { RuleSource::Automatic } else { RuleSource::Manual },
                    rule,
                }
            })
            .collect())
    }
}
