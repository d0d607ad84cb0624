//! Rule-caused rebuild: which ticketed posts does one rule apply to?

use tracing::{debug, info};

use rulescope_core::{Rule, RuleId};
use rulescope_storage::{Generation, OverrideKind, RebuildTarget};

use super::{Chain, Page, ScopeRecompute, Step};
use crate::error::Result;
use crate::task::{ScopeCause, ScopeTask};

impl ScopeRecompute {
    pub(super) async fn rule_step(&self, rule_id: RuleId, chain: Chain, batch_size: u64) -> Result<Step> {
        let Some(rule) = self.stores.rules.rule(rule_id).await? else {
            debug!(rule_id, "rule no longer exists, nothing to rebuild");
            return Ok(Step::Skipped);
        };
        self.rebuild_rule(&rule, chain, batch_size).await
    }

    /// Process one page of ticketed posts for `rule`.
    pub(super) async fn rebuild_rule(&self, rule: &Rule, chain: Chain, batch_size: u64) -> Result<Step> {
        let index = &self.stores.index;
        let target = RebuildTarget::Rule(rule.id);
        let cursor = chain.cursor;

        if !rule.is_active() {
            let removed = index.delete_rule_rows(rule.id).await?;
            info!(rule_id = rule.id, removed, "inactive rule cleared");
            return Ok(Step::Cleared { removed });
        }

        let generation = if cursor == 0 {
            let generation = index.begin_rebuild(target).await?;
            debug!(rule_id = rule.id, generation, "rule rebuild started");
            generation
        } else {
            chain.generation
        };

        let posts = self
            .stores
            .posts
            .ticketed_posts_page(batch_size.saturating_add(1), cursor)
            .await?;
        let page = Page::from_lookahead(posts, batch_size);

        let matched: Vec<_> = page
            .items
            .iter()
            .filter(|post| self.matcher.matches(rule, post))
            .map(|post| post.id)
            .collect();
        if index.stage_rows(target, generation, &matched).await?.is_none() {
            return Ok(superseded(rule.id, cursor, generation));
        }
        // Automatic membership replaces a manual enable.
        for &post_id in &matched {
            self.stores
                .overrides
                .remove_override(post_id, rule.id, OverrideKind::Enabled)
                .await?;
        }
        let staged = matched.len();

        if page.more {
            let next_cursor = cursor.saturating_add(batch_size);
            self.dispatcher
                .dispatch(ScopeTask {
                    cause: ScopeCause::Rule(rule.id),
                    cursor: next_cursor,
                    generation,
                })
                .await?;
            info!(rule_id = rule.id, cursor, staged, next_cursor, "rule page staged");
            return Ok(Step::Continued { staged, next_cursor });
        }

        let Some(promoted) = index.promote(target, generation).await? else {
            return Ok(superseded(rule.id, cursor, generation));
        };
        info!(rule_id = rule.id, cursor, staged, promoted, "rule scope finalized");
        Ok(Step::Finalized { staged, promoted })
    }
}

fn superseded(rule_id: RuleId, cursor: u64, generation: Generation) -> Step {
    info!(rule_id, cursor, generation, "rule rebuild superseded, chain stopped");
    Step::Superseded { generation }
}
