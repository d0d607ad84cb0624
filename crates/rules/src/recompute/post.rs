//! Post- and ticket-caused rebuilds: which active rules apply to one post?

use tracing::{debug, info};

use rulescope_core::{PostId, TicketId};
use rulescope_storage::{Generation, OverrideKind, RebuildTarget};

use super::{Chain, Page, ScopeRecompute, Step};
use crate::error::Result;
use crate::task::{ScopeCause, ScopeTask};

impl ScopeRecompute {
    pub(super) async fn post_step(&self, post_id: PostId, chain: Chain, batch_size: u64) -> Result<Step> {
        let posts = &self.stores.posts;
        let index = &self.stores.index;
        let post_id = posts.normalize_post_id(post_id).await?;
        let target = RebuildTarget::Post(post_id);
        let cursor = chain.cursor;

        let post = match posts.post(post_id).await? {
            Some(post) => post,
            None => return self.clear_post(post_id, "post gone").await,
        };
        if !posts.has_tickets(post_id).await? {
            return self.clear_post(post_id, "post has no tickets").await;
        }

        let generation = if cursor == 0 {
            let generation = index.begin_rebuild(target).await?;
            debug!(post_id, generation, "post rebuild started");
            generation
        } else {
            chain.generation
        };

        let rules = self
            .stores
            .rules
            .active_rules_page(batch_size.saturating_add(1), cursor)
            .await?;
        let page = Page::from_lookahead(rules, batch_size);

        let matched: Vec<_> = page
            .items
            .iter()
            .filter(|rule| self.matcher.matches(rule, &post))
            .map(|rule| rule.id)
            .collect();
        if index.stage_rows(target, generation, &matched).await?.is_none() {
            return Ok(superseded(post_id, cursor, generation));
        }
        for &rule_id in &matched {
            self.stores
                .overrides
                .remove_override(post_id, rule_id, OverrideKind::Enabled)
                .await?;
        }
        let staged = matched.len();

        if page.more {
            let next_cursor = cursor.saturating_add(batch_size);
            self.dispatcher
                .dispatch(ScopeTask {
                    cause: ScopeCause::Post(post_id),
                    cursor: next_cursor,
                    generation,
                })
                .await?;
            info!(post_id, cursor, staged, next_cursor, "post page staged");
            return Ok(Step::Continued { staged, next_cursor });
        }

        let Some(promoted) = index.promote(target, generation).await? else {
            return Ok(superseded(post_id, cursor, generation));
        };
        info!(post_id, cursor, staged, promoted, "post scope finalized");
        Ok(Step::Finalized { staged, promoted })
    }

    pub(super) async fn ticket_step(&self, ticket_id: TicketId, batch_size: u64) -> Result<Step> {
        let posts = &self.stores.posts;
        let Some(post_id) = posts.ticket_post(ticket_id).await? else {
            debug!(ticket_id, "ticket no longer exists, nothing to rebuild");
            return Ok(Step::Skipped);
        };

        if posts.post(post_id).await?.is_none() {
            debug!(ticket_id, post_id, "ticket owner gone");
            return self.clear_post(post_id, "post gone").await;
        }

        self.post_step(post_id, Chain::START, batch_size).await
    }

    async fn clear_post(&self, post_id: PostId, reason: &'static str) -> Result<Step> {
        let removed = self.stores.index.delete_post_rows(post_id).await?;
        info!(post_id, removed, reason, "post rows cleared");
        Ok(Step::Cleared { removed })
    }
}

fn superseded(post_id: PostId, cursor: u64, generation: Generation) -> Step {
    info!(post_id, cursor, generation, "post rebuild superseded, chain stopped");
    Step::Superseded { generation }
}
