//! In-process backend implementing every store trait behind one lock.
//!
//! Each trait method takes the lock once, so a finalize (delete + rewrite) is
//! observed by readers as a single step, like a transaction on Postgres.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use rulescope_core::staging::{is_canonical, staged_post, staged_rule};
use rulescope_core::{NewRule, Post, PostId, Rule, RuleId, TicketId};

use crate::error::StorageError;
use crate::store::{
    Generation, OverrideKind, OverrideStore, PostCatalog, PostOverrides, RebuildTarget,
    Relationship, RelationshipIndex, RuleStore,
};

#[derive(Default)]
struct State {
    rules: BTreeMap<RuleId, Rule>,
    relationships: HashSet<Relationship>,
    overrides: HashMap<PostId, PostOverrides>,
    posts: BTreeMap<PostId, Post>,
    tickets: HashMap<TicketId, PostId>,
    provisional: HashMap<PostId, PostId>,
    rebuilds: HashMap<RebuildTarget, Generation>,
}

impl State {
    fn ticketed(&self) -> HashSet<PostId> {
        self.tickets.values().copied().collect()
    }

    fn is_current(&self, target: RebuildTarget, generation: Generation) -> bool {
        self.rebuilds.get(&target) == Some(&generation)
    }

    fn overrides_mut(&mut self, post_id: PostId) -> &mut PostOverrides {
        self.overrides.entry(post_id).or_default()
    }
}

/// Memory-backed rule, relationship, override and post storage.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        self.state
            .read()
            .map_err(|e| StorageError::LockPoisoned(format!("memory store read lock: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StorageError> {
        self.state
            .write()
            .map_err(|e| StorageError::LockPoisoned(format!("memory store write lock: {e}")))
    }

    // ── Host data ───────────────────────────────────────────────

    /// Insert or replace a post.
    pub fn put_post(&self, post: Post) -> Result<(), StorageError> {
        self.write()?.posts.insert(post.id, post);
        Ok(())
    }

    /// Remove a post. Tickets that pointed at it keep their owner id.
    pub fn remove_post(&self, post_id: PostId) -> Result<(), StorageError> {
        self.write()?.posts.remove(&post_id);
        Ok(())
    }

    pub fn put_ticket(&self, ticket_id: TicketId, post_id: PostId) -> Result<(), StorageError> {
        self.write()?.tickets.insert(ticket_id, post_id);
        Ok(())
    }

    pub fn remove_ticket(&self, ticket_id: TicketId) -> Result<(), StorageError> {
        self.write()?.tickets.remove(&ticket_id);
        Ok(())
    }

    /// Register a provisional id that resolves to `canonical`.
    pub fn put_provisional(&self, provisional: PostId, canonical: PostId) -> Result<(), StorageError> {
        self.write()?.provisional.insert(provisional, canonical);
        Ok(())
    }

    /// Insert a rule with a caller-chosen id, bypassing id assignment.
    pub fn put_rule(&self, rule: Rule) -> Result<(), StorageError> {
        self.write()?.rules.insert(rule.id, rule);
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────

    /// Every relationship row, staged ones included.
    pub fn relationships(&self) -> Result<BTreeSet<Relationship>, StorageError> {
        Ok(self.read()?.relationships.iter().copied().collect())
    }

    /// Rows that have a staged id in either dimension.
    pub fn staged_relationships(&self) -> Result<BTreeSet<Relationship>, StorageError> {
        Ok(self
            .read()?
            .relationships
            .iter()
            .filter(|r| !is_canonical(r.rule_id) || !is_canonical(r.post_id))
            .copied()
            .collect())
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: u64, offset: u64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    items.skip(offset).take(limit).collect()
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn rule(&self, id: RuleId) -> Result<Option<Rule>, StorageError> {
        Ok(self.read()?.rules.get(&id).cloned())
    }

    async fn rules(&self, ids: &[RuleId]) -> Result<Vec<Rule>, StorageError> {
        let wanted: BTreeSet<RuleId> = ids.iter().copied().collect();
        let state = self.read()?;
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.rules.get(&id).cloned())
            .collect())
    }

    async fn insert_rule(&self, rule: NewRule) -> Result<Rule, StorageError> {
        let mut state = self.write()?;
        let id = state.rules.keys().next_back().map_or(1, |last| last + 1);
        let rule = rule.into_rule(id, Utc::now());
        state.rules.insert(id, rule.clone());
        Ok(rule)
    }

    async fn save_rule(&self, rule: &Rule) -> Result<Rule, StorageError> {
        let mut state = self.write()?;
        let slot = state
            .rules
            .get_mut(&rule.id)
            .ok_or(StorageError::RuleNotFound(rule.id))?;
        let mut saved = rule.clone();
        saved.updated_at = Utc::now();
        *slot = saved.clone();
        Ok(saved)
    }

    async fn delete_rule(&self, id: RuleId) -> Result<bool, StorageError> {
        Ok(self.write()?.rules.remove(&id).is_some())
    }

    async fn active_rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError> {
        let state = self.read()?;
        Ok(page(
            state.rules.values().filter(|r| r.is_active()).cloned(),
            limit,
            offset,
        ))
    }

    async fn rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError> {
        let state = self.read()?;
        Ok(page(state.rules.values().cloned(), limit, offset))
    }
}

#[async_trait]
impl RelationshipIndex for MemoryStore {
    async fn insert_rows(&self, rows: &[Relationship]) -> Result<u64, StorageError> {
        let mut state = self.write()?;
        let mut inserted = 0;
        for row in rows {
            if state.relationships.insert(*row) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn delete_rule_rows(&self, rule_id: RuleId) -> Result<u64, StorageError> {
        let staged = staged_rule(rule_id);
        let mut state = self.write()?;
        let before = state.relationships.len();
        state
            .relationships
            .retain(|r| r.rule_id != rule_id && r.rule_id != staged);
        Ok((before - state.relationships.len()) as u64)
    }

    async fn delete_post_rows(&self, post_id: PostId) -> Result<u64, StorageError> {
        let staged = staged_post(post_id);
        let mut state = self.write()?;
        let before = state.relationships.len();
        state
            .relationships
            .retain(|r| r.post_id != post_id && r.post_id != staged);
        Ok((before - state.relationships.len()) as u64)
    }

    async fn begin_rebuild(&self, target: RebuildTarget) -> Result<Generation, StorageError> {
        let mut state = self.write()?;
        let generation = {
            let current = state.rebuilds.entry(target).or_default();
            *current += 1;
            *current
        };
        state.relationships.retain(|r| !target.stages(r));
        Ok(generation)
    }

    async fn stage_rows(
        &self,
        target: RebuildTarget,
        generation: Generation,
        members: &[i64],
    ) -> Result<Option<u64>, StorageError> {
        let mut state = self.write()?;
        if !state.is_current(target, generation) {
            return Ok(None);
        }
        let mut staged = 0;
        for &member in members {
            if state.relationships.insert(target.staged_row(member)) {
                staged += 1;
            }
        }
        Ok(Some(staged))
    }

    async fn promote(
        &self,
        target: RebuildTarget,
        generation: Generation,
    ) -> Result<Option<u64>, StorageError> {
        let mut state = self.write()?;
        if !state.is_current(target, generation) {
            return Ok(None);
        }
        state.relationships.retain(|r| !target.replaces(r));
        let staged: Vec<Relationship> = state
            .relationships
            .iter()
            .filter(|r| target.stages(r))
            .copied()
            .collect();
        for row in &staged {
            state.relationships.remove(row);
            state.relationships.insert(target.promoted(*row));
        }
        state.rebuilds.insert(target, generation + 1);
        Ok(Some(staged.len() as u64))
    }

    async fn rules_for_post(&self, post_id: PostId) -> Result<BTreeSet<RuleId>, StorageError> {
        Ok(self
            .read()?
            .relationships
            .iter()
            .filter(|r| r.post_id == post_id && is_canonical(r.rule_id))
            .map(|r| r.rule_id)
            .collect())
    }

    async fn posts_for_rule(&self, rule_id: RuleId) -> Result<BTreeSet<PostId>, StorageError> {
        Ok(self
            .read()?
            .relationships
            .iter()
            .filter(|r| r.rule_id == rule_id && is_canonical(r.post_id))
            .map(|r| r.post_id)
            .collect())
    }
}

#[async_trait]
impl OverrideStore for MemoryStore {
    async fn overrides(&self, post_id: PostId) -> Result<PostOverrides, StorageError> {
        Ok(self
            .read()?
            .overrides
            .get(&post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError> {
        let mut state = self.write()?;
        let overrides = state.overrides_mut(post_id);
        let set = match kind {
            OverrideKind::Enabled => &mut overrides.manually_enabled,
            OverrideKind::Disabled => &mut overrides.manually_disabled,
        };
        Ok(set.insert(rule_id))
    }

    async fn remove_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError> {
        let mut state = self.write()?;
        let Some(overrides) = state.overrides.get_mut(&post_id) else {
            return Ok(false);
        };
        let removed = match kind {
            OverrideKind::Enabled => overrides.manually_enabled.remove(&rule_id),
            OverrideKind::Disabled => overrides.manually_disabled.remove(&rule_id),
        };
        if overrides.is_empty() {
            state.overrides.remove(&post_id);
        }
        Ok(removed)
    }

    async fn purge_rule_overrides(&self, rule_id: RuleId) -> Result<u64, StorageError> {
        let mut state = self.write()?;
        let mut removed = 0;
        for overrides in state.overrides.values_mut() {
            removed += u64::from(overrides.manually_enabled.remove(&rule_id));
            removed += u64::from(overrides.manually_disabled.remove(&rule_id));
        }
        state.overrides.retain(|_, o| !o.is_empty());
        Ok(removed)
    }
}

#[async_trait]
impl PostCatalog for MemoryStore {
    async fn post(&self, post_id: PostId) -> Result<Option<Post>, StorageError> {
        Ok(self.read()?.posts.get(&post_id).cloned())
    }

    async fn ticketed_posts_page(&self, limit: u64, offset: u64) -> Result<Vec<Post>, StorageError> {
        let state = self.read()?;
        let ticketed = state.ticketed();
        Ok(page(
            state
                .posts
                .values()
                .rev()
                .filter(|p| ticketed.contains(&p.id))
                .cloned(),
            limit,
            offset,
        ))
    }

    async fn has_tickets(&self, post_id: PostId) -> Result<bool, StorageError> {
        Ok(self.read()?.tickets.values().any(|p| *p == post_id))
    }

    async fn ticket_post(&self, ticket_id: TicketId) -> Result<Option<PostId>, StorageError> {
        Ok(self.read()?.tickets.get(&ticket_id).copied())
    }

    async fn normalize_post_id(&self, post_id: PostId) -> Result<PostId, StorageError> {
        Ok(self
            .read()?
            .provisional
            .get(&post_id)
            .copied()
            .unwrap_or(post_id))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
