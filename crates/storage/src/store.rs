//! Storage traits for rules, the relationship index, overrides and posts.
//!
//! Every method is a single atomic unit on its backend. Methods that take a
//! `limit`/`offset` page in a stable order so that a cursor carried between
//! task executions always advances over the same sequence.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rulescope_core::staging::{is_canonical, staged_post, staged_rule};
use rulescope_core::{NewRule, Post, PostId, Rule, RuleId, TicketId};

use crate::error::StorageError;

/// One row of the relationship index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub rule_id: RuleId,
    pub post_id: PostId,
}

impl Relationship {
    pub fn new(rule_id: RuleId, post_id: PostId) -> Self {
        Self { rule_id, post_id }
    }
}

/// Identifies one rebuild of a [`RebuildTarget`]. Each new rebuild gets a
/// higher generation than every earlier one.
pub type Generation = u64;

/// The slice of the index a rebuild replaces: one rule's posts or one post's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildTarget {
    Rule(RuleId),
    Post(PostId),
}

impl RebuildTarget {
    pub fn dimension(&self) -> &'static str {
        match self {
            RebuildTarget::Rule(_) => "rule",
            RebuildTarget::Post(_) => "post",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            RebuildTarget::Rule(id) | RebuildTarget::Post(id) => *id,
        }
    }

    /// The staged row recording `member`: a post of the rule, or a rule of the post.
    pub fn staged_row(&self, member: i64) -> Relationship {
        match *self {
            RebuildTarget::Rule(rule_id) => Relationship::new(staged_rule(rule_id), member),
            RebuildTarget::Post(post_id) => Relationship::new(member, staged_post(post_id)),
        }
    }

    /// Whether `row` was staged by a rebuild of this target.
    pub fn stages(&self, row: &Relationship) -> bool {
        match *self {
            RebuildTarget::Rule(rule_id) => row.rule_id == staged_rule(rule_id),
            RebuildTarget::Post(post_id) => row.post_id == staged_post(post_id),
        }
    }

    /// Whether `row` is a canonical row that promoting this target replaces.
    ///
    /// Rows staged in the other dimension are never replaced.
    pub fn replaces(&self, row: &Relationship) -> bool {
        match *self {
            RebuildTarget::Rule(rule_id) => row.rule_id == rule_id && is_canonical(row.post_id),
            RebuildTarget::Post(post_id) => row.post_id == post_id && is_canonical(row.rule_id),
        }
    }

    /// Canonical form of a row staged by this target.
    pub fn promoted(&self, row: Relationship) -> Relationship {
        match *self {
            RebuildTarget::Rule(rule_id) => Relationship::new(rule_id, row.post_id),
            RebuildTarget::Post(post_id) => Relationship::new(row.rule_id, post_id),
        }
    }
}

impl fmt::Display for RebuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dimension(), self.id())
    }
}

/// Manual per-post overrides set by administrators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOverrides {
    pub manually_enabled: HashSet<RuleId>,
    pub manually_disabled: HashSet<RuleId>,
}

impl PostOverrides {
    pub fn is_empty(&self) -> bool {
        self.manually_enabled.is_empty() && self.manually_disabled.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Enabled,
    Disabled,
}

impl OverrideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideKind::Enabled => "enabled",
            OverrideKind::Disabled => "disabled",
        }
    }
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn rule(&self, id: RuleId) -> Result<Option<Rule>, StorageError>;

    /// Load the given rules, ordered by id. Missing ids are skipped.
    async fn rules(&self, ids: &[RuleId]) -> Result<Vec<Rule>, StorageError>;

    async fn insert_rule(&self, rule: NewRule) -> Result<Rule, StorageError>;

    /// Overwrite an existing rule and refresh its `updated_at`.
    ///
    /// Returns [`StorageError::RuleNotFound`] when the rule does not exist.
    async fn save_rule(&self, rule: &Rule) -> Result<Rule, StorageError>;

    /// Returns `true` when a rule was removed.
    async fn delete_rule(&self, id: RuleId) -> Result<bool, StorageError>;

    /// Active rules ordered by id ascending.
    async fn active_rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError>;

    /// Rules of any status ordered by id ascending.
    async fn rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError>;
}

/// The materialized `(rule_id, post_id)` table.
///
/// Canonical reads (`rules_for_post`, `posts_for_rule`) never return a row
/// with a staged id in either dimension.
#[async_trait]
pub trait RelationshipIndex: Send + Sync {
    /// Insert rows, ignoring ones that already exist. Returns the number of new rows.
    async fn insert_rows(&self, rows: &[Relationship]) -> Result<u64, StorageError>;

    /// Delete every row of a rule: canonical, rule-staged and post-staged.
    async fn delete_rule_rows(&self, rule_id: RuleId) -> Result<u64, StorageError>;

    /// Delete every row of a post: canonical, rule-staged and post-staged.
    async fn delete_post_rows(&self, post_id: PostId) -> Result<u64, StorageError>;

    /// Start a new rebuild of `target` and drop the rows earlier rebuilds staged.
    ///
    /// Returns the new generation. Rebuilds holding an older generation can no
    /// longer stage or promote rows.
    async fn begin_rebuild(&self, target: RebuildTarget) -> Result<Generation, StorageError>;

    /// Stage `members` for `target`, ignoring rows that already exist.
    ///
    /// Returns `None`, writing nothing, when `generation` is no longer the
    /// current rebuild of `target`.
    async fn stage_rows(
        &self,
        target: RebuildTarget,
        generation: Generation,
        members: &[i64],
    ) -> Result<Option<u64>, StorageError>;

    /// Replace the canonical rows of `target` with its staged rows.
    ///
    /// Only canonical rows of the target's own dimension are deleted, so rows
    /// staged by a concurrent rebuild of the other dimension survive. Promoting
    /// retires `generation`. Returns `None` when it is not current, otherwise
    /// the number of promoted rows.
    async fn promote(
        &self,
        target: RebuildTarget,
        generation: Generation,
    ) -> Result<Option<u64>, StorageError>;

    async fn rules_for_post(&self, post_id: PostId) -> Result<BTreeSet<RuleId>, StorageError>;

    async fn posts_for_rule(&self, rule_id: RuleId) -> Result<BTreeSet<PostId>, StorageError>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn overrides(&self, post_id: PostId) -> Result<PostOverrides, StorageError>;

    /// Returns `true` when the rule was not already in the set.
    async fn add_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError>;

    /// Returns `true` when the rule was in the set.
    async fn remove_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError>;

    /// Remove a rule from every post's override sets.
    async fn purge_rule_overrides(&self, rule_id: RuleId) -> Result<u64, StorageError>;
}

/// Read-only view of the host application's posts and tickets.
#[async_trait]
pub trait PostCatalog: Send + Sync {
    async fn post(&self, post_id: PostId) -> Result<Option<Post>, StorageError>;

    /// Posts of any status that have at least one ticket, ordered by id descending.
    async fn ticketed_posts_page(&self, limit: u64, offset: u64) -> Result<Vec<Post>, StorageError>;

    async fn has_tickets(&self, post_id: PostId) -> Result<bool, StorageError>;

    /// The post a ticket belongs to, if the ticket exists.
    async fn ticket_post(&self, ticket_id: TicketId) -> Result<Option<PostId>, StorageError>;

    /// Map a provisional (draft/revision) id to its canonical post id.
    async fn normalize_post_id(&self, post_id: PostId) -> Result<PostId, StorageError>;
}
