//! PostgreSQL backend built on `sqlx`.
//!
//! The relationship table carries a primary key on `(rule_id, post_id)`, so
//! batch inserts are plain `ON CONFLICT DO NOTHING` upserts and a retried batch
//! never duplicates rows. Rebuild generations live in `purchase_rule_rebuilds`:
//! staging takes a share lock on the target's generation row and promoting an
//! exclusive one, so a rebuild that is superseded mid-flight can neither leave
//! rows behind nor promote a partial set.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tracing::info;

use rulescope_core::config::PostgresConfig;
use rulescope_core::staging::{staged_post, staged_rule, STAGE_RULE};
use rulescope_core::{NewRule, Post, PostId, Rule, RuleId, Scope, TermRef, TicketId};

use crate::error::StorageError;
use crate::store::{
    Generation, OverrideKind, OverrideStore, PostCatalog, PostOverrides, RebuildTarget,
    Relationship, RelationshipIndex, RuleStore,
};

const RULE_COLUMNS: &str = "id, rule_type, config, scope, status, updated_at";

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the configured URL and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn terms_for(&self, ids: &[PostId]) -> Result<BTreeMap<PostId, BTreeSet<TermRef>>, StorageError> {
        let rows = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT post_id, term_type, term_id FROM post_terms WHERE post_id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut terms: BTreeMap<PostId, BTreeSet<TermRef>> = BTreeMap::new();
        for (post_id, term_type, term_id) in rows {
            terms
                .entry(post_id)
                .or_default()
                .insert(TermRef::new(term_type.parse()?, term_id));
        }
        Ok(terms)
    }

    async fn hydrate_posts(&self, rows: Vec<PostRow>) -> Result<Vec<Post>, StorageError> {
        let ids: Vec<PostId> = rows.iter().map(|r| r.id).collect();
        let mut terms = self.terms_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| Post {
                id: row.id,
                post_type: row.post_type,
                status: row.status,
                terms: terms.remove(&row.id).unwrap_or_default(),
            })
            .collect())
    }
}

/// Postgres has no unsigned integers; clamp paging arguments into `BIGINT`.
fn to_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Column and id that hold a target's staged rows.
fn staged_column(target: RebuildTarget) -> (&'static str, i64) {
    match target {
        RebuildTarget::Rule(rule_id) => ("rule_id", staged_rule(rule_id)),
        RebuildTarget::Post(post_id) => ("post_id", staged_post(post_id)),
    }
}

async fn insert_relationships<'e, E>(executor: E, rows: &[Relationship]) -> Result<u64, StorageError>
where
    E: PgExecutor<'e>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let rule_ids: Vec<i64> = rows.iter().map(|r| r.rule_id).collect();
    let post_ids: Vec<i64> = rows.iter().map(|r| r.post_id).collect();
    let result = sqlx::query(
        "INSERT INTO purchase_rule_relationships (rule_id, post_id)
         SELECT * FROM UNNEST($1::bigint[], $2::bigint[])
         ON CONFLICT (rule_id, post_id) DO NOTHING",
    )
    .bind(rule_ids)
    .bind(post_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Whether `generation` is the current rebuild of `target`, locking its row
/// with `lock` (`FOR SHARE` or `FOR UPDATE`) until the transaction ends.
async fn holds_generation(
    tx: &mut Transaction<'_, Postgres>,
    target: RebuildTarget,
    generation: Generation,
    lock: &str,
) -> Result<bool, StorageError> {
    let current = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT generation FROM purchase_rule_rebuilds
         WHERE dimension = $1 AND target_id = $2 {lock}"
    ))
    .bind(target.dimension())
    .bind(target.id())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(current == Some(to_bigint(generation)))
}

// ── Row types ───────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: i64,
    rule_type: String,
    config: serde_json::Value,
    scope: Option<serde_json::Value>,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = StorageError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let scope = match row.scope {
            Some(value) if !value.is_null() => Some(serde_json::from_value::<Scope>(value)?),
            _ => None,
        };
        Ok(Rule {
            id: row.id,
            rule_type: row.rule_type.parse()?,
            config: row.config,
            scope,
            status: row.status.parse()?,
            updated_at: row.updated_at,
        })
    }
}

fn rules_from_rows(rows: Vec<RuleRow>) -> Result<Vec<Rule>, StorageError> {
    rows.into_iter().map(Rule::try_from).collect()
}

fn scope_json(scope: &Option<Scope>) -> Result<Option<serde_json::Value>, StorageError> {
    Ok(scope.as_ref().map(serde_json::to_value).transpose()?)
}

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    post_type: String,
    status: String,
}

// ── Rules ───────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for PgStore {
    async fn rule(&self, id: RuleId) -> Result<Option<Rule>, StorageError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM purchase_rules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Rule::try_from).transpose()
    }

    async fn rules(&self, ids: &[RuleId]) -> Result<Vec<Rule>, StorageError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM purchase_rules WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rules_from_rows(rows)
    }

    async fn insert_rule(&self, rule: NewRule) -> Result<Rule, StorageError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "INSERT INTO purchase_rules (rule_type, config, scope, status, updated_at)
             VALUES ($1, $2, $3, $4, now())
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(rule.rule_type.as_str())
        .bind(&rule.config)
        .bind(scope_json(&rule.scope)?)
        .bind(rule.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Rule::try_from(row)
    }

    async fn save_rule(&self, rule: &Rule) -> Result<Rule, StorageError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "UPDATE purchase_rules
             SET rule_type = $2, config = $3, scope = $4, status = $5, updated_at = now()
             WHERE id = $1
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(rule.id)
        .bind(rule.rule_type.as_str())
        .bind(&rule.config)
        .bind(scope_json(&rule.scope)?)
        .bind(rule.status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::RuleNotFound(rule.id))?;
        Rule::try_from(row)
    }

    async fn delete_rule(&self, id: RuleId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM purchase_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM purchase_rules
             WHERE status = 'active'
             ORDER BY id
             LIMIT $1 OFFSET $2"
        ))
        .bind(to_bigint(limit))
        .bind(to_bigint(offset))
        .fetch_all(&self.pool)
        .await?;
        rules_from_rows(rows)
    }

    async fn rules_page(&self, limit: u64, offset: u64) -> Result<Vec<Rule>, StorageError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM purchase_rules ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(to_bigint(limit))
        .bind(to_bigint(offset))
        .fetch_all(&self.pool)
        .await?;
        rules_from_rows(rows)
    }
}

// ── Relationship index ──────────────────────────────────────────

#[async_trait]
impl RelationshipIndex for PgStore {
    async fn insert_rows(&self, rows: &[Relationship]) -> Result<u64, StorageError> {
        insert_relationships(&self.pool, rows).await
    }

    async fn delete_rule_rows(&self, rule_id: RuleId) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM purchase_rule_relationships WHERE rule_id = $1 OR rule_id = $2",
        )
        .bind(rule_id)
        .bind(staged_rule(rule_id))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_post_rows(&self, post_id: PostId) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM purchase_rule_relationships WHERE post_id = $1 OR post_id = $2",
        )
        .bind(post_id)
        .bind(staged_post(post_id))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn begin_rebuild(&self, target: RebuildTarget) -> Result<Generation, StorageError> {
        let mut tx = self.pool.begin().await?;
        let generation = sqlx::query_scalar::<_, i64>(
            "INSERT INTO purchase_rule_rebuilds (dimension, target_id, generation)
             VALUES ($1, $2, 1)
             ON CONFLICT (dimension, target_id)
             DO UPDATE SET generation = purchase_rule_rebuilds.generation + 1
             RETURNING generation",
        )
        .bind(target.dimension())
        .bind(target.id())
        .fetch_one(&mut *tx)
        .await?;
        let (column, staged_id) = staged_column(target);
        sqlx::query(&format!(
            "DELETE FROM purchase_rule_relationships WHERE {column} = $1"
        ))
        .bind(staged_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(u64::try_from(generation).unwrap_or_default())
    }

    async fn stage_rows(
        &self,
        target: RebuildTarget,
        generation: Generation,
        members: &[i64],
    ) -> Result<Option<u64>, StorageError> {
        let mut tx = self.pool.begin().await?;
        if !holds_generation(&mut tx, target, generation, "FOR SHARE").await? {
            return Ok(None);
        }
        let rows: Vec<Relationship> = members.iter().map(|&m| target.staged_row(m)).collect();
        let staged = insert_relationships(&mut *tx, &rows).await?;
        tx.commit().await?;
        Ok(Some(staged))
    }

    async fn promote(
        &self,
        target: RebuildTarget,
        generation: Generation,
    ) -> Result<Option<u64>, StorageError> {
        let mut tx = self.pool.begin().await?;
        if !holds_generation(&mut tx, target, generation, "FOR UPDATE").await? {
            return Ok(None);
        }
        // Canonical rows only: the other dimension's staged ids are >= STAGE_RULE.
        let (own, other) = match target {
            RebuildTarget::Rule(_) => ("rule_id", "post_id"),
            RebuildTarget::Post(_) => ("post_id", "rule_id"),
        };
        sqlx::query(&format!(
            "DELETE FROM purchase_rule_relationships WHERE {own} = $1 AND {other} < $2"
        ))
        .bind(target.id())
        .bind(STAGE_RULE)
        .execute(&mut *tx)
        .await?;
        let (_, staged_id) = staged_column(target);
        let promoted = sqlx::query(&format!(
            "UPDATE purchase_rule_relationships SET {own} = $1 WHERE {own} = $2"
        ))
        .bind(target.id())
        .bind(staged_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(
            "UPDATE purchase_rule_rebuilds SET generation = generation + 1
             WHERE dimension = $1 AND target_id = $2",
        )
        .bind(target.dimension())
        .bind(target.id())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(promoted))
    }

    async fn rules_for_post(&self, post_id: PostId) -> Result<BTreeSet<RuleId>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT rule_id FROM purchase_rule_relationships
             WHERE post_id = $1 AND rule_id < $2",
        )
        .bind(post_id)
        .bind(STAGE_RULE)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn posts_for_rule(&self, rule_id: RuleId) -> Result<BTreeSet<PostId>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT post_id FROM purchase_rule_relationships
             WHERE rule_id = $1 AND post_id < $2",
        )
        .bind(rule_id)
        .bind(STAGE_RULE)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }
}

// ── Overrides ───────────────────────────────────────────────────

#[async_trait]
impl OverrideStore for PgStore {
    async fn overrides(&self, post_id: PostId) -> Result<PostOverrides, StorageError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT rule_id, kind FROM purchase_rule_overrides WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        let mut overrides = PostOverrides::default();
        for (rule_id, kind) in rows {
            if kind == OverrideKind::Enabled.as_str() {
                overrides.manually_enabled.insert(rule_id);
            } else {
                overrides.manually_disabled.insert(rule_id);
            }
        }
        Ok(overrides)
    }

    async fn add_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "INSERT INTO purchase_rule_overrides (post_id, rule_id, kind)
             VALUES ($1, $2, $3)
             ON CONFLICT (post_id, rule_id, kind) DO NOTHING",
        )
        .bind(post_id)
        .bind(rule_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_override(
        &self,
        post_id: PostId,
        rule_id: RuleId,
        kind: OverrideKind,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM purchase_rule_overrides
             WHERE post_id = $1 AND rule_id = $2 AND kind = $3",
        )
        .bind(post_id)
        .bind(rule_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_rule_overrides(&self, rule_id: RuleId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM purchase_rule_overrides WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ── Posts ───────────────────────────────────────────────────────

#[async_trait]
impl PostCatalog for PgStore {
    async fn post(&self, post_id: PostId) -> Result<Option<Post>, StorageError> {
        let row = sqlx::query_as::<_, PostRow>(
            "SELECT id, post_type, status FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.hydrate_posts(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn ticketed_posts_page(&self, limit: u64, offset: u64) -> Result<Vec<Post>, StorageError> {
        let rows = sqlx::query_as::<_, PostRow>(
            "SELECT p.id, p.post_type, p.status FROM posts p
             WHERE EXISTS (SELECT 1 FROM tickets t WHERE t.post_id = p.id)
             ORDER BY p.id DESC
             LIMIT $1 OFFSET $2",
        )
        .bind(to_bigint(limit))
        .bind(to_bigint(offset))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_posts(rows).await
    }

    async fn has_tickets(&self, post_id: PostId) -> Result<bool, StorageError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM tickets WHERE post_id = $1)",
        )
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn ticket_post(&self, ticket_id: TicketId) -> Result<Option<PostId>, StorageError> {
        let post_id = sqlx::query_scalar::<_, i64>("SELECT post_id FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post_id)
    }

    async fn normalize_post_id(&self, post_id: PostId) -> Result<PostId, StorageError> {
        let canonical = sqlx::query_scalar::<_, i64>(
            "SELECT post_id FROM provisional_post_ids WHERE provisional_id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(canonical.unwrap_or(post_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulescope_core::{Connector, RuleStatus, RuleType};

    fn row(scope: Option<serde_json::Value>) -> RuleRow {
        RuleRow {
            id: 7,
            rule_type: "combined-purchase".into(),
            config: serde_json::json!({"required": [1, 2]}),
            scope,
            status: "inactive".into(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rule_row_decodes_scope_json() {
        let rule = Rule::try_from(row(Some(serde_json::json!({
            "connector": "or",
            "criteria": [{"term": "series", "value": 4}]
        }))))
        .unwrap();
        assert_eq!(rule.rule_type, RuleType::CombinedPurchase);
        assert_eq!(rule.status, RuleStatus::Inactive);
        assert_eq!(rule.scope.unwrap().connector, Connector::Or);
    }

    #[test]
    fn json_null_scope_decodes_as_none() {
        let rule = Rule::try_from(row(Some(serde_json::Value::Null))).unwrap();
        assert!(rule.scope.is_none());
    }

    #[test]
    fn unknown_rule_type_is_a_decode_error() {
        let mut bad = row(None);
        bad.rule_type = "flash-sale".into();
        assert!(matches!(Rule::try_from(bad), Err(StorageError::Decode(_))));
    }

    #[test]
    fn paging_arguments_are_clamped() {
        assert_eq!(to_bigint(u64::MAX), i64::MAX);
        assert_eq!(to_bigint(1000), 1000);
    }

    #[test]
    fn staged_rows_live_in_the_shifted_column() {
        assert_eq!(staged_column(RebuildTarget::Rule(42)), ("rule_id", staged_rule(42)));
        assert_eq!(staged_column(RebuildTarget::Post(7)), ("post_id", staged_post(7)));
    }
}
