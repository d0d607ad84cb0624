//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use rulescope_core::{
    BatchSizeSource, Criterion, FixedBatchSize, NewRule, Post, PostId, Rule, RuleId, RuleType,
    Scope, TermType,
};
use rulescope_queue::{MemoryQueue, RunStats, TaskRunner};
use rulescope_rules::{ScopeEngine, ScopeWorker, Task, TermMatcher};
use rulescope_storage::{
    Generation, MemoryStore, OverrideStore, RebuildTarget, Relationship, RelationshipIndex,
    StorageError, Stores,
};

pub const JAZZ: i64 = 11;
pub const ROCK: i64 = 12;
pub const MAX_RETRIES: u32 = 9;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub engine: ScopeEngine,
    pub runner: TaskRunner<ScopeWorker>,
}

impl Harness {
    pub fn new(batch_size: u64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_backend(store.clone());
        Self::build(store, stores, Arc::new(FixedBatchSize(batch_size)))
    }

    /// Same backend, but relationship writes go through `index`.
    pub fn with_index(batch_size: u64, store: Arc<MemoryStore>, index: Arc<dyn RelationshipIndex>) -> Self {
        let stores = Stores::from_backend(store.clone()).with_index(index);
        Self::build(store, stores, Arc::new(FixedBatchSize(batch_size)))
    }

    pub fn with_batch_source(batch_size: Arc<dyn BatchSizeSource>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_backend(store.clone());
        Self::build(store, stores, batch_size)
    }

    fn build(store: Arc<MemoryStore>, stores: Stores, batch_size: Arc<dyn BatchSizeSource>) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let engine = ScopeEngine::new(
            stores,
            queue.clone(),
            Arc::new(TermMatcher),
            batch_size,
            MAX_RETRIES,
        );
        let runner = engine.runner();
        Self {
            store,
            queue,
            engine,
            runner,
        }
    }

    /// Store a post with one ticket (ticket id = 1_000_000 + post id).
    pub fn ticketed(&self, post: Post) {
        let id = post.id;
        self.store.put_post(post).unwrap();
        self.store.put_ticket(ticket_of(id), id).unwrap();
    }

    pub fn rule(&self, id: RuleId, scope: Option<Scope>) -> Rule {
        let rule = NewRule::new(RuleType::TicketDiscount, scope).into_rule(id, Utc::now());
        self.store.put_rule(rule.clone()).unwrap();
        rule
    }

    pub async fn posts_for(&self, rule_id: RuleId) -> Vec<PostId> {
        self.store.posts_for_rule(rule_id).await.unwrap().into_iter().collect()
    }

    pub async fn rules_for(&self, post_id: PostId) -> Vec<RuleId> {
        self.store.rules_for_post(post_id).await.unwrap().into_iter().collect()
    }

    pub async fn manually_enabled(&self, post_id: PostId) -> BTreeSet<RuleId> {
        let overrides = self.store.overrides(post_id).await.unwrap();
        overrides.manually_enabled.into_iter().collect()
    }

    pub async fn manually_disabled(&self, post_id: PostId) -> BTreeSet<RuleId> {
        let overrides = self.store.overrides(post_id).await.unwrap();
        overrides.manually_disabled.into_iter().collect()
    }

    pub async fn drain(&self) -> RunStats {
        self.runner.drain().await.unwrap()
    }

    pub fn pending(&self) -> Vec<Task> {
        self.queue
            .pending()
            .unwrap()
            .iter()
            .map(|m| Task::from_message(m).unwrap())
            .collect()
    }

    pub fn staged_rows(&self) -> BTreeSet<Relationship> {
        self.store.staged_relationships().unwrap()
    }
}

pub fn ticket_of(post_id: PostId) -> i64 {
    1_000_000 + post_id
}

pub fn tagged(id: PostId, tag: i64) -> Post {
    Post::new(id).with_term(TermType::Tag, tag)
}

pub fn tag_scope(tag: i64) -> Scope {
    Scope::and(vec![Criterion::new(TermType::Tag, tag)])
}

/// Batch size that tests can change between executions.
#[derive(Default)]
pub struct AdjustableBatchSize(AtomicU64);

impl AdjustableBatchSize {
    pub fn new(size: u64) -> Self {
        Self(AtomicU64::new(size))
    }

    pub fn set(&self, size: u64) {
        self.0.store(size, Ordering::SeqCst);
    }
}

impl BatchSizeSource for AdjustableBatchSize {
    fn batch_size(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Relationship index that injects failures on top of a memory store.
///
/// Failed staging writes are applied first and then reported as errors, like
/// a commit whose acknowledgement was lost.
pub struct FlakyIndex {
    inner: Arc<MemoryStore>,
    inserts_before_failure: AtomicU32,
    insert_failures: AtomicU32,
    fail_promotes: AtomicBool,
}

impl FlakyIndex {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            inserts_before_failure: AtomicU32::new(0),
            insert_failures: AtomicU32::new(0),
            fail_promotes: AtomicBool::new(false),
        }
    }

    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts_after(0, n);
    }

    /// Let `passing` staging writes through, then fail the next `failing` ones.
    pub fn fail_inserts_after(&self, passing: u32, failing: u32) {
        self.inserts_before_failure.store(passing, Ordering::SeqCst);
        self.insert_failures.store(failing, Ordering::SeqCst);
    }

    pub fn fail_promotes(&self, fail: bool) {
        self.fail_promotes.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> StorageError {
        StorageError::LockPoisoned(format!("injected {what} failure"))
    }

    fn check_promote(&self) -> Result<(), StorageError> {
        if self.fail_promotes.load(Ordering::SeqCst) {
            return Err(Self::injected("promote"));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationshipIndex for FlakyIndex {
    async fn insert_rows(&self, rows: &[Relationship]) -> Result<u64, StorageError> {
        self.inner.insert_rows(rows).await
    }

    async fn delete_rule_rows(&self, rule_id: RuleId) -> Result<u64, StorageError> {
        self.inner.delete_rule_rows(rule_id).await
    }

    async fn delete_post_rows(&self, post_id: PostId) -> Result<u64, StorageError> {
        self.inner.delete_post_rows(post_id).await
    }

    async fn begin_rebuild(&self, target: RebuildTarget) -> Result<Generation, StorageError> {
        self.inner.begin_rebuild(target).await
    }

    async fn stage_rows(
        &self,
        target: RebuildTarget,
        generation: Generation,
        members: &[i64],
    ) -> Result<Option<u64>, StorageError> {
        let staged = self.inner.stage_rows(target, generation, members).await?;
        let passing = self.inserts_before_failure.load(Ordering::SeqCst);
        if passing > 0 {
            self.inserts_before_failure.store(passing - 1, Ordering::SeqCst);
            return Ok(staged);
        }
        let remaining = self.insert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insert_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::injected("insert"));
        }
        Ok(staged)
    }

    async fn promote(
        &self,
        target: RebuildTarget,
        generation: Generation,
    ) -> Result<Option<u64>, StorageError> {
        self.check_promote()?;
        self.inner.promote(target, generation).await
    }

    async fn rules_for_post(&self, post_id: PostId) -> Result<BTreeSet<RuleId>, StorageError> {
        self.inner.rules_for_post(post_id).await
    }

    async fn posts_for_rule(&self, rule_id: RuleId) -> Result<BTreeSet<PostId>, StorageError> {
        self.inner.posts_for_rule(rule_id).await
    }
}
