//! Retry and abandonment of failing recomputation steps.

mod common;

use std::sync::Arc;

use common::*;
use rulescope_core::staging::staged_rule;
use rulescope_core::{Post, Scope};
use rulescope_rules::{ScopeEvent, SCOPE_RECOMPUTE};
use rulescope_storage::{MemoryStore, OverrideKind, OverrideStore, Relationship};

fn flaky_harness(batch_size: u64) -> (Harness, Arc<FlakyIndex>) {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(FlakyIndex::new(store.clone()));
    let h = Harness::with_index(batch_size, store, index.clone());
    (h, index)
}

#[tokio::test]
async fn failed_insert_is_retried_without_duplicates() {
    let (h, index) = flaky_harness(2);
    for id in 1..=3 {
        h.ticketed(tagged(id, JAZZ));
    }
    h.rule(42, Some(tag_scope(JAZZ)));
    index.fail_next_inserts(1);

    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    let stats = h.drain().await;

    assert_eq!(stats.retried, 1);
    assert_eq!(stats.abandoned, 0);
    // Two pages plus one retry of the first.
    assert_eq!(stats.executions, 3);
    assert_eq!(h.posts_for(42).await, vec![1, 2, 3]);
    assert_eq!(h.store.relationships().unwrap().len(), 3);
    assert!(h.runner.abandoned().unwrap().is_empty());
}

#[tokio::test]
async fn persistent_failure_is_abandoned_keeping_old_rows() {
    let (h, index) = flaky_harness(10);
    h.ticketed(tagged(1, JAZZ));
    h.ticketed(tagged(2, ROCK));
    let mut rule = h.rule(42, Some(tag_scope(JAZZ)));
    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    h.drain().await;
    assert_eq!(h.posts_for(42).await, vec![1]);

    index.fail_promotes(true);
    rule.scope = Some(tag_scope(ROCK));
    h.engine.service().update(&rule).await.unwrap();
    let stats = h.drain().await;

    assert_eq!(stats.executions, u64::from(MAX_RETRIES) + 1);
    assert_eq!(stats.abandoned, 1);
    assert_eq!(h.posts_for(42).await, vec![1]);

    let report = h.runner.abandoned().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].name, SCOPE_RECOMPUTE);
    assert_eq!(report[0].executions, MAX_RETRIES + 1);

    // The next triggering event starts over from cursor 0 and recovers.
    index.fail_promotes(false);
    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    h.drain().await;
    assert_eq!(h.posts_for(42).await, vec![2]);
    assert!(h.staged_rows().is_empty());
}

#[tokio::test]
async fn stalled_chain_can_leave_a_post_with_neither_row_nor_override() {
    let (h, index) = flaky_harness(1);
    // Paged by id descending, so post 2 is on the first page.
    h.ticketed(Post::new(2));
    h.ticketed(Post::new(1));
    h.rule(42, Some(Scope::all()));
    h.store.add_override(2, 42, OverrideKind::Enabled).await.unwrap();
    index.fail_promotes(true);

    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    let stats = h.drain().await;

    assert_eq!(stats.abandoned, 1);
    // The manual enable was cleared when page one matched, but the swap never happened.
    assert!(h.manually_enabled(2).await.is_empty());
    assert!(h.rules_for(2).await.is_empty());
    assert!(h.staged_rows().contains(&Relationship::new(staged_rule(42), 2)));
    assert!(h
        .engine
        .resolver()
        .effective_rules(2)
        .await
        .unwrap()
        .is_empty());
}
