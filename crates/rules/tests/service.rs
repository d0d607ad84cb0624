//! Rule persistence hook: what each write enqueues or clears.

mod common;

use common::*;
use rulescope_core::{NewRule, RuleStatus, RuleType, Scope};
use rulescope_rules::{RulesError, ScopeCause, ScopeEvent, ScopeTask, Task};
use rulescope_storage::{OverrideKind, OverrideStore, Relationship, RelationshipIndex, RuleStore};

#[tokio::test]
async fn creating_an_active_rule_enqueues_its_rebuild() {
    let h = Harness::new(10);
    h.ticketed(tagged(1, JAZZ));
    let service = h.engine.service();

    let rule = service
        .create(NewRule::new(RuleType::OrderDiscount, Some(tag_scope(JAZZ))))
        .await
        .unwrap();
    assert_eq!(
        h.pending(),
        vec![Task::Scope(ScopeTask::start(ScopeCause::Rule(rule.id)))]
    );

    h.drain().await;
    assert_eq!(h.posts_for(rule.id).await, vec![1]);
}

#[tokio::test]
async fn creating_an_inactive_rule_enqueues_nothing() {
    let h = Harness::new(10);
    h.engine
        .service()
        .create(
            NewRule::new(RuleType::UserRoleRestriction, Some(Scope::all()))
                .with_status(RuleStatus::Inactive),
        )
        .await
        .unwrap();
    assert!(h.pending().is_empty());
}

#[tokio::test]
async fn deactivation_clears_rows_without_a_task() {
    let h = Harness::new(10);
    h.ticketed(tagged(1, JAZZ));
    h.ticketed(tagged(2, JAZZ));
    h.rule(42, Some(tag_scope(JAZZ)));
    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    h.drain().await;
    assert_eq!(h.posts_for(42).await, vec![1, 2]);

    let saved = h
        .engine
        .service()
        .set_status(42, RuleStatus::Inactive)
        .await
        .unwrap();

    assert_eq!(saved.status, RuleStatus::Inactive);
    assert!(h.posts_for(42).await.is_empty());
    assert!(h.pending().is_empty());
}

#[tokio::test]
async fn reactivation_enqueues_a_rebuild() {
    let h = Harness::new(10);
    h.ticketed(tagged(1, JAZZ));
    let mut rule = h.rule(42, Some(tag_scope(JAZZ)));
    rule.status = RuleStatus::Inactive;
    h.store.put_rule(rule).unwrap();

    h.engine
        .service()
        .set_status(42, RuleStatus::Active)
        .await
        .unwrap();
    assert_eq!(h.pending().len(), 1);

    h.drain().await;
    assert_eq!(h.posts_for(42).await, vec![1]);
}

#[tokio::test]
async fn saving_an_unchanged_scope_enqueues_nothing() {
    let h = Harness::new(10);
    let mut rule = h.rule(42, Some(tag_scope(JAZZ)));
    rule.config = serde_json::json!({"percent": 15});

    let saved = h.engine.service().update(&rule).await.unwrap();

    assert!(saved.updated_at >= rule.updated_at);
    assert_eq!(saved.config["percent"], 15);
    assert!(h.pending().is_empty());
}

#[tokio::test]
async fn updating_a_missing_rule_fails() {
    let h = Harness::new(10);
    let rule = NewRule::new(RuleType::OrderDiscount, None).into_rule(404, chrono::Utc::now());

    let err = h.engine.service().update(&rule).await.unwrap_err();
    assert!(matches!(err, RulesError::RuleNotFound(404)));
}

#[tokio::test]
async fn deleting_a_rule_removes_rows_and_overrides() {
    let h = Harness::new(10);
    h.rule(42, Some(Scope::all()));
    h.store
        .insert_rows(&[Relationship::new(42, 1), Relationship::new(43, 1)])
        .await
        .unwrap();
    h.store.add_override(1, 42, OverrideKind::Disabled).await.unwrap();
    h.store.add_override(2, 42, OverrideKind::Enabled).await.unwrap();

    assert!(h.engine.service().delete(42).await.unwrap());

    assert!(h.store.rule(42).await.unwrap().is_none());
    assert_eq!(h.rules_for(1).await, vec![43]);
    assert!(h.manually_disabled(1).await.is_empty());
    assert!(h.manually_enabled(2).await.is_empty());
    assert!(!h.engine.service().delete(42).await.unwrap());
}
