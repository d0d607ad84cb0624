//! Effective rule resolution and admin toggles.

mod common;

use chrono::Utc;

use common::*;
use rulescope_core::{NewRule, RuleStatus, RuleType, Scope};
use rulescope_rules::{RuleSource, ScopeEvent};
use rulescope_storage::{OverrideKind, OverrideStore, Relationship, RelationshipIndex};

const P: i64 = 100;

async fn harness_with_automatic_42() -> Harness {
    let h = Harness::new(10);
    h.ticketed(tagged(P, JAZZ));
    h.rule(42, Some(tag_scope(JAZZ)));
    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    h.drain().await;
    assert_eq!(h.rules_for(P).await, vec![42]);
    h
}

fn ids(rules: &[rulescope_core::Rule]) -> Vec<i64> {
    rules.iter().map(|r| r.id).collect()
}

#[tokio::test]
async fn toggling_an_automatic_rule_uses_the_disabled_set() {
    let h = harness_with_automatic_42().await;
    let resolver = h.engine.resolver();

    resolver.toggle(42, P, false).await.unwrap();
    assert!(h.manually_disabled(P).await.contains(&42));
    assert!(resolver.effective_rules(P).await.unwrap().is_empty());

    resolver.toggle(42, P, true).await.unwrap();
    assert!(h.manually_disabled(P).await.is_empty());
    assert!(h.manually_enabled(P).await.is_empty());
    assert_eq!(ids(&resolver.effective_rules(P).await.unwrap()), vec![42]);
}

#[tokio::test]
async fn enabling_a_non_matching_rule_adds_a_manual_entry() {
    let h = harness_with_automatic_42().await;
    h.rule(7, Some(tag_scope(ROCK)));
    let resolver = h.engine.resolver();

    resolver.toggle(7, P, true).await.unwrap();
    assert!(h.manually_enabled(P).await.contains(&7));
    assert_eq!(ids(&resolver.effective_rules(P).await.unwrap()), vec![7, 42]);

    resolver.toggle(7, P, false).await.unwrap();
    assert!(h.manually_enabled(P).await.is_empty());
    // Not automatic, so nothing is recorded as disabled.
    assert!(h.manually_disabled(P).await.is_empty());
}

#[tokio::test]
async fn enabling_a_rule_left_in_the_disabled_set_changes_nothing() {
    let h = Harness::new(10);
    h.ticketed(tagged(P, JAZZ));
    h.rule(9, Some(tag_scope(ROCK)));
    // Disabled while it was automatic; the scope has since moved away.
    h.store.add_override(P, 9, OverrideKind::Disabled).await.unwrap();

    h.engine.resolver().toggle(9, P, true).await.unwrap();

    assert!(h.manually_enabled(P).await.is_empty());
    assert!(h.manually_disabled(P).await.contains(&9));
}

#[tokio::test]
async fn manual_and_automatic_stay_disjoint() {
    let h = Harness::new(10);
    h.ticketed(tagged(P, ROCK));
    let mut rule = h.rule(42, Some(tag_scope(JAZZ)));
    let resolver = h.engine.resolver();

    resolver.toggle(42, P, true).await.unwrap();
    assert!(h.manually_enabled(P).await.contains(&42));

    // The rule starts matching the post automatically.
    rule.scope = Some(tag_scope(ROCK));
    h.engine.service().update(&rule).await.unwrap();
    h.drain().await;
    assert_eq!(h.rules_for(P).await, vec![42]);
    assert!(h.manually_enabled(P).await.is_empty());

    // Enabling again must not re-add it to the manual set.
    resolver.toggle(42, P, true).await.unwrap();
    assert!(h.manually_enabled(P).await.is_empty());
    assert_eq!(ids(&resolver.effective_rules(P).await.unwrap()), vec![42]);
}

#[tokio::test]
async fn effective_rules_skip_inactive_and_missing_rules() {
    let h = Harness::new(10);
    h.ticketed(tagged(P, JAZZ));
    h.rule(1, Some(Scope::all()));
    let mut inactive = h.rule(2, Some(Scope::all()));
    inactive.status = RuleStatus::Inactive;
    h.store.put_rule(inactive).unwrap();
    h.store
        .insert_rows(&[
            Relationship::new(1, P),
            Relationship::new(2, P),
            Relationship::new(404, P),
        ])
        .await
        .unwrap();

    let rules = h.engine.resolver().effective_rules(P).await.unwrap();
    assert_eq!(ids(&rules), vec![1]);
}

#[tokio::test]
async fn effective_rules_of_type_filters_by_family() {
    let h = Harness::new(10);
    h.ticketed(tagged(P, JAZZ));
    for (id, rule_type) in [
        (1, RuleType::OrderDiscount),
        (2, RuleType::TicketPurchaseLimit),
        (3, RuleType::OrderDiscount),
    ] {
        let rule = NewRule::new(rule_type, Some(Scope::all())).into_rule(id, Utc::now());
        h.store.put_rule(rule).unwrap();
    }
    h.engine.publish(ScopeEvent::SweepRequested).await.unwrap();
    h.drain().await;

    let resolver = h.engine.resolver();
    let discounts = resolver
        .effective_rules_of_type(P, RuleType::OrderDiscount)
        .await
        .unwrap();
    assert_eq!(ids(&discounts), vec![1, 3]);
    assert!(resolver
        .effective_rules_of_type(P, RuleType::CombinedPurchase)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn admin_view_tags_source_and_state() {
    let h = harness_with_automatic_42().await;
    h.rule(43, Some(Scope::all()));
    h.rule(7, Some(tag_scope(ROCK)));
    h.store.insert_rows(&[Relationship::new(43, P)]).await.unwrap();
    let resolver = h.engine.resolver();

    resolver.toggle(43, P, false).await.unwrap();
    resolver.toggle(7, P, true).await.unwrap();

    let entries = resolver.effective_rules_admin(P).await.unwrap();
    let view: Vec<_> = entries
        .iter()
        .map(|e| (e.rule.id, e.enabled, e.source))
        .collect();
    assert_eq!(
        view,
        vec![
            (7, true, RuleSource::Manual),
            (42, true, RuleSource::Automatic),
            (43, false, RuleSource::Automatic),
        ]
    );
}

#[tokio::test]
async fn toggles_on_other_posts_are_independent() {
    let h = harness_with_automatic_42().await;
    h.ticketed(tagged(P + 1, JAZZ));
    h.engine
        .publish(ScopeEvent::RuleScopeUpdated { rule_id: 42 })
        .await
        .unwrap();
    h.drain().await;

    h.engine.resolver().toggle(42, P, false).await.unwrap();

    let other = h.store.overrides(P + 1).await.unwrap();
    assert!(other.is_empty());
    assert_eq!(h.engine.resolver().effective_rule_ids(P + 1).await.unwrap().len(), 1);
}
