//! Purchase rule records and their scope definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::post::{TermId, TermRef, TermType};

pub type RuleId = i64;

/// What a rule does once it applies to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    OrderDiscount,
    TicketDiscount,
    EventPurchaseLimit,
    TicketPurchaseLimit,
    EventPurchaseMin,
    TicketPurchaseMin,
    UserRoleRestriction,
    CombinedPurchase,
}

impl RuleType {
    pub const ALL: [RuleType; 8] = [
        RuleType::OrderDiscount,
        RuleType::TicketDiscount,
        RuleType::EventPurchaseLimit,
        RuleType::TicketPurchaseLimit,
        RuleType::EventPurchaseMin,
        RuleType::TicketPurchaseMin,
        RuleType::UserRoleRestriction,
        RuleType::CombinedPurchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::OrderDiscount => "order-discount",
            RuleType::TicketDiscount => "ticket-discount",
            RuleType::EventPurchaseLimit => "event-purchase-limit",
            RuleType::TicketPurchaseLimit => "ticket-purchase-limit",
            RuleType::EventPurchaseMin => "event-purchase-min",
            RuleType::TicketPurchaseMin => "ticket-purchase-min",
            RuleType::UserRoleRestriction => "user-role-restriction",
            RuleType::CombinedPurchase => "combined-purchase",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownRuleType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "active",
            RuleStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RuleStatus::Active),
            "inactive" => Ok(RuleStatus::Inactive),
            other => Err(CoreError::UnknownRuleStatus(other.to_string())),
        }
    }
}

/// How a scope combines its criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connector {
    /// Applies to every ticketed post, criteria are ignored.
    All,
    /// Applies to nothing, criteria are ignored.
    None,
    And,
    Or,
}

impl Connector {
    /// `all` and `none` decide membership without looking at criteria.
    pub fn ignores_criteria(&self) -> bool {
        matches!(self, Connector::All | Connector::None)
    }
}

impl FromStr for Connector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Connector::All),
            "none" => Ok(Connector::None),
            "and" => Ok(Connector::And),
            "or" => Ok(Connector::Or),
            other => Err(CoreError::UnknownConnector(other.to_string())),
        }
    }
}

/// A single scope condition: the post must carry this term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Criterion {
    pub term: TermType,
    pub value: TermId,
}

impl Criterion {
    pub fn new(term: TermType, value: TermId) -> Self {
        Self { term, value }
    }

    pub fn term_ref(&self) -> TermRef {
        TermRef::new(self.term, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub connector: Connector,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl Scope {
    pub fn all() -> Self {
        Self {
            connector: Connector::All,
            criteria: Vec::new(),
        }
    }

    pub fn none() -> Self {
        Self {
            connector: Connector::None,
            criteria: Vec::new(),
        }
    }

    pub fn and(criteria: Vec<Criterion>) -> Self {
        Self {
            connector: Connector::And,
            criteria,
        }
    }

    pub fn or(criteria: Vec<Criterion>) -> Self {
        Self {
            connector: Connector::Or,
            criteria,
        }
    }
}

/// A persisted purchase rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Type-specific parameters (amounts, limits, roles). Opaque to the engine.
    #[serde(default)]
    pub config: serde_json::Value,
    pub scope: Option<Scope>,
    pub status: RuleStatus,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

/// A rule that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub config: serde_json::Value,
    pub scope: Option<Scope>,
    pub status: RuleStatus,
}

impl NewRule {
    pub fn new(rule_type: RuleType, scope: Option<Scope>) -> Self {
        Self {
            rule_type,
            config: serde_json::json!({}),
            scope,
            status: RuleStatus::Active,
        }
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn into_rule(self, id: RuleId, updated_at: DateTime<Utc>) -> Rule {
        Rule {
            id,
            rule_type: self.rule_type,
            config: self.config,
            scope: self.scope,
            status: self.status,
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_type_labels_roundtrip() {
        for t in RuleType::ALL {
            assert_eq!(t.as_str().parse::<RuleType>().unwrap(), t);
        }
        assert!("flash-sale".parse::<RuleType>().is_err());
    }

    #[test]
    fn rule_deserializes_from_stored_json() {
        let json = r#"{
            "id": 42,
            "type": "ticket-discount",
            "config": {"percent": 10},
            "scope": {"connector": "and", "criteria": [{"term": "tag", "value": 7}]},
            "status": "active",
            "updated_at": "2026-03-01T10:00:00Z"
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, 42);
        assert_eq!(rule.rule_type, RuleType::TicketDiscount);
        let scope = rule.scope.unwrap();
        assert_eq!(scope.connector, Connector::And);
        assert_eq!(scope.criteria, vec![Criterion::new(TermType::Tag, 7)]);
    }

    #[test]
    fn scope_without_criteria_defaults_to_empty() {
        let scope: Scope = serde_json::from_str(r#"{"connector": "all"}"#).unwrap();
        assert_eq!(scope, Scope::all());
        assert!(scope.connector.ignores_criteria());
    }

    #[test]
    fn null_scope_is_preserved() {
        let rule = NewRule::new(RuleType::OrderDiscount, None).into_rule(1, Utc::now());
        let json = serde_json::to_value(&rule).unwrap();
        assert!(json["scope"].is_null());
    }
}
