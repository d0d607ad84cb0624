//! Scope matching: does a rule's scope select a post?

use rulescope_core::{Connector, Post, Rule};

/// Pure predicate deciding whether `rule` applies to `post`.
///
/// Implementations must not consult rule status or post status; the jobs
/// decide which rules and posts are candidates.
pub trait ScopeMatcher: Send + Sync {
    fn matches(&self, rule: &Rule, post: &Post) -> bool;
}

/// Matches scope criteria against the post's taxonomy terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermMatcher;

impl ScopeMatcher for TermMatcher {
    fn matches(&self, rule: &Rule, post: &Post) -> bool {
        let Some(scope) = &rule.scope else {
            return false;
        };
        match scope.connector {
            Connector::All => true,
            Connector::None => false,
            Connector::And => {
                !scope.criteria.is_empty()
                    && scope.criteria.iter().all(|c| post.has_term(c.term_ref()))
            }
            Connector::Or => scope.criteria.iter().any(|c| post.has_term(c.term_ref())),
        }
    }
}
