//! Reserved id ranges for rows that are being rebuilt.
//!
//! A recomputation writes its new rows with one dimension shifted into a
//! staging range, then promotes them in a single finalize step. Real rule and
//! post ids stay below [`STAGE_RULE`], so any id at or above it is staged.

use crate::post::PostId;
use crate::rule::RuleId;

/// Offset added to the rule id of rows staged by a rule-caused rebuild.
pub const STAGE_RULE: i64 = 3_000_000_000;

/// Offset added to the post id of rows staged by a post-caused rebuild.
pub const STAGE_POST: i64 = 5_000_000_000;

pub fn staged_rule(rule_id: RuleId) -> RuleId {
    STAGE_RULE + rule_id
}

pub fn staged_post(post_id: PostId) -> PostId {
    STAGE_POST + post_id
}

/// Whether an id (rule or post dimension) is a real, canonical id.
pub fn is_canonical(id: i64) -> bool {
    (0..STAGE_RULE).contains(&id)
}
