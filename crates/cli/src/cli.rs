use clap::{Parser, Subcommand, ValueEnum};
use rulescope_core::{PostId, RuleId, RuleStatus, RuleType, TermId, TermType};

/// Maintain purchase-rule scopes against a PostgreSQL deployment.
///
/// Every command enqueues its work and then drains the in-process runner,
/// so the command returns once the index has converged (or a task was abandoned).
#[derive(Parser, Debug)]
#[command(name = "rulescope", about = "Purchase-rule scope maintenance")]
pub struct CliArgs {
    /// Config profile (keys are read as {PROFILE}_{KEY}, then {KEY})
    #[arg(long, env = "RULESCOPE_PROFILE", default_value = "")]
    pub profile: String,

    /// Fixed batch size for this run (default: re-read RULESCOPE_BATCH_SIZE per task)
    #[arg(long)]
    pub batch_size: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Rebuild the index for every active rule.
    Sweep,

    /// Recompute relationships for one rule, post, or ticket.
    Recompute {
        #[command(subcommand)]
        target: Target,
    },

    /// Strip a deleted taxonomy term from every rule scope.
    TermDeleted {
        term: TermType,
        id: TermId,
    },

    /// Activate or deactivate a rule.
    RuleStatus {
        id: RuleId,
        status: RuleStatus,
    },

    /// Manually enable or disable a rule for one post.
    Toggle {
        rule: RuleId,
        post: PostId,
        state: Switch,
    },

    /// Print the rules in effect for a post as JSON.
    Effective {
        post: PostId,

        /// Include disabled automatic rules and tag each entry with its source
        #[arg(long)]
        admin: bool,

        /// Only rules of this type
        #[arg(long = "type", conflicts_with = "admin")]
        rule_type: Option<RuleType>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Target {
    Rule { id: RuleId },
    Post { id: PostId },
    Ticket { id: i64 },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}
