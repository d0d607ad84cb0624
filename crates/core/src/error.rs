use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("unknown rule status: {0}")]
    UnknownRuleStatus(String),

    #[error("unknown term type: {0}")]
    UnknownTermType(String),

    #[error("unknown connector: {0}")]
    UnknownConnector(String),
}
