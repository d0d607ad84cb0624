use thiserror::Error;

use rulescope_core::{CoreError, RuleId};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    Decode(#[from] CoreError),

    #[error("rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
