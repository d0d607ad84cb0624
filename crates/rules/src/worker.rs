//! Task handler routing queued tasks to the scope jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rulescope_core::BatchSizeSource;
use rulescope_queue::{TaskHandler, TaskMessage};

use crate::cleanup::CriterionCleanup;
use crate::error::RulesError;
use crate::recompute::ScopeRecompute;
use crate::task::Task;

#[derive(Clone)]
pub struct ScopeWorker {
    recompute: ScopeRecompute,
    cleanup: CriterionCleanup,
    batch_size: Arc<dyn BatchSizeSource>,
}

impl ScopeWorker {
    pub fn new(
        recompute: ScopeRecompute,
        cleanup: CriterionCleanup,
        batch_size: Arc<dyn BatchSizeSource>,
    ) -> Self {
        Self {
            recompute,
            cleanup,
            batch_size,
        }
    }
}

#[async_trait]
impl TaskHandler for ScopeWorker {
    type Error = RulesError;

    async fn handle(&self, message: &TaskMessage) -> Result<(), RulesError> {
        let task = Task::from_message(message)?;
        // Never cached: each execution sees the current setting.
        let batch_size = self.batch_size.batch_size();
        debug!(task = %task, batch_size, attempt = message.attempt, "handling task");

        match task {
            Task::Scope(task) => {
                self.recompute.execute(&task, batch_size).await?;
            }
            Task::Cleanup(task) => {
                self.cleanup.execute(&task, batch_size).await?;
            }
        }
        Ok(())
    }
}
