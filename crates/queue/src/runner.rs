//! Task runner: executes queued tasks with a per-message retry budget.
//!
//! A failed execution is re-dispatched with `attempt + 1` while the message
//! still has budget left. Once the budget is spent the message is abandoned
//! and recorded in the runner's abandoned-task report.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::consumer::TaskQueue;
use crate::error::QueueError;
use crate::message::TaskMessage;

// ── Handler trait ────────────────────────────────────────────────────

/// Executes one delivered task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, message: &TaskMessage) -> Result<(), Self::Error>;
}

// ── Reporting ────────────────────────────────────────────────────────

/// What happened to a single polled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Retried,
    Abandoned,
}

/// Counters accumulated over a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub executions: u64,
    pub completed: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl RunStats {
    fn record(&mut self, outcome: RunOutcome) {
        self.executions += 1;
        match outcome {
            RunOutcome::Completed => self.completed += 1,
            RunOutcome::Retried => self.retried += 1,
            RunOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// A task whose retry budget ran out.
#[derive(Debug, Clone, Serialize)]
pub struct AbandonedTask {
    pub id: Uuid,
    pub name: String,
    /// Total executions, including the first.
    pub executions: u32,
    pub last_error: String,
    pub abandoned_at: DateTime<Utc>,
}

// ── Runner ───────────────────────────────────────────────────────────

pub struct TaskRunner<H: TaskHandler> {
    queue: Arc<dyn TaskQueue>,
    handler: Arc<H>,
    abandoned: Mutex<Vec<AbandonedTask>>,
}

impl<H: TaskHandler> TaskRunner<H> {
    pub fn new(queue: Arc<dyn TaskQueue>, handler: Arc<H>) -> Self {
        Self {
            queue,
            handler,
            abandoned: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Poll one message and execute it. Returns `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<RunOutcome>, QueueError> {
        let Some(message) = self.queue.poll().await? else {
            return Ok(None);
        };

        debug!(task = %message.name, id = %message.id, attempt = message.attempt, "executing task");
        match self.handler.handle(&message).await {
            Ok(()) => Ok(Some(RunOutcome::Completed)),
            Err(e) if message.can_retry() => {
                warn!(
                    task = %message.name,
                    id = %message.id,
                    attempt = message.attempt,
                    max_retries = message.max_retries,
                    error = %e,
                    "task failed, retrying"
                );
                self.queue.dispatch(message.retried()).await?;
                Ok(Some(RunOutcome::Retried))
            }
            Err(e) => {
                error!(
                    task = %message.name,
                    id = %message.id,
                    executions = message.attempt + 1,
                    error = %e,
                    "task abandoned after exhausting retries"
                );
                self.lock_abandoned()?.push(AbandonedTask {
                    id: message.id,
                    name: message.name.clone(),
                    executions: message.attempt + 1,
                    last_error: e.to_string(),
                    abandoned_at: Utc::now(),
                });
                Ok(Some(RunOutcome::Abandoned))
            }
        }
    }

    /// Execute messages until the queue is empty, continuations included.
    pub async fn drain(&self) -> Result<RunStats, QueueError> {
        let mut stats = RunStats::default();
        while let Some(outcome) = self.run_once().await? {
            stats.record(outcome);
        }
        if stats.executions > 0 {
            info!(
                executions = stats.executions,
                completed = stats.completed,
                retried = stats.retried,
                abandoned = stats.abandoned,
                "queue drained"
            );
        }
        Ok(stats)
    }

    /// Long-running loop: drain, then sleep until new work or shutdown.
    ///
    /// Trigger shutdown with `notify_one` so a signal sent while a task is
    /// executing is not lost.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<RunStats, QueueError> {
        let mut total = RunStats::default();
        info!("task runner started");
        loop {
            while let Some(outcome) = self.run_once().await? {
                total.record(outcome);
            }
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = self.queue.wait_for_message() => {}
            }
        }
        info!(executions = total.executions, abandoned = total.abandoned, "task runner stopped");
        Ok(total)
    }

    /// Tasks abandoned so far.
    pub fn abandoned(&self) -> Result<Vec<AbandonedTask>, QueueError> {
        Ok(self.lock_abandoned()?.clone())
    }

    fn lock_abandoned(&self) -> Result<std::sync::MutexGuard<'_, Vec<AbandonedTask>>, QueueError> {
        self.abandoned
            .lock()
            .map_err(|e| QueueError::LockPoisoned(format!("abandoned report: {e}")))
    }
}
