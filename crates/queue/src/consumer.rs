//! Task queue trait and the in-process FIFO implementation.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::message::TaskMessage;

/// At-least-once task queue.
///
/// No ordering is promised between unrelated tasks; a continuation is only
/// dispatched by the execution that precedes it, so chains stay sequential.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn dispatch(&self, message: TaskMessage) -> Result<(), QueueError>;

    /// Take the next message, or `None` when the queue is empty.
    async fn poll(&self) -> Result<Option<TaskMessage>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Resolve once a message may be available.
    async fn wait_for_message(&self);
}

/// FIFO queue held in memory, with a wake-up notifier for idle runners.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<TaskMessage>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<TaskMessage>>, QueueError> {
        self.messages
            .lock()
            .map_err(|e| QueueError::LockPoisoned(format!("memory queue: {e}")))
    }

    /// Copies of the pending messages in delivery order.
    pub fn pending(&self) -> Result<Vec<TaskMessage>, QueueError> {
        Ok(self.lock()?.iter().cloned().collect())
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn dispatch(&self, message: TaskMessage) -> Result<(), QueueError> {
        self.lock()?.push_back(message);
        self.notify.notify_one();
        Ok(())
    }

    async fn poll(&self) -> Result<Option<TaskMessage>, QueueError> {
        Ok(self.lock()?.pop_front())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.len())
    }

    async fn wait_for_message(&self) {
        self.notify.notified().await;
    }
}
