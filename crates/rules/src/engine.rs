//! Wiring of stores, queue, jobs and resolver into one engine.

use std::sync::Arc;

use rulescope_core::BatchSizeSource;
use rulescope_queue::{TaskQueue, TaskRunner};
use rulescope_storage::Stores;

use crate::cleanup::CriterionCleanup;
use crate::error::Result;
use crate::events::{EventSink, ScopeEvent, TaskDispatcher};
use crate::matcher::ScopeMatcher;
use crate::recompute::ScopeRecompute;
use crate::resolver::RuleResolver;
use crate::service::RuleService;
use crate::worker::ScopeWorker;

pub struct ScopeEngine {
    stores: Stores,
    queue: Arc<dyn TaskQueue>,
    dispatcher: TaskDispatcher,
    service: RuleService,
    resolver: RuleResolver,
    worker: Arc<ScopeWorker>,
}

impl ScopeEngine {
    pub fn new(
        stores: Stores,
        queue: Arc<dyn TaskQueue>,
        matcher: Arc<dyn ScopeMatcher>,
        batch_size: Arc<dyn BatchSizeSource>,
        max_retries: u32,
    ) -> Self {
        let dispatcher = TaskDispatcher::new(queue.clone(), max_retries);
        let service = RuleService::new(&stores, Arc::new(dispatcher.clone()));
        let resolver = RuleResolver::new(&stores);
        let recompute = ScopeRecompute::new(stores.clone(), matcher, dispatcher.clone());
        let cleanup = CriterionCleanup::new(stores.rules.clone(), service.clone(), dispatcher.clone());
        let worker = Arc::new(ScopeWorker::new(recompute, cleanup, batch_size));

        Self {
            stores,
            queue,
            dispatcher,
            service,
            resolver,
            worker,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn service(&self) -> &RuleService {
        &self.service
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub fn worker(&self) -> &Arc<ScopeWorker> {
        &self.worker
    }

    /// A runner executing this engine's tasks from its queue.
    pub fn runner(&self) -> TaskRunner<ScopeWorker> {
        TaskRunner::new(self.queue.clone(), self.worker.clone())
    }

    pub async fn publish(&self, event: ScopeEvent) -> Result<()> {
        self.dispatcher.publish(event).await
    }
}
