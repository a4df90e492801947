//! Wiring of store, broker, coordinators and worker pools.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::orchestration::{InMemoryBroker, OrchestratorConfig, TaskBroker, TaskHandle, TaskPayload, WorkerRuntime};
use crate::publish::{CodeHost, MetadataCallback, PublishCoordinator, PublishSettings, SiblingProvisioner};
use crate::snapshot::SnapshotCoordinator;
use crate::store::DatasetStore;
use crate::tasks::{TaskService, TaskSubmitter};

/// A running set of worker pools plus the submitter feeding them.
pub struct TaskSystem {
    runtime: WorkerRuntime,
    submitter: TaskSubmitter,
    broker: Arc<InMemoryBroker>,
}

impl fmt::Debug for TaskSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSystem")
            .field("runtime", &self.runtime)
            .field("submitter", &self.submitter)
            .finish()
    }
}

impl TaskSystem {
    /// Validates `config` and wires every component. Workers are not
    /// started until [`TaskSystem::start`].
    pub fn build(
        config: &OrchestratorConfig,
        store: Arc<dyn DatasetStore>,
        settings: PublishSettings,
        code_host: Arc<dyn CodeHost>,
        callback: Arc<dyn MetadataCallback>,
    ) -> Result<Self> {
        config.validate()?;
        let router = config.router()?;
        let broker = Arc::new(InMemoryBroker::for_router(&router, config.concurrency));
        let dyn_broker: Arc<dyn TaskBroker> = broker.clone();

        let snapshots = Arc::new(SnapshotCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&dyn_broker),
            router.clone(),
            config.join_strategy,
        )?);
        let provisioner = Arc::new(SiblingProvisioner::new(Arc::new(settings), code_host));
        let publisher = Arc::new(PublishCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&dyn_broker),
            router.clone(),
            provisioner,
            callback,
        ));

        let registry = Arc::new(Arc::new(TaskService::new(store, snapshots, publisher)).into_registry());
        let runtime = WorkerRuntime::new(Arc::clone(&broker), Arc::clone(&registry))
            .with_task_retention(config.task_retention());
        let submitter = TaskSubmitter::new(dyn_broker, registry, router);
        Ok(Self {
            runtime,
            submitter,
            broker,
        })
    }

    /// Starts every worker pool and the finished-task pruning pass.
    pub async fn start(&self) {
        self.runtime.start().await;
        info!(queues = self.broker.queues().len(), "task system started");
    }

    /// Stops the workers, resetting datasets of interrupted tasks.
    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
    }

    /// Producer handle for intake layers.
    pub fn submitter(&self) -> TaskSubmitter {
        self.submitter.clone()
    }

    /// Routes and enqueues `payload`.
    pub async fn submit(&self, payload: TaskPayload) -> Result<TaskHandle> {
        self.submitter.submit(payload).await
    }

    /// Broker behind the runtime.
    pub fn broker(&self) -> Arc<InMemoryBroker> {
        Arc::clone(&self.broker)
    }

    /// Worker pools.
    pub fn runtime(&self) -> &WorkerRuntime {
        &self.runtime
    }
}
