//! Binds every [`TaskKind`] to its handler and queue.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::editor::{ChangesEntry, update_changes, update_description};
use crate::error::Result;
use crate::lifecycle::{commit_files, create_dataset, delete_dataset, get_files, unlock_files};
use crate::orchestration::{
    QueueRouter, QueueSelector, TaskBroker, TaskHandle, TaskHandler, TaskKind, TaskPayload,
    TaskRegistry,
};
use crate::publish::PublishCoordinator;
use crate::snapshot::SnapshotCoordinator;
use crate::store::DatasetStore;

/// Queue each task kind runs on. Only the outbound publish jobs leave the
/// dataset's own queue.
pub fn selector_for(kind: TaskKind) -> QueueSelector {
    match kind {
        TaskKind::PublishS3 | TaskKind::PublishGithub => QueueSelector::Publish,
        TaskKind::CreateDataset
        | TaskKind::DeleteDataset
        | TaskKind::CommitFiles
        | TaskKind::UnlockFiles
        | TaskKind::GetFiles
        | TaskKind::UpdateDescription
        | TaskKind::UpdateChanges
        | TaskKind::CreateSnapshot
        | TaskKind::PublishSnapshot
        | TaskKind::MigrateToBucket => QueueSelector::Dataset,
    }
}

/// Worker-side handler for every task kind.
pub struct TaskService {
    store: Arc<dyn DatasetStore>,
    snapshots: Arc<SnapshotCoordinator>,
    publisher: Arc<PublishCoordinator>,
}

impl fmt::Debug for TaskService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskService")
            .field("snapshots", &self.snapshots)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl TaskService {
    /// Service dispatching to the given coordinators.
    pub fn new(
        store: Arc<dyn DatasetStore>,
        snapshots: Arc<SnapshotCoordinator>,
        publisher: Arc<PublishCoordinator>,
    ) -> Self {
        Self {
            store,
            snapshots,
            publisher,
        }
    }

    /// Registry routing every kind to this service.
    pub fn into_registry(self: Arc<Self>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for kind in TaskKind::ALL {
            registry.register(kind, selector_for(kind), self.clone());
        }
        registry
    }
}

#[async_trait]
impl TaskHandler for TaskService {
    async fn handle(&self, payload: TaskPayload) -> Result<Value> {
        debug!(kind = %payload.kind(), dataset = %payload.dataset(), "handling task");
        match payload {
            TaskPayload::CreateDataset(task) => {
                let commit = create_dataset(self.store.as_ref(), &task.dataset, task.author).await?;
                Ok(json!({ "commit": commit }))
            }
            TaskPayload::DeleteDataset(task) => {
                delete_dataset(self.store.as_ref(), &task.dataset).await?;
                Ok(Value::Null)
            }
            TaskPayload::CommitFiles(task) => {
                let commit =
                    commit_files(self.store.as_ref(), &task.dataset, &task.files, task.author)
                        .await?;
                Ok(json!({ "commit": commit }))
            }
            TaskPayload::UnlockFiles(task) => {
                unlock_files(self.store.as_ref(), &task.dataset, &task.files).await?;
                Ok(json!({ "unlocked": task.files }))
            }
            TaskPayload::GetFiles(task) => {
                let files =
                    get_files(self.store.as_ref(), &task.dataset, task.branch.as_deref()).await?;
                Ok(json!({ "files": files }))
            }
            TaskPayload::UpdateDescription(task) => {
                let dataset = self.store.get_dataset(&task.dataset);
                let edited = update_description(&dataset, task.fields, task.author).await?;
                Ok(json!({ "commit": edited.commit, "description": edited.document }))
            }
            TaskPayload::UpdateChanges(task) => {
                let dataset = self.store.get_dataset(&task.dataset);
                let entry = match task.date {
                    Some(date) => ChangesEntry::new(task.tag, date, task.changes),
                    None => ChangesEntry::today(task.tag, task.changes),
                };
                let edited = update_changes(&dataset, entry, task.author).await?;
                Ok(json!({ "commit": edited.commit, "changes": edited.document }))
            }
            TaskPayload::CreateSnapshot(task) => {
                let commit = self.snapshots.create_snapshot(task).await?;
                Ok(json!({ "commit": commit }))
            }
            TaskPayload::PublishSnapshot(task) => {
                let dispatch = self.publisher.publish_snapshot(task).await?;
                Ok(serde_json::to_value(dispatch.summary())?)
            }
            TaskPayload::PublishS3(task) => {
                let files = self.publisher.publish_s3(task).await?;
                Ok(json!({ "files": files }))
            }
            TaskPayload::PublishGithub(task) => {
                self.publisher.publish_github(task).await?;
                Ok(Value::Null)
            }
            TaskPayload::MigrateToBucket(task) => {
                let report = self.publisher.migrate_to_bucket(task).await?;
                Ok(serde_json::to_value(report)?)
            }
        }
    }

    /// Restores HEAD in the working tree of an interrupted dataset task so
    /// half-staged edits never reach the next task on that dataset.
    async fn abort(&self, payload: &TaskPayload) {
        if selector_for(payload.kind()) != QueueSelector::Dataset {
            return;
        }
        let dataset = self.store.get_dataset(payload.dataset());
        match dataset.repo.reset().await {
            Ok(()) => info!(dataset = %dataset.id, "working tree reset after interrupted task"),
            Err(err) => warn!(dataset = %dataset.id, error = %err, "reset after interrupted task failed"),
        }
    }
}

/// Producer-side entry point: routes a payload and enqueues it.
#[derive(Clone)]
pub struct TaskSubmitter {
    broker: Arc<dyn TaskBroker>,
    registry: Arc<TaskRegistry>,
    router: QueueRouter,
}

impl fmt::Debug for TaskSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubmitter")
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl TaskSubmitter {
    /// Submitter routing through `registry` and `router`.
    pub fn new(broker: Arc<dyn TaskBroker>, registry: Arc<TaskRegistry>, router: QueueRouter) -> Self {
        Self {
            broker,
            registry,
            router,
        }
    }

    /// Routes and enqueues `payload`; fails for unregistered kinds.
    pub async fn submit(&self, payload: TaskPayload) -> Result<TaskHandle> {
        let queue = self.registry.route(&self.router, &payload)?;
        self.broker.enqueue(&queue, payload).await
    }

    /// Broker tasks are enqueued on.
    pub fn broker(&self) -> &Arc<dyn TaskBroker> {
        &self.broker
    }
}
