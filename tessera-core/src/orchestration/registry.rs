use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, TaskError};

use super::job::{TaskKind, TaskPayload};
use super::queue::{QueueName, QueueRouter, QueueSelector};

/// Executes one kind of task on a worker.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs `payload` to completion; the value becomes the task output.
    async fn handle(&self, payload: TaskPayload) -> Result<Value>;

    /// Cleans up after a run of `payload` that was cancelled or panicked.
    /// Called by the worker once the interrupted run has been dropped.
    async fn abort(&self, _payload: &TaskPayload) {}
}

#[derive(Clone)]
struct Registration {
    selector: QueueSelector,
    handler: Arc<dyn TaskHandler>,
}

/// Lookup table from task kind to its queue selector and handler.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: HashMap<TaskKind, Registration>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self
            .entries
            .iter()
            .map(|(kind, entry)| format!("{kind}:{:?}", entry.selector))
            .collect();
        kinds.sort();
        f.debug_struct("TaskRegistry").field("entries", &kinds).finish()
    }
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. A later registration replaces an
    /// earlier one.
    pub fn register(
        &mut self,
        kind: TaskKind,
        selector: QueueSelector,
        handler: Arc<dyn TaskHandler>,
    ) -> &mut Self {
        self.entries.insert(kind, Registration { selector, handler });
        self
    }

    /// Selector registered for `kind`.
    pub fn selector(&self, kind: TaskKind) -> Option<QueueSelector> {
        self.entries.get(&kind).map(|entry| entry.selector)
    }

    /// True if a handler exists for `kind`.
    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Queue a payload should be enqueued on.
    pub fn route(&self, router: &QueueRouter, payload: &TaskPayload) -> Result<QueueName> {
        let kind = payload.kind();
        let selector = self
            .selector(kind)
            .ok_or_else(|| TaskError::Internal(format!("no handler registered for {kind}")))?;
        Ok(router.select(selector, payload.dataset()))
    }

    /// Runs the handler registered for the payload's kind.
    pub async fn dispatch(&self, payload: TaskPayload) -> Result<Value> {
        let kind = payload.kind();
        let entry = self
            .entries
            .get(&kind)
            .ok_or_else(|| TaskError::Internal(format!("no handler registered for {kind}")))?;
        entry.handler.handle(payload).await
    }

    /// Runs the registered handler's [`TaskHandler::abort`] for `payload`.
    pub async fn abort(&self, payload: &TaskPayload) {
        if let Some(entry) = self.entries.get(&payload.kind()) {
            entry.handler.abort(payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::job::{DeleteDatasetTask, PublishGithubTask};
    use crate::types::DatasetId;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, payload: TaskPayload) -> Result<Value> {
            Ok(Value::from(payload.kind().to_string()))
        }
    }

    fn dataset() -> DatasetId {
        DatasetId::new("ds000001").unwrap()
    }

    #[tokio::test]
    async fn dispatch_uses_registered_handler() {
        let mut registry = TaskRegistry::new();
        registry.register(TaskKind::DeleteDataset, QueueSelector::Dataset, Arc::new(Echo));

        let out = registry
            .dispatch(TaskPayload::DeleteDataset(DeleteDatasetTask { dataset: dataset() }))
            .await
            .unwrap();
        assert_eq!(out, Value::from("delete_dataset"));
    }

    #[tokio::test]
    async fn unregistered_kind_fails() {
        let registry = TaskRegistry::new();
        let err = registry
            .dispatch(TaskPayload::DeleteDataset(DeleteDatasetTask { dataset: dataset() }))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Internal(_)));
    }

    #[test]
    fn route_follows_selector() {
        let router = QueueRouter::new(4).unwrap();
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::DeleteDataset, QueueSelector::Dataset, Arc::new(Echo))
            .register(TaskKind::PublishGithub, QueueSelector::Publish, Arc::new(Echo));

        let delete = TaskPayload::DeleteDataset(DeleteDatasetTask { dataset: dataset() });
        assert_eq!(
            registry.route(&router, &delete).unwrap(),
            router.queue_for(&dataset())
        );

        let github = TaskPayload::PublishGithub(PublishGithubTask {
            dataset: dataset(),
            tag: "1.0.0".into(),
            github_remote: "github".into(),
        });
        assert!(registry.route(&router, &github).unwrap().is_publish());
    }
}
