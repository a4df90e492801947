//! Snapshot creation: update the description and changelog, then tag.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::editor::{ChangesEntry, update_changes, update_description};
use crate::error::{Result, TaskError};
use crate::orchestration::{
    CreateSnapshotTask, JoinStrategy, QueueRouter, TaskBroker, TaskKind, TaskPayload, TaskState,
};
use crate::store::{Dataset, DatasetStore, validate_ref_name};
use crate::types::CommitId;

/// Result of one editor sub-task.
#[derive(Debug, Clone)]
struct SubtaskOutcome {
    kind: TaskKind,
    error: Option<String>,
}

impl SubtaskOutcome {
    fn from_result<T>(kind: TaskKind, result: Result<T>) -> Self {
        Self {
            kind,
            error: result.err().map(|err| err.to_string()),
        }
    }

    fn from_state(kind: TaskKind, state: TaskState) -> Self {
        let error = match state {
            TaskState::Failed { error } => Some(error),
            TaskState::Succeeded { .. } => None,
            TaskState::Pending => Some("sub-task did not finish".into()),
        };
        Self { kind, error }
    }
}

/// Joins the two editor sub-tasks and tags the dataset only when both
/// succeeded.
pub struct SnapshotCoordinator {
    store: Arc<dyn DatasetStore>,
    broker: Arc<dyn TaskBroker>,
    router: QueueRouter,
    strategy: JoinStrategy,
}

impl fmt::Debug for SnapshotCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCoordinator")
            .field("router", &self.router)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl SnapshotCoordinator {
    /// Fails with [`TaskError::ConfigurationMissing`] when `strategy` is
    /// [`JoinStrategy::Queued`] and the broker does not serve every editor
    /// lane the router can pick.
    pub fn new(
        store: Arc<dyn DatasetStore>,
        broker: Arc<dyn TaskBroker>,
        router: QueueRouter,
        strategy: JoinStrategy,
    ) -> Result<Self> {
        if strategy == JoinStrategy::Queued {
            for queue in router.editor_queues() {
                if broker.concurrency(&queue).unwrap_or(0) == 0 {
                    return Err(TaskError::ConfigurationMissing(format!(
                        "queued snapshot joins need a consumer on {queue}"
                    )));
                }
            }
        }
        Ok(Self {
            store,
            broker,
            router,
            strategy,
        })
    }

    /// How editors are joined.
    pub fn strategy(&self) -> JoinStrategy {
        self.strategy
    }

    /// Creates tag `task.tag` and returns the commit it points to.
    #[instrument(
        name = "snapshot.create",
        skip(self, task),
        fields(dataset = %task.dataset, tag = %task.tag, strategy = %self.strategy),
        err
    )]
    pub async fn create_snapshot(&self, task: CreateSnapshotTask) -> Result<CommitId> {
        validate_ref_name(&task.tag)?;
        let dataset = self.store.get_dataset(&task.dataset);
        let tags = dataset.repo.tags().await?;
        if tags.iter().any(|tag| tag.name == task.tag) {
            return Err(TaskError::NameConflict(task.tag.clone()));
        }

        let outcomes = match self.strategy {
            JoinStrategy::InProcess => self.run_in_process(&dataset, &task).await,
            JoinStrategy::Queued => self.run_queued(&task).await?,
        };

        let failed: Vec<&SubtaskOutcome> =
            outcomes.iter().filter(|outcome| outcome.error.is_some()).collect();
        if !failed.is_empty() {
            for outcome in &failed {
                warn!(
                    kind = %outcome.kind,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "snapshot sub-task failed"
                );
            }
            return Err(TaskError::SnapshotAborted {
                failed: failed.iter().map(|outcome| outcome.kind).collect(),
                details: failed
                    .iter()
                    .filter_map(|outcome| outcome.error.clone())
                    .collect(),
            });
        }

        let commit = dataset.repo.tag(&task.tag).await?;
        info!(%commit, "snapshot tagged");
        Ok(commit)
    }

    /// Runs both editors in this task. The changelog runs even when the
    /// description edit failed.
    async fn run_in_process(
        &self,
        dataset: &Dataset,
        task: &CreateSnapshotTask,
    ) -> Vec<SubtaskOutcome> {
        let description = task.description_task();
        let described = update_description(dataset, description.fields, description.author).await;

        let changes = task.changes_task();
        let entry = match changes.date {
            Some(date) => ChangesEntry::new(changes.tag, date, changes.changes),
            None => ChangesEntry::today(changes.tag, changes.changes),
        };
        let changed = update_changes(dataset, entry, changes.author).await;

        vec![
            SubtaskOutcome::from_result(TaskKind::UpdateDescription, described),
            SubtaskOutcome::from_result(TaskKind::UpdateChanges, changed),
        ]
    }

    /// Enqueues both editors on the dataset's editor lane and waits for
    /// both. The lane never runs coordinators, so the editors make progress
    /// however many coordinators hold dataset consumers.
    async fn run_queued(&self, task: &CreateSnapshotTask) -> Result<Vec<SubtaskOutcome>> {
        let queue = self.router.editor_queue_for(&task.dataset);
        let mut description = self
            .broker
            .enqueue(&queue, TaskPayload::UpdateDescription(task.description_task()))
            .await?;
        let mut changes = self
            .broker
            .enqueue(&queue, TaskPayload::UpdateChanges(task.changes_task()))
            .await?;

        let description_state = description.wait().await;
        let changes_state = changes.wait().await;
        Ok(vec![
            SubtaskOutcome::from_state(TaskKind::UpdateDescription, description_state),
            SubtaskOutcome::from_state(TaskKind::UpdateChanges, changes_state),
        ])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;
    use crate::editor::description::DESCRIPTION_PATH;
    use crate::orchestration::{InMemoryBroker, QueueConcurrency};
    use crate::store::InMemoryStore;
    use crate::types::{CommitAuthor, DatasetId};

    fn id() -> DatasetId {
        DatasetId::new("ds000001").unwrap()
    }

    fn task(tag: &str) -> CreateSnapshotTask {
        let mut description_fields = Map::new();
        description_fields.insert("Name".into(), Value::from("Balloon Analog"));
        CreateSnapshotTask {
            dataset: id(),
            tag: tag.into(),
            description_fields,
            snapshot_changes: vec!["Fixed events".into()],
            author: CommitAuthor::new("Ada", "ada@example.org"),
        }
    }

    async fn coordinator() -> (InMemoryStore, SnapshotCoordinator) {
        let store = InMemoryStore::new();
        store
            .seed(&id(), [(DESCRIPTION_PATH, r#"{"Name":"Balloon"}"#)])
            .await
            .unwrap();
        let router = QueueRouter::new(1).unwrap();
        let broker = Arc::new(InMemoryBroker::for_router(&router, QueueConcurrency::default()));
        let coordinator = SnapshotCoordinator::new(
            Arc::new(store.clone()),
            broker,
            router,
            JoinStrategy::InProcess,
        )
        .unwrap();
        (store, coordinator)
    }

    #[tokio::test]
    async fn tags_after_both_editors_commit() {
        let (store, coordinator) = coordinator().await;

        let commit = coordinator.create_snapshot(task("1.0.0")).await.unwrap();

        let log = store.commit_log(&id()).await;
        assert_eq!(log.len(), 3);
        assert_eq!(log.last().unwrap().id, commit);
        let tags = store.get_dataset(&id()).repo.tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].commit, commit);
    }

    #[tokio::test]
    async fn existing_tag_is_a_name_conflict_without_side_effects() {
        let (store, coordinator) = coordinator().await;
        coordinator.create_snapshot(task("1.0.0")).await.unwrap();
        let commits = store.commit_log(&id()).await.len();

        let err = coordinator.create_snapshot(task("1.0.0")).await.unwrap_err();
        assert!(matches!(err, TaskError::NameConflict(ref tag) if tag == "1.0.0"));
        assert_eq!(err.to_string(), "Tag \"1.0.0\" already exists, name conflict");
        assert_eq!(store.commit_log(&id()).await.len(), commits);
    }

    #[tokio::test]
    async fn failed_editor_aborts_tag_but_keeps_sibling_commit() {
        let (store, coordinator) = coordinator().await;
        store
            .get_dataset(&id())
            .repo
            .write_working_file(DESCRIPTION_PATH, b"{}")
            .await
            .unwrap();

        let err = coordinator.create_snapshot(task("1.0.0")).await.unwrap_err();
        match err {
            TaskError::SnapshotAborted { failed, details } => {
                assert_eq!(failed, vec![TaskKind::UpdateDescription]);
                assert!(details[0].contains("Precondition conflict"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(store.get_dataset(&id()).repo.tags().await.unwrap().is_empty());
        let log = store.commit_log(&id()).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log.last().unwrap().message, "Update CHANGES for 1.0.0");
    }

    #[test]
    fn queued_join_requires_editor_lanes() {
        let router = QueueRouter::new(2).unwrap();
        let bare = Arc::new(InMemoryBroker::new(
            router.dataset_queues().into_iter().map(|queue| (queue, 2)),
        ));
        let err = SnapshotCoordinator::new(
            Arc::new(InMemoryStore::new()),
            bare,
            router.clone(),
            JoinStrategy::Queued,
        )
        .unwrap_err();
        assert!(matches!(err, TaskError::ConfigurationMissing(_)));

        let broker = Arc::new(InMemoryBroker::for_router(&router, QueueConcurrency::default()));
        let coordinator =
            SnapshotCoordinator::new(Arc::new(InMemoryStore::new()), broker, router, JoinStrategy::Queued)
                .unwrap();
        assert_eq!(coordinator.strategy(), JoinStrategy::Queued);
    }

    #[tokio::test]
    async fn option_like_tag_is_rejected_before_editing() {
        let (store, coordinator) = coordinator().await;
        let err = coordinator.create_snapshot(task("--delete")).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidRef(_)));
        assert_eq!(store.commit_log(&id()).await.len(), 1);
    }
}
