//! In-process broker: one FIFO per named queue, drained by the worker pools
//! spawned in [`super::runtime::WorkerRuntime`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::types::TaskId;

use super::broker::{TaskBroker, TaskHandle};
use super::config::QueueConcurrency;
use super::job::{TaskPayload, TaskState};
use super::queue::{QueueName, QueueRouter};

/// A task sitting in (or just taken from) a queue.
pub struct QueuedTask {
    /// Id the caller's handle tracks.
    pub task_id: TaskId,
    /// Queue the task was taken from.
    pub queue: QueueName,
    /// Arguments for the handler.
    pub payload: TaskPayload,
    state: watch::Sender<TaskState>,
}

impl QueuedTask {
    /// Publishes the terminal state to every handle watching this task.
    pub fn finish(self, outcome: Result<Value>) {
        let state = match outcome {
            Ok(output) => TaskState::Succeeded { output },
            Err(err) => TaskState::Failed {
                error: err.to_string(),
            },
        };
        // send_replace stores the value even when no handle is listening.
        self.state.send_replace(state);
    }
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("task_id", &self.task_id)
            .field("queue", &self.queue)
            .field("kind", &self.payload.kind())
            .field("dataset", &self.payload.dataset())
            .finish()
    }
}

struct QueueChannel {
    concurrency: usize,
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
}

impl QueueChannel {
    fn new(concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            concurrency: concurrency.max(1),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// State of one task as tracked by the broker for status lookups.
struct TrackedTask {
    state: watch::Receiver<TaskState>,
    /// First prune pass that saw the task finished.
    finished_at: Option<Instant>,
}

impl TrackedTask {
    fn new(state: watch::Receiver<TaskState>) -> Self {
        Self {
            state,
            finished_at: None,
        }
    }

    /// Terminal, or abandoned by a worker that went away.
    fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal() || self.state.has_changed().is_err()
    }
}

/// Broker holding every queue and the state of tasks still tracked by id.
pub struct InMemoryBroker {
    queues: BTreeMap<QueueName, QueueChannel>,
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryBroker");
        debug.field(
            "queues",
            &self
                .queues
                .iter()
                .map(|(name, channel)| (name.as_str(), channel.concurrency))
                .collect::<Vec<_>>(),
        );
        match self.tasks.try_lock() {
            Ok(tasks) => {
                debug.field("tracked_tasks", &tasks.len());
            }
            Err(_) => {
                debug.field("tracked_tasks", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryBroker {
    /// Declares `queues`, each with its consumer count.
    pub fn new<I>(queues: I) -> Self
    where
        I: IntoIterator<Item = (QueueName, usize)>,
    {
        Self {
            queues: queues
                .into_iter()
                .map(|(name, concurrency)| (name, QueueChannel::new(concurrency)))
                .collect(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Declares every dataset partition, its single-consumer editor lane and
    /// the publish queue.
    pub fn for_router(router: &QueueRouter, concurrency: QueueConcurrency) -> Self {
        let mut queues: Vec<(QueueName, usize)> = router
            .dataset_queues()
            .into_iter()
            .map(|queue| (queue, concurrency.dataset))
            .collect();
        queues.extend(router.editor_queues().into_iter().map(|queue| (queue, 1)));
        queues.push((router.publish_queue(), concurrency.publish));
        Self::new(queues)
    }

    /// Declared queues and their consumer counts.
    pub fn queues(&self) -> Vec<(QueueName, usize)> {
        self.queues
            .iter()
            .map(|(name, channel)| (name.clone(), channel.concurrency))
            .collect()
    }

    /// Takes the next task from `queue`, waiting until one arrives.
    ///
    /// Returns `None` for undeclared queues.
    pub async fn next_task(&self, queue: &QueueName) -> Option<QueuedTask> {
        let channel = self.queues.get(queue)?;
        let mut rx = channel.rx.lock().await;
        rx.recv().await
    }

    /// Drops tracking for tasks that finished at least `retention` ago.
    ///
    /// The finish time is the first pass that observed the terminal state, so
    /// a task stays queryable for between `retention` and `retention` plus
    /// the pruning interval.
    pub async fn prune_finished(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, task| {
            if !task.is_finished() {
                return true;
            }
            let finished_at = *task.finished_at.get_or_insert(now);
            now.duration_since(finished_at) < retention
        });
        let pruned = before - tasks.len();
        if pruned > 0 {
            debug!(pruned, remaining = tasks.len(), "pruned finished tasks");
        }
        pruned
    }

    /// Number of tasks whose state is still queryable.
    pub async fn tracked_tasks(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn enqueue(&self, queue: &QueueName, payload: TaskPayload) -> Result<TaskHandle> {
        let channel = self
            .queues
            .get(queue)
            .ok_or_else(|| TaskError::Internal(format!("unknown queue {queue}")))?;

        let task_id = TaskId::new();
        let kind = payload.kind();
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        self.tasks
            .lock()
            .await
            .insert(task_id, TrackedTask::new(state_rx.clone()));

        let queued = QueuedTask {
            task_id,
            queue: queue.clone(),
            payload,
            state: state_tx,
        };
        if channel.tx.send(queued).is_err() {
            warn!(%queue, %task_id, "queue receiver closed; task dropped");
            return Err(TaskError::Internal(format!("queue {queue} is closed")));
        }
        debug!(%queue, %task_id, %kind, "task enqueued");

        Ok(TaskHandle::new(task_id, kind, queue.clone(), state_rx))
    }

    fn concurrency(&self, queue: &QueueName) -> Option<usize> {
        self.queues.get(queue).map(|channel| channel.concurrency)
    }

    async fn state(&self, task_id: TaskId) -> Option<TaskState> {
        let tasks = self.tasks.lock().await;
        tasks.get(&task_id).map(|task| task.state.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::job::{DeleteDatasetTask, TaskKind};
    use crate::types::DatasetId;

    fn delete_payload(id: &str) -> TaskPayload {
        TaskPayload::DeleteDataset(DeleteDatasetTask {
            dataset: DatasetId::new(id).unwrap(),
        })
    }

    #[tokio::test]
    async fn enqueue_is_fifo_per_queue() {
        let queue = QueueName::new("dataset-worker-0");
        let broker = InMemoryBroker::new([(queue.clone(), 1)]);

        let first = broker.enqueue(&queue, delete_payload("a")).await.unwrap();
        let second = broker.enqueue(&queue, delete_payload("b")).await.unwrap();

        let taken = broker.next_task(&queue).await.unwrap();
        assert_eq!(taken.task_id, first.task_id);
        let taken_second = broker.next_task(&queue).await.unwrap();
        assert_eq!(taken_second.task_id, second.task_id);
    }

    #[tokio::test]
    async fn handle_observes_terminal_state() {
        let queue = QueueName::new("publish");
        let broker = InMemoryBroker::new([(queue.clone(), 2)]);
        let mut handle = broker.enqueue(&queue, delete_payload("a")).await.unwrap();
        assert_eq!(handle.state(), TaskState::Pending);
        assert_eq!(handle.kind, TaskKind::DeleteDataset);

        let task = broker.next_task(&queue).await.unwrap();
        task.finish(Err(TaskError::Store("boom".into())));

        let state = handle.wait().await;
        assert!(state.is_failed());
        assert!(handle.failed());
        assert!(broker.state(handle.task_id).await.unwrap().is_failed());
    }

    #[tokio::test]
    async fn dropped_task_counts_as_failure() {
        let queue = QueueName::new("publish");
        let broker = InMemoryBroker::new([(queue.clone(), 1)]);
        let mut handle = broker.enqueue(&queue, delete_payload("a")).await.unwrap();

        // Worker crash: the task (and its state sender) goes away unreported.
        let task = broker.next_task(&queue).await.unwrap();
        drop(task);

        assert!(handle.wait().await.is_failed());
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let broker = InMemoryBroker::new([(QueueName::new("publish"), 1)]);
        let err = broker
            .enqueue(&QueueName::new("nowhere"), delete_payload("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Internal(_)));
        assert_eq!(broker.concurrency(&QueueName::new("publish")), Some(1));
        assert_eq!(broker.concurrency(&QueueName::new("nowhere")), None);
    }

    #[tokio::test]
    async fn prune_drops_only_finished_tasks() {
        let queue = QueueName::new("publish");
        let broker = InMemoryBroker::new([(queue.clone(), 1)]);
        let done = broker.enqueue(&queue, delete_payload("a")).await.unwrap();
        let pending = broker.enqueue(&queue, delete_payload("b")).await.unwrap();
        broker
            .next_task(&queue)
            .await
            .unwrap()
            .finish(Ok(Value::Null));

        assert_eq!(broker.prune_finished(Duration::ZERO).await, 1);
        assert!(broker.state(done.task_id).await.is_none());
        assert_eq!(broker.state(pending.task_id).await, Some(TaskState::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_tasks_stay_queryable_for_the_retention_window() {
        let queue = QueueName::new("publish");
        let broker = InMemoryBroker::new([(queue.clone(), 1)]);
        let done = broker.enqueue(&queue, delete_payload("a")).await.unwrap();
        broker
            .next_task(&queue)
            .await
            .unwrap()
            .finish(Ok(Value::Null));

        let retention = Duration::from_secs(60);
        assert_eq!(broker.prune_finished(retention).await, 0);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(broker.prune_finished(retention).await, 0);
        assert!(broker.state(done.task_id).await.unwrap().is_terminal());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(broker.prune_finished(retention).await, 1);
        assert_eq!(broker.tracked_tasks().await, 0);
    }

    #[tokio::test]
    async fn abandoned_tasks_are_pruned() {
        let queue = QueueName::new("publish");
        let broker = InMemoryBroker::new([(queue.clone(), 1)]);
        broker.enqueue(&queue, delete_payload("a")).await.unwrap();
        drop(broker.next_task(&queue).await.unwrap());

        assert_eq!(broker.prune_finished(Duration::ZERO).await, 1);
    }

    #[test]
    fn router_layout_declares_editor_lanes() {
        let router = QueueRouter::new(2).unwrap();
        let broker = InMemoryBroker::for_router(
            &router,
            QueueConcurrency {
                dataset: 1,
                publish: 3,
            },
        );
        assert_eq!(broker.queues().len(), 5);
        for queue in router.editor_queues() {
            assert_eq!(broker.concurrency(&queue), Some(1));
        }
        assert_eq!(broker.concurrency(&router.publish_queue()), Some(3));
    }
}
