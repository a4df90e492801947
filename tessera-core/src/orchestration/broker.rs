use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::types::TaskId;

use super::job::{TaskKind, TaskPayload, TaskState};
use super::queue::QueueName;

/// Caller-side view of an enqueued task.
#[derive(Debug)]
pub struct TaskHandle {
    /// Id assigned at enqueue time.
    pub task_id: TaskId,
    /// Kind of the enqueued payload.
    pub kind: TaskKind,
    /// Queue the task was routed to.
    pub queue: QueueName,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    /// Wraps the state channel of a freshly enqueued task.
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        queue: QueueName,
        state: watch::Receiver<TaskState>,
    ) -> Self {
        Self {
            task_id,
            kind,
            queue,
            state,
        }
    }

    /// Current state without waiting.
    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Suspends until the task reaches a terminal state.
    ///
    /// A task whose worker vanished without reporting is treated as failed.
    pub async fn wait(&mut self) -> TaskState {
        let observed = self
            .state
            .wait_for(TaskState::is_terminal)
            .await
            .map(|state| state.clone());
        match observed {
            Ok(state) => state,
            Err(_) => {
                let last = self.state.borrow().clone();
                if last.is_terminal() {
                    last
                } else {
                    TaskState::Failed {
                        error: format!("task {} abandoned before completion", self.task_id),
                    }
                }
            }
        }
    }

    /// True if the task has already failed.
    pub fn failed(&self) -> bool {
        self.state.borrow().is_failed()
    }
}

/// Queueing contract the coordinators are written against.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Fire-and-forget: enqueue and return immediately.
    async fn enqueue(&self, queue: &QueueName, payload: TaskPayload) -> Result<TaskHandle>;

    /// Enqueue-and-block: enqueue, then wait for a terminal state.
    async fn apply(&self, queue: &QueueName, payload: TaskPayload) -> Result<TaskHandle> {
        let mut handle = self.enqueue(queue, payload).await?;
        handle.wait().await;
        Ok(handle)
    }

    /// Number of consumers draining `queue`, if the queue is known.
    fn concurrency(&self, queue: &QueueName) -> Option<usize>;

    /// Last known state of a task enqueued through this broker.
    async fn state(&self, task_id: TaskId) -> Option<TaskState>;
}
