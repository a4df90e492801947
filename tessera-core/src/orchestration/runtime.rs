use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{Result, TaskError};

use super::config::DEFAULT_TASK_RETENTION_SECS;
use super::memory::InMemoryBroker;
use super::queue::QueueName;
use super::registry::TaskRegistry;

/// Supervises the worker pools draining an [`InMemoryBroker`].
///
/// Each declared queue gets as many consumers as its configured concurrency.
/// Consumers share one receiver, so a queue with a single consumer runs its
/// tasks strictly one at a time in enqueue order. A background pass drops
/// finished tasks from the broker once their retention window has passed.
pub struct WorkerRuntime {
    broker: Arc<InMemoryBroker>,
    registry: Arc<TaskRegistry>,
    task_retention: Duration,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("WorkerRuntime")
            .field("broker", &self.broker)
            .field("registry", &self.registry)
            .field("worker_count", &worker_count)
            .field("task_retention", &self.task_retention)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl WorkerRuntime {
    /// Runtime with the default retention; nothing runs until [`Self::start`].
    pub fn new(broker: Arc<InMemoryBroker>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            broker,
            registry,
            task_retention: Duration::from_secs(DEFAULT_TASK_RETENTION_SECS),
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// How long a finished task stays queryable through the broker.
    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention = retention;
        self
    }

    /// Broker the workers drain.
    pub fn broker(&self) -> Arc<InMemoryBroker> {
        Arc::clone(&self.broker)
    }

    /// Token cancelled by [`Self::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawns the pools for every declared queue and the pruning pass.
    pub async fn start(&self) {
        for (queue, concurrency) in self.broker.queues() {
            self.spawn_worker_pool(queue, concurrency).await;
        }
        let broker = Arc::clone(&self.broker);
        let token = self.shutdown_token.clone();
        let retention = self.task_retention;
        self.worker_handles
            .lock()
            .await
            .push(tokio::spawn(prune_loop(broker, token, retention)));
    }

    async fn spawn_worker_pool(&self, queue: QueueName, concurrency: usize) {
        let mut handles = self.worker_handles.lock().await;
        for worker_index in 0..concurrency {
            let broker = Arc::clone(&self.broker);
            let registry = Arc::clone(&self.registry);
            let token = self.shutdown_token.clone();
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(broker, registry, token, queue, worker_index).await;
            }));
        }
        info!(%queue, concurrency, "worker pool started");
    }

    /// Cancels all workers and waits for them to exit. A task that is
    /// already running is interrupted at its next await point, its handler's
    /// abort hook runs, and the task is reported as failed.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<_> = self.worker_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await
                && err.is_panic()
            {
                error!(error = %err, "worker panicked during shutdown");
            }
        }
        info!("worker runtime stopped");
    }
}

async fn worker_loop(
    broker: Arc<InMemoryBroker>,
    registry: Arc<TaskRegistry>,
    token: CancellationToken,
    queue: QueueName,
    worker_index: usize,
) {
    debug!(%queue, worker_index, "worker ready");
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = broker.next_task(&queue) => next,
        };
        let Some(task) = next else {
            warn!(%queue, worker_index, "queue closed; worker exiting");
            break;
        };

        let kind = task.payload.kind();
        let span = info_span!(
            "task",
            task_id = %task.task_id,
            %kind,
            dataset = %task.payload.dataset(),
            %queue,
            worker_index
        );
        let run = {
            let registry = Arc::clone(&registry);
            let payload = task.payload.clone();
            tokio::spawn(async move { registry.dispatch(payload).await }.instrument(span.clone()))
        };
        let (outcome, cancelled) = run_to_completion(run, &token).await;
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                // The interrupted run is fully dropped; clean up before the
                // next task on this queue can start.
                registry.abort(&task.payload).instrument(span.clone()).await;
                Err(if cancelled {
                    TaskError::Internal("task cancelled by shutdown".into())
                } else {
                    TaskError::Internal("task panicked".into())
                })
            }
        };
        span.in_scope(|| match &outcome {
            Ok(_) => info!("task succeeded"),
            Err(err) => warn!(error = %err, "task failed"),
        });
        task.finish(outcome);
        if cancelled {
            break;
        }
    }
    debug!(%queue, worker_index, "worker stopped");
}

/// Awaits a spawned handler run. Returns `None` when the run was aborted by
/// cancellation or panicked, together with whether cancellation happened.
async fn run_to_completion(
    mut run: JoinHandle<Result<Value>>,
    token: &CancellationToken,
) -> (Option<Result<Value>>, bool) {
    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = token.cancelled() => {
            run.abort();
            return match run.await {
                Ok(outcome) => (Some(outcome), true),
                Err(_) => (None, true),
            };
        }
    };
    match joined {
        Ok(outcome) => (Some(outcome), false),
        Err(err) => {
            if err.is_panic() {
                error!(error = %err, "task handler panicked");
            }
            (None, false)
        }
    }
}

async fn prune_loop(broker: Arc<InMemoryBroker>, token: CancellationToken, retention: Duration) {
    let period = retention.clamp(Duration::from_secs(1), Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                broker.prune_finished(retention).await;
            }
        }
    }
}
