use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

use super::queue::QueueRouter;

/// Global knobs that shape the worker pools.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of serialized dataset queues (`dataset-worker-{n}`).
    pub partitions: u32,
    /// Consumers per queue.
    pub concurrency: QueueConcurrency,
    /// How the snapshot coordinator runs its two editor sub-tasks.
    pub join_strategy: JoinStrategy,
    /// Seconds a finished task stays queryable by id.
    pub task_retention_secs: u64,
}

/// Default for [`OrchestratorConfig::task_retention_secs`].
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 600;

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            concurrency: QueueConcurrency::default(),
            join_strategy: JoinStrategy::default(),
            task_retention_secs: DEFAULT_TASK_RETENTION_SECS,
        }
    }
}

impl OrchestratorConfig {
    /// Router over `partitions` dataset queues.
    pub fn router(&self) -> Result<QueueRouter> {
        QueueRouter::new(self.partitions)
    }

    /// [`Self::task_retention_secs`] as a [`Duration`].
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    /// Rejects combinations that cannot make progress.
    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(TaskError::ConfigurationMissing(
                "partitions must be at least 1".into(),
            ));
        }
        if self.concurrency.dataset == 0 || self.concurrency.publish == 0 {
            return Err(TaskError::ConfigurationMissing(
                "queue concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Consumers spawned per queue.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueueConcurrency {
    /// Consumers per dataset queue. One keeps dataset mutation serialized.
    pub dataset: usize,
    /// Consumers on the shared publish queue.
    pub publish: usize,
}

impl Default for QueueConcurrency {
    fn default() -> Self {
        Self {
            dataset: 1,
            publish: 4,
        }
    }
}

/// Execution strategy for the editor sub-tasks joined by snapshot creation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Run the editors as direct calls inside the coordinator's own task.
    #[default]
    InProcess,
    /// Enqueue the editors on the partition's editor lane and block on both
    /// handles. The coordinator keeps its dataset consumer while waiting.
    Queued,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::InProcess => write!(f, "in_process"),
            JoinStrategy::Queued => write!(f, "queued"),
        }
    }
}

impl FromStr for JoinStrategy {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_process" | "inprocess" | "in-process" => Ok(JoinStrategy::InProcess),
            "queued" | "queue" => Ok(JoinStrategy::Queued),
            other => Err(TaskError::ConfigurationMissing(format!(
                "unknown join strategy {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn queued_join_works_with_a_single_dataset_consumer() {
        let config = OrchestratorConfig {
            join_strategy: JoinStrategy::Queued,
            ..OrchestratorConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.task_retention(), Duration::from_secs(600));
    }

    #[test]
    fn zero_consumers_are_rejected() {
        let config = OrchestratorConfig {
            concurrency: QueueConcurrency {
                dataset: 0,
                publish: 1,
            },
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TaskError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn join_strategy_parses_common_spellings() {
        assert_eq!("queued".parse::<JoinStrategy>().unwrap(), JoinStrategy::Queued);
        assert_eq!(
            "In-Process".parse::<JoinStrategy>().unwrap(),
            JoinStrategy::InProcess
        );
        assert!("sometimes".parse::<JoinStrategy>().is_err());
    }
}
