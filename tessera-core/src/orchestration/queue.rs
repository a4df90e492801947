use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TaskError};
use crate::types::DatasetId;

/// Name of the shared queue used for outbound publish jobs.
pub const PUBLISH_QUEUE: &str = "publish";

const DATASET_QUEUE_PREFIX: &str = "dataset-worker";
const EDITOR_QUEUE_PREFIX: &str = "dataset-editor";

/// Named broker queue.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// Wraps a raw queue name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as declared on the broker.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the shared publish queue.
    pub fn is_publish(&self) -> bool {
        self.0 == PUBLISH_QUEUE
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a registered task picks its queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum QueueSelector {
    /// The serialized queue owning the payload's dataset.
    Dataset,
    /// The shared publish queue.
    Publish,
}

/// Maps datasets onto a fixed set of serialized worker queues.
///
/// Every task that mutates a dataset's working tree goes through
/// [`QueueRouter::queue_for`]; with one consumer per queue this gives at most
/// one concurrent writer per dataset.
#[derive(Clone, Debug)]
pub struct QueueRouter {
    partitions: u32,
}

impl QueueRouter {
    /// Fails when `partitions` is zero.
    pub fn new(partitions: u32) -> Result<Self> {
        if partitions == 0 {
            return Err(TaskError::ConfigurationMissing(
                "at least one dataset worker partition is required".into(),
            ));
        }
        Ok(Self { partitions })
    }

    /// Number of dataset partitions.
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Serialized queue owning `dataset`. Stable across restarts.
    pub fn queue_for(&self, dataset: &DatasetId) -> QueueName {
        dataset_queue_name(self.partition_of(dataset))
    }

    /// Routes a raw identifier, rejecting ids that fail validation.
    pub fn queue_for_raw(&self, dataset: &str) -> Result<QueueName> {
        let dataset = DatasetId::new(dataset)?;
        Ok(self.queue_for(&dataset))
    }

    /// The shared publish queue.
    pub fn publish_queue(&self) -> QueueName {
        QueueName::new(PUBLISH_QUEUE)
    }

    /// Resolves a registered selector for `dataset`.
    pub fn select(&self, selector: QueueSelector, dataset: &DatasetId) -> QueueName {
        match selector {
            QueueSelector::Dataset => self.queue_for(dataset),
            QueueSelector::Publish => self.publish_queue(),
        }
    }

    /// All dataset queues this router can produce.
    pub fn dataset_queues(&self) -> Vec<QueueName> {
        (0..u64::from(self.partitions))
            .map(dataset_queue_name)
            .collect()
    }

    /// Editor lane paired with the dataset's queue.
    ///
    /// Snapshot coordinators never run here, so editors they wait on always
    /// find a free consumer.
    pub fn editor_queue_for(&self, dataset: &DatasetId) -> QueueName {
        let partition = self.partition_of(dataset);
        editor_queue_name(partition)
    }

    /// All editor lanes, one per partition.
    pub fn editor_queues(&self) -> Vec<QueueName> {
        (0..u64::from(self.partitions))
            .map(editor_queue_name)
            .collect()
    }

    fn partition_of(&self, dataset: &DatasetId) -> u64 {
        stable_hash(dataset.as_str()) % u64::from(self.partitions)
    }
}

fn dataset_queue_name(partition: u64) -> QueueName {
    QueueName::new(format!("{DATASET_QUEUE_PREFIX}-{partition}"))
}

fn editor_queue_name(partition: u64) -> QueueName {
    QueueName::new(format!("{EDITOR_QUEUE_PREFIX}-{partition}"))
}

fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
