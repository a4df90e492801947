//! Task kinds and their wire payloads.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{CommitAuthor, DatasetId};

/// Every task the workers know how to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Initialise a repository with the default attributes.
    CreateDataset,
    /// Remove a dataset directory.
    DeleteDataset,
    /// Stage and commit working-tree paths.
    CommitFiles,
    /// Make annexed files writable in place.
    UnlockFiles,
    /// List the tree at a branch or HEAD.
    GetFiles,
    /// Merge fields into the dataset description.
    UpdateDescription,
    /// Prepend a changelog entry.
    UpdateChanges,
    /// Join both editors, then tag.
    CreateSnapshot,
    /// Resolve a realm and fan the tag out.
    PublishSnapshot,
    /// Export a tag to an object-store bucket.
    PublishS3,
    /// Push a tag to the code host.
    PublishGithub,
    /// Re-export every tag to the bucket of a realm.
    MigrateToBucket,
}

impl TaskKind {
    /// All kinds, in registration order.
    pub const ALL: [TaskKind; 12] = [
        TaskKind::CreateDataset,
        TaskKind::DeleteDataset,
        TaskKind::CommitFiles,
        TaskKind::UnlockFiles,
        TaskKind::GetFiles,
        TaskKind::UpdateDescription,
        TaskKind::UpdateChanges,
        TaskKind::CreateSnapshot,
        TaskKind::PublishSnapshot,
        TaskKind::PublishS3,
        TaskKind::PublishGithub,
        TaskKind::MigrateToBucket,
    ];
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::CreateDataset => write!(f, "create_dataset"),
            TaskKind::DeleteDataset => write!(f, "delete_dataset"),
            TaskKind::CommitFiles => write!(f, "commit_files"),
            TaskKind::UnlockFiles => write!(f, "unlock_files"),
            TaskKind::GetFiles => write!(f, "get_files"),
            TaskKind::UpdateDescription => write!(f, "update_description"),
            TaskKind::UpdateChanges => write!(f, "update_changes"),
            TaskKind::CreateSnapshot => write!(f, "create_snapshot"),
            TaskKind::PublishSnapshot => write!(f, "publish_snapshot"),
            TaskKind::PublishS3 => write!(f, "publish_s3"),
            TaskKind::PublishGithub => write!(f, "publish_github"),
            TaskKind::MigrateToBucket => write!(f, "migrate_to_bucket"),
        }
    }
}

/// Structured arguments per task kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    /// See [`TaskKind::CreateDataset`].
    CreateDataset(CreateDatasetTask),
    /// See [`TaskKind::DeleteDataset`].
    DeleteDataset(DeleteDatasetTask),
    /// See [`TaskKind::CommitFiles`].
    CommitFiles(CommitFilesTask),
    /// See [`TaskKind::UnlockFiles`].
    UnlockFiles(UnlockFilesTask),
    /// See [`TaskKind::GetFiles`].
    GetFiles(GetFilesTask),
    /// See [`TaskKind::UpdateDescription`].
    UpdateDescription(UpdateDescriptionTask),
    /// See [`TaskKind::UpdateChanges`].
    UpdateChanges(UpdateChangesTask),
    /// See [`TaskKind::CreateSnapshot`].
    CreateSnapshot(CreateSnapshotTask),
    /// See [`TaskKind::PublishSnapshot`].
    PublishSnapshot(PublishSnapshotTask),
    /// See [`TaskKind::PublishS3`].
    PublishS3(PublishS3Task),
    /// See [`TaskKind::PublishGithub`].
    PublishGithub(PublishGithubTask),
    /// See [`TaskKind::MigrateToBucket`].
    MigrateToBucket(MigrateToBucketTask),
}

impl TaskPayload {
    /// Kind tag matching the variant.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::CreateDataset(_) => TaskKind::CreateDataset,
            TaskPayload::DeleteDataset(_) => TaskKind::DeleteDataset,
            TaskPayload::CommitFiles(_) => TaskKind::CommitFiles,
            TaskPayload::UnlockFiles(_) => TaskKind::UnlockFiles,
            TaskPayload::GetFiles(_) => TaskKind::GetFiles,
            TaskPayload::UpdateDescription(_) => TaskKind::UpdateDescription,
            TaskPayload::UpdateChanges(_) => TaskKind::UpdateChanges,
            TaskPayload::CreateSnapshot(_) => TaskKind::CreateSnapshot,
            TaskPayload::PublishSnapshot(_) => TaskKind::PublishSnapshot,
            TaskPayload::PublishS3(_) => TaskKind::PublishS3,
            TaskPayload::PublishGithub(_) => TaskKind::PublishGithub,
            TaskPayload::MigrateToBucket(_) => TaskKind::MigrateToBucket,
        }
    }

    /// Dataset the task operates on; the router partitions by it.
    pub fn dataset(&self) -> &DatasetId {
        match self {
            TaskPayload::CreateDataset(task) => &task.dataset,
            TaskPayload::DeleteDataset(task) => &task.dataset,
            TaskPayload::CommitFiles(task) => &task.dataset,
            TaskPayload::UnlockFiles(task) => &task.dataset,
            TaskPayload::GetFiles(task) => &task.dataset,
            TaskPayload::UpdateDescription(task) => &task.dataset,
            TaskPayload::UpdateChanges(task) => &task.dataset,
            TaskPayload::CreateSnapshot(task) => &task.dataset,
            TaskPayload::PublishSnapshot(task) => &task.dataset,
            TaskPayload::PublishS3(task) => &task.dataset,
            TaskPayload::PublishGithub(task) => &task.dataset,
            TaskPayload::MigrateToBucket(task) => &task.dataset,
        }
    }
}

/// Creates a dataset repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateDatasetTask {
    /// Dataset to create.
    pub dataset: DatasetId,
    /// Author of the initial commit.
    #[serde(default)]
    pub author: CommitAuthor,
}

/// Deletes a dataset directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteDatasetTask {
    /// Dataset to delete.
    pub dataset: DatasetId,
}

/// Commits paths already present in the working tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitFilesTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Paths relative to the dataset root.
    pub files: Vec<String>,
    /// Commit author.
    #[serde(default)]
    pub author: CommitAuthor,
}

/// Unlocks annexed paths so they can be edited in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnlockFilesTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Paths relative to the dataset root.
    pub files: Vec<String>,
}

/// Lists the files of `branch`, or of HEAD when absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetFilesTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Branch, tag or commit to list.
    #[serde(default)]
    pub branch: Option<String>,
}

/// Fields merged into `dataset_description.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateDescriptionTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Top-level keys to overwrite.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Commit author.
    #[serde(default)]
    pub author: CommitAuthor,
}

/// Lines recorded under a new `CHANGES` entry for `tag`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateChangesTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Version heading of the new entry.
    pub tag: String,
    /// Entry lines, in order.
    #[serde(default)]
    pub changes: Vec<String>,
    /// Entry date; today (UTC) when absent.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Commit author.
    #[serde(default)]
    pub author: CommitAuthor,
}

/// Snapshot request: both editors, then an annotated tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSnapshotTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Tag to create; must be a valid ref name.
    pub tag: String,
    /// Passed to the description editor.
    #[serde(default)]
    pub description_fields: Map<String, Value>,
    /// Passed to the changelog editor.
    #[serde(default)]
    pub snapshot_changes: Vec<String>,
    /// Author of both edits.
    #[serde(default)]
    pub author: CommitAuthor,
}

impl CreateSnapshotTask {
    /// Description edit for this snapshot.
    pub fn description_task(&self) -> UpdateDescriptionTask {
        UpdateDescriptionTask {
            dataset: self.dataset.clone(),
            fields: self.description_fields.clone(),
            author: self.author.clone(),
        }
    }

    /// Changelog edit for this snapshot, dated today.
    pub fn changes_task(&self) -> UpdateChangesTask {
        UpdateChangesTask {
            dataset: self.dataset.clone(),
            tag: self.tag.clone(),
            changes: self.snapshot_changes.clone(),
            date: None,
            author: self.author.clone(),
        }
    }
}

/// Publish request. `realm` is validated when the job runs; `None` lets the
/// resolver choose from the dataset's existing siblings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishSnapshotTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Tag to publish.
    pub tag: String,
    /// `PUBLIC` or `PRIVATE`.
    #[serde(default)]
    pub realm: Option<String>,
    /// Forwarded to the metadata callback.
    #[serde(default)]
    pub cookies: Option<String>,
}

/// Bucket export of one tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishS3Task {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Tag to export.
    pub tag: String,
    /// Special remote to export through.
    pub s3_remote: String,
    /// Bucket behind `s3_remote`.
    pub s3_bucket: String,
    /// Forwarded to the metadata callback.
    #[serde(default)]
    pub cookies: Option<String>,
}

/// Code-host push of one tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishGithubTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Tag to push.
    pub tag: String,
    /// Remote name to push to.
    pub github_remote: String,
}

/// Re-exports every tag to the bucket of `realm`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrateToBucketTask {
    /// Target dataset.
    pub dataset: DatasetId,
    /// Destination realm; `PUBLIC` unless given.
    #[serde(default = "default_migration_realm")]
    pub realm: String,
    /// Forwarded to the metadata callback.
    #[serde(default)]
    pub cookies: Option<String>,
}

fn default_migration_realm() -> String {
    "PUBLIC".to_string()
}

/// Lifecycle of a task as observed through its handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Queued or running.
    Pending,
    /// Finished with the handler's output.
    Succeeded {
        /// Handler result.
        output: Value,
    },
    /// Finished with an error, a panic or a shutdown.
    Failed {
        /// Rendered error.
        error: String,
    },
}

impl TaskState {
    /// True once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }

    /// True for [`TaskState::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskState::Failed { .. })
    }
}
