//! Error type shared by every task handler.

use thiserror::Error;

use crate::orchestration::job::TaskKind;

/// Failure of a task or of a request to enqueue one.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Filesystem or subprocess failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a payload or a dataset file.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure talking to the code host or metadata service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Dataset id that cannot name a directory.
    #[error("Invalid dataset id: {0}")]
    InvalidDataset(String),

    /// Realm other than `PUBLIC` or `PRIVATE`.
    #[error("Invalid realm: {0}")]
    InvalidRealm(String),

    /// A tag or branch name git would misread or refuse.
    #[error("Invalid ref name: {0:?}")]
    InvalidRef(String),

    /// The requested snapshot tag already exists on the dataset.
    #[error("Tag \"{0}\" already exists, name conflict")]
    NameConflict(String),

    /// The working copy diverged from HEAD between read and write.
    #[error("Precondition conflict: {0}")]
    PreconditionConflict(String),

    /// A setting the task needs was never configured.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Non-success response from the metadata service.
    #[error("Upstream error (HTTP {status}): {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// A git or git-annex command failed.
    #[error("Store error: {0}")]
    Store(String),

    /// One or both snapshot editors failed; no tag was created.
    #[error("Snapshot aborted, failed sub-tasks: {}", format_kinds(.failed))]
    SnapshotAborted {
        /// Editor kinds that failed.
        failed: Vec<TaskKind>,
        /// Their rendered errors, in the same order.
        details: Vec<String>,
    },

    /// Broken invariant inside the worker.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_kinds(kinds: &[TaskKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TaskError>;
