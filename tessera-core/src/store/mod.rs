//! Versioned dataset store contract.
//!
//! The orchestration layer never touches git or the object store directly;
//! it goes through [`VersionedRepo`]. Two adapters ship with the crate:
//! [`memory::InMemoryStore`] and [`annex::AnnexStore`].

pub mod annex;
/// Commit scopes that reset the tree unless committed.
pub mod commit;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};
use crate::types::{CommitAuthor, CommitId, DatasetId};

pub use annex::AnnexStore;
pub use commit::CommitScope;
pub use memory::InMemoryStore;

/// Published file path -> storage version ids produced by one export.
pub type VersionRecord = BTreeMap<String, Vec<String>>;

/// An immutable snapshot name bound to a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Commit the tag points at.
    pub commit: CommitId,
}

/// One file of a tree listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    /// Path relative to the dataset root.
    pub filename: String,
    /// Content size in bytes; for annexed files the size of the annexed
    /// content, not of the pointer.
    pub size: u64,
    /// Annex key when the content lives in the annex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl RepoFile {
    /// True when the content lives in the annex.
    pub fn is_annexed(&self) -> bool {
        self.key.is_some()
    }
}

/// Rejects names git would parse as options or refuse as a ref, following
/// the `git check-ref-format` rules.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "@"
        || name.starts_with('-')
        || name.starts_with('.')
        || name.ends_with('.')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("@{")
        || name.contains("//")
        || name.chars().any(|c| {
            c.is_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\')
        });
    if invalid {
        return Err(TaskError::InvalidRef(name.to_string()));
    }
    Ok(())
}

/// A configured remote of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sibling {
    /// Remote name.
    pub name: String,
    /// Fetch URL, if the remote has one.
    #[serde(default)]
    pub url: Option<String>,
}

impl Sibling {
    /// Sibling without a URL.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }
}

/// Returns true when `siblings` already contains a remote called `name`.
pub fn has_sibling(siblings: &[Sibling], name: &str) -> bool {
    siblings.iter().any(|sibling| sibling.name == name)
}

/// Operations on a single dataset repository.
#[async_trait]
pub trait VersionedRepo: Send + Sync {
    /// True if the repository has been initialized.
    async fn exists(&self) -> Result<bool>;

    /// Initializes an empty repository. Fails if one already exists.
    async fn create(&self) -> Result<()>;

    /// Deletes the repository and its working tree.
    async fn remove(&self) -> Result<()>;

    /// Commit checked out at HEAD.
    async fn head(&self) -> Result<CommitId>;

    /// Tags in creation order.
    async fn tags(&self) -> Result<Vec<Tag>>;

    /// File contents as committed at HEAD; `None` if absent there.
    async fn read_head_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// File contents in the working tree; `None` if absent there.
    async fn read_working_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrites a working-tree file, creating parent directories.
    async fn write_working_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Stages a working-tree path for the next commit.
    async fn add(&self, path: &str) -> Result<()>;

    /// Replaces an annexed file's pointer with its content so it can be
    /// edited in place.
    async fn unlock(&self, path: &str) -> Result<()>;

    /// Files of `treeish` (a branch, tag or `HEAD`), sorted by path.
    async fn list_files(&self, treeish: &str) -> Result<Vec<RepoFile>>;

    /// Commits the staged paths.
    async fn commit(&self, author: &CommitAuthor, message: &str) -> Result<CommitId>;

    /// Discards staged and unstaged changes, restoring HEAD.
    async fn reset(&self) -> Result<()>;

    /// Tags HEAD. Fails if the tag exists.
    async fn tag(&self, name: &str) -> Result<CommitId>;

    /// Configured remotes.
    async fn siblings(&self) -> Result<Vec<Sibling>>;

    /// Wires a versioned object-store special remote. The bucket must
    /// already exist.
    async fn init_s3_remote(&self, name: &str, bucket: &str, public: bool) -> Result<()>;

    /// Adds a plain git remote.
    async fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Exports `treeish` to an object-store remote and returns the version
    /// ids the export produced in `bucket`.
    async fn export_tree(&self, remote: &str, bucket: &str, treeish: &str)
    -> Result<VersionRecord>;

    /// Pushes `refspec` to a plain git remote.
    async fn push(&self, remote: &str, refspec: &str) -> Result<()>;
}

/// A dataset opened for the duration of one task.
#[derive(Clone)]
pub struct Dataset {
    /// Dataset id.
    pub id: DatasetId,
    /// Root of the working tree.
    pub path: PathBuf,
    /// Repository handle.
    pub repo: Arc<dyn VersionedRepo>,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Opens datasets by id.
pub trait DatasetStore: Send + Sync {
    /// Directory holding `id`.
    fn dataset_path(&self, id: &DatasetId) -> PathBuf;

    /// Opens `id`. Does not check that it exists.
    fn get_dataset(&self, id: &DatasetId) -> Dataset;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_names_that_git_would_misread_are_rejected() {
        for name in ["1.0.0", "v2", "HEAD", "master", "release/1.0"] {
            validate_ref_name(name).unwrap();
        }
        let rejected = [
            "", "-l", "--delete", ".hidden", "a..b", "tag.lock", "a b", "x~1", "y^", "@",
        ];
        for name in rejected {
            assert!(
                matches!(validate_ref_name(name), Err(TaskError::InvalidRef(_))),
                "{name:?} accepted"
            );
        }
    }
}
