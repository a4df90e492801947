//! Process-local versioned store. Backs the test suite and the server's
//! `--in-memory` mode.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Result, TaskError};
use crate::types::{CommitAuthor, CommitId, DatasetId};

use super::{
    Dataset, DatasetStore, RepoFile, Sibling, Tag, VersionRecord, VersionedRepo,
    validate_ref_name,
};

type Tree = BTreeMap<String, Vec<u8>>;

/// A commit as recorded by the in-memory store.
#[derive(Clone, Debug)]
pub struct CommitRecord {
    /// Content hash of the commit.
    pub id: CommitId,
    /// Previous commit; `None` for the first.
    pub parent: Option<CommitId>,
    /// Commit author.
    pub author: CommitAuthor,
    /// Commit message.
    pub message: String,
    /// Full tree at this commit.
    pub tree: Tree,
}

/// What a configured remote points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RemoteKind {
    /// Special remote exporting to `bucket`.
    ObjectStore {
        /// Bucket behind the remote.
        bucket: String,
        /// Whether exported objects are publicly readable.
        public: bool,
    },
    /// Plain git remote.
    Git,
}

#[derive(Clone, Debug)]
struct Remote {
    name: String,
    url: Option<String>,
    kind: RemoteKind,
}

/// One export or push, in the order they happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRecord {
    /// Remote name.
    pub remote: String,
    /// Tag or refspec that was sent.
    pub reference: String,
}

#[derive(Default)]
struct RepoState {
    commits: Vec<CommitRecord>,
    working: Tree,
    /// Path -> content captured at `add` time; `None` stages a deletion.
    staged: BTreeMap<String, Option<Vec<u8>>>,
    tags: Vec<Tag>,
    unlocked: BTreeSet<String>,
    remotes: Vec<Remote>,
    exports: Vec<PublishRecord>,
    pushes: Vec<PublishRecord>,
}

impl RepoState {
    fn head(&self) -> Option<&CommitRecord> {
        self.commits.last()
    }

    fn head_tree(&self) -> Tree {
        self.head().map(|commit| commit.tree.clone()).unwrap_or_default()
    }

    fn resolve(&self, treeish: &str) -> Option<&CommitRecord> {
        if treeish == "HEAD" {
            return self.head();
        }
        let target = self
            .tags
            .iter()
            .find(|tag| tag.name == treeish)
            .map(|tag| tag.commit.clone())
            .unwrap_or_else(|| CommitId(treeish.to_string()));
        self.commits.iter().find(|commit| commit.id == target)
    }

    fn remote(&self, name: &str) -> Result<&Remote> {
        self.remotes
            .iter()
            .find(|remote| remote.name == name)
            .ok_or_else(|| TaskError::Store(format!("remote {name} is not configured")))
    }
}

#[derive(Default)]
struct Shared {
    repos: HashMap<DatasetId, RepoState>,
    failures: HashMap<&'static str, String>,
}

/// In-memory [`DatasetStore`].
#[derive(Clone)]
pub struct InMemoryStore {
    root: PathBuf,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStore");
        debug.field("root", &self.root);
        match self.shared.try_lock() {
            Ok(shared) => {
                debug.field("datasets", &shared.repos.len());
            }
            Err(_) => {
                debug.field("datasets", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store rooted at `/datasets`.
    pub fn new() -> Self {
        Self::with_root("/datasets")
    }

    /// Empty store reporting paths under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Creates `id` with one commit containing `files`.
    pub async fn seed<I, P, C>(&self, id: &DatasetId, files: I) -> Result<CommitId>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let repo = self.repo(id);
        repo.create().await?;
        for (path, contents) in files {
            let path = path.into();
            repo.write_working_file(&path, &contents.into()).await?;
            repo.add(&path).await?;
        }
        repo.commit(&CommitAuthor::default(), "seed dataset").await
    }

    /// Makes the next call of `operation` (a [`VersionedRepo`] method name)
    /// fail with `message`.
    pub async fn fail_next(&self, operation: &'static str, message: impl Into<String>) {
        self.shared
            .lock()
            .await
            .failures
            .insert(operation, message.into());
    }

    /// Commits of `id`, oldest first.
    pub async fn commit_log(&self, id: &DatasetId) -> Vec<CommitRecord> {
        self.inspect(id, |state| state.commits.clone()).await
    }

    /// Object-store exports of `id`.
    pub async fn exports(&self, id: &DatasetId) -> Vec<PublishRecord> {
        self.inspect(id, |state| state.exports.clone()).await
    }

    /// Git pushes of `id`.
    pub async fn pushes(&self, id: &DatasetId) -> Vec<PublishRecord> {
        self.inspect(id, |state| state.pushes.clone()).await
    }

    /// Paths unlocked for in-place editing.
    pub async fn unlocked(&self, id: &DatasetId) -> Vec<String> {
        self.inspect(id, |state| state.unlocked.iter().cloned().collect())
            .await
    }

    /// Kind of remote `name`, if configured.
    pub async fn remote_kind(&self, id: &DatasetId, name: &str) -> Option<RemoteKind> {
        self.inspect(id, |state| {
            state
                .remotes
                .iter()
                .find(|remote| remote.name == name)
                .map(|remote| remote.kind.clone())
        })
        .await
    }

    /// File contents at `treeish` (a tag, commit id or `HEAD`).
    pub async fn file_at(&self, id: &DatasetId, treeish: &str, path: &str) -> Option<Vec<u8>> {
        self.inspect(id, |state| {
            state
                .resolve(treeish)
                .and_then(|commit| commit.tree.get(path).cloned())
        })
        .await
    }

    async fn inspect<T: Default>(&self, id: &DatasetId, f: impl FnOnce(&RepoState) -> T) -> T {
        let shared = self.shared.lock().await;
        shared.repos.get(id).map(f).unwrap_or_default()
    }

    fn repo(&self, id: &DatasetId) -> MemoryRepo {
        MemoryRepo {
            id: id.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl DatasetStore for InMemoryStore {
    fn dataset_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn get_dataset(&self, id: &DatasetId) -> Dataset {
        Dataset {
            id: id.clone(),
            path: self.dataset_path(id),
            repo: Arc::new(self.repo(id)),
        }
    }
}

struct MemoryRepo {
    id: DatasetId,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryRepo {
    async fn with_state<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut RepoState) -> Result<T>,
    ) -> Result<T> {
        let mut shared = self.shared.lock().await;
        if let Some(message) = shared.failures.remove(operation) {
            return Err(TaskError::Store(message));
        }
        let state = shared
            .repos
            .get_mut(&self.id)
            .ok_or_else(|| TaskError::Store(format!("dataset {} does not exist", self.id)))?;
        f(state)
    }
}

fn commit_hash(parent: Option<&CommitId>, message: &str, tree: &Tree) -> CommitId {
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.as_str().as_bytes());
    }
    hasher.update(message.as_bytes());
    for (path, contents) in tree {
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(contents);
    }
    CommitId(hex::encode(&hasher.finalize()[..20]))
}

fn version_id(bucket: &str, path: &str, contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(contents);
    hex::encode(&hasher.finalize()[..16])
}

#[async_trait]
impl VersionedRepo for MemoryRepo {
    async fn exists(&self) -> Result<bool> {
        Ok(self.shared.lock().await.repos.contains_key(&self.id))
    }

    async fn create(&self) -> Result<()> {
        let mut shared = self.shared.lock().await;
        if let Some(message) = shared.failures.remove("create") {
            return Err(TaskError::Store(message));
        }
        if shared.repos.contains_key(&self.id) {
            return Err(TaskError::Store(format!("dataset {} already exists", self.id)));
        }
        shared.repos.insert(self.id.clone(), RepoState::default());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let mut shared = self.shared.lock().await;
        if let Some(message) = shared.failures.remove("remove") {
            return Err(TaskError::Store(message));
        }
        shared
            .repos
            .remove(&self.id)
            .map(|_| ())
            .ok_or_else(|| TaskError::Store(format!("dataset {} does not exist", self.id)))
    }

    async fn head(&self) -> Result<CommitId> {
        self.with_state("head", |state| {
            state
                .head()
                .map(|commit| commit.id.clone())
                .ok_or_else(|| TaskError::Store("repository has no commits".into()))
        })
        .await
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        self.with_state("tags", |state| Ok(state.tags.clone())).await
    }

    async fn read_head_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.with_state("read_head_file", |state| {
            Ok(state.head().and_then(|commit| commit.tree.get(path).cloned()))
        })
        .await
    }

    async fn read_working_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.with_state("read_working_file", |state| Ok(state.working.get(path).cloned()))
            .await
    }

    async fn write_working_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.with_state("write_working_file", |state| {
            state.working.insert(path.to_string(), contents.to_vec());
            Ok(())
        })
        .await
    }

    async fn add(&self, path: &str) -> Result<()> {
        self.with_state("add", |state| {
            let current = state.working.get(path).cloned();
            if current.is_none() && !state.head_tree().contains_key(path) {
                return Err(TaskError::Store(format!("pathspec {path} did not match any files")));
            }
            state.staged.insert(path.to_string(), current);
            Ok(())
        })
        .await
    }

    async fn unlock(&self, path: &str) -> Result<()> {
        self.with_state("unlock", |state| {
            if !state.working.contains_key(path) {
                return Err(TaskError::Store(format!("{path} not found")));
            }
            state.unlocked.insert(path.to_string());
            Ok(())
        })
        .await
    }

    async fn list_files(&self, treeish: &str) -> Result<Vec<RepoFile>> {
        self.with_state("list_files", |state| {
            let commit = state
                .resolve(treeish)
                .ok_or_else(|| TaskError::Store(format!("unknown treeish {treeish}")))?;
            Ok(commit
                .tree
                .iter()
                .map(|(path, contents)| RepoFile {
                    filename: path.clone(),
                    size: contents.len() as u64,
                    key: None,
                })
                .collect())
        })
        .await
    }

    async fn commit(&self, author: &CommitAuthor, message: &str) -> Result<CommitId> {
        self.with_state("commit", |state| {
            let head_tree = state.head_tree();
            let mut tree = head_tree.clone();
            for (path, contents) in std::mem::take(&mut state.staged) {
                match contents {
                    Some(contents) => {
                        tree.insert(path, contents);
                    }
                    None => {
                        tree.remove(&path);
                    }
                }
            }
            if tree == head_tree && state.head().is_some() {
                return Err(TaskError::Store("nothing to commit, working tree clean".into()));
            }
            let parent = state.head().map(|commit| commit.id.clone());
            let id = commit_hash(parent.as_ref(), message, &tree);
            state.commits.push(CommitRecord {
                id: id.clone(),
                parent,
                author: author.clone(),
                message: message.to_string(),
                tree,
            });
            Ok(id)
        })
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.with_state("reset", |state| {
            state.staged.clear();
            state.working = state.head_tree();
            Ok(())
        })
        .await
    }

    async fn tag(&self, name: &str) -> Result<CommitId> {
        validate_ref_name(name)?;
        self.with_state("tag", |state| {
            if state.tags.iter().any(|tag| tag.name == name) {
                return Err(TaskError::Store(format!("tag '{name}' already exists")));
            }
            let commit = state
                .head()
                .map(|commit| commit.id.clone())
                .ok_or_else(|| TaskError::Store("cannot tag a repository without commits".into()))?;
            state.tags.push(Tag {
                name: name.to_string(),
                commit: commit.clone(),
            });
            Ok(commit)
        })
        .await
    }

    async fn siblings(&self) -> Result<Vec<Sibling>> {
        self.with_state("siblings", |state| {
            Ok(state
                .remotes
                .iter()
                .map(|remote| Sibling {
                    name: remote.name.clone(),
                    url: remote.url.clone(),
                })
                .collect())
        })
        .await
    }

    async fn init_s3_remote(&self, name: &str, bucket: &str, public: bool) -> Result<()> {
        self.with_state("init_s3_remote", |state| {
            if state.remotes.iter().any(|remote| remote.name == name) {
                return Err(TaskError::Store(format!("remote {name} already exists")));
            }
            state.remotes.push(Remote {
                name: name.to_string(),
                url: None,
                kind: RemoteKind::ObjectStore {
                    bucket: bucket.to_string(),
                    public,
                },
            });
            Ok(())
        })
        .await
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.with_state("add_remote", |state| {
            if state.remotes.iter().any(|remote| remote.name == name) {
                return Err(TaskError::Store(format!("remote {name} already exists")));
            }
            state.remotes.push(Remote {
                name: name.to_string(),
                url: Some(url.to_string()),
                kind: RemoteKind::Git,
            });
            Ok(())
        })
        .await
    }

    async fn export_tree(
        &self,
        remote: &str,
        bucket: &str,
        treeish: &str,
    ) -> Result<VersionRecord> {
        self.with_state("export_tree", |state| {
            if !matches!(state.remote(remote)?.kind, RemoteKind::ObjectStore { .. }) {
                return Err(TaskError::Store(format!("{remote} is not an export remote")));
            }
            let tree = state
                .resolve(treeish)
                .map(|commit| commit.tree.clone())
                .ok_or_else(|| TaskError::Store(format!("unknown treeish {treeish}")))?;
            let versions: VersionRecord = tree
                .iter()
                .filter(|(path, _)| !path.starts_with('.'))
                .map(|(path, contents)| (path.clone(), vec![version_id(bucket, path, contents)]))
                .collect();
            state.exports.push(PublishRecord {
                remote: remote.to_string(),
                reference: treeish.to_string(),
            });
            Ok(versions)
        })
        .await
    }

    async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.with_state("push", |state| {
            state.remote(remote)?;
            if state.resolve(refspec).is_none() {
                return Err(TaskError::Store(format!("src refspec {refspec} does not match any")));
            }
            state.pushes.push(PublishRecord {
                remote: remote.to_string(),
                reference: refspec.to_string(),
            });
            Ok(())
        })
        .await
    }
}
