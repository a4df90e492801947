use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::types::{CommitAuthor, CommitId, DatasetId};

use super::{Dataset, VersionedRepo};

/// Binds an author identity to a group of staged mutations.
///
/// A scope ends in exactly one of [`CommitScope::commit`],
/// [`CommitScope::abandon`] or [`CommitScope::finish`], and every failing
/// path resets the working tree before returning. A scope dropped unsettled
/// belongs to an interrupted task; the worker that ran it resets the dataset
/// before taking more work.
pub struct CommitScope {
    dataset: DatasetId,
    repo: Arc<dyn VersionedRepo>,
    author: CommitAuthor,
    message: String,
    staged: Vec<String>,
    settled: bool,
}

impl fmt::Debug for CommitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitScope")
            .field("dataset", &self.dataset)
            .field("author", &self.author)
            .field("message", &self.message)
            .field("staged", &self.staged)
            .field("settled", &self.settled)
            .finish()
    }
}

impl CommitScope {
    /// Opens a scope; nothing is staged yet.
    pub fn begin(dataset: &Dataset, author: CommitAuthor, message: impl Into<String>) -> Self {
        Self {
            dataset: dataset.id.clone(),
            repo: Arc::clone(&dataset.repo),
            author,
            message: message.into(),
            staged: Vec::new(),
            settled: false,
        }
    }

    /// Paths staged so far.
    pub fn staged(&self) -> &[String] {
        &self.staged
    }

    /// Stages an existing working-tree path.
    pub async fn add(&mut self, path: &str) -> Result<()> {
        self.repo.add(path).await?;
        self.staged.push(path.to_string());
        Ok(())
    }

    /// Overwrites a working-tree file and stages it.
    pub async fn write(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        self.repo.write_working_file(path, contents).await?;
        self.add(path).await
    }

    /// Commits the staged paths. A failed commit abandons them.
    pub async fn commit(mut self) -> Result<CommitId> {
        match self.repo.commit(&self.author, &self.message).await {
            Ok(commit) => {
                self.settled = true;
                debug!(
                    dataset = %self.dataset,
                    commit = %commit,
                    files = self.staged.len(),
                    "commit scope committed"
                );
                Ok(commit)
            }
            Err(err) => Err(self.abandon_with(err).await),
        }
    }

    /// Resets the working tree to HEAD, dropping the staged paths.
    pub async fn abandon(mut self) -> Result<()> {
        self.settled = true;
        debug!(dataset = %self.dataset, files = self.staged.len(), "commit scope abandoned");
        self.repo.reset().await
    }

    /// Commits when `staged` succeeded, abandons otherwise and hands the
    /// original error back.
    pub async fn finish<T>(self, staged: Result<T>) -> Result<(T, CommitId)> {
        match staged {
            Ok(value) => {
                let commit = self.commit().await?;
                Ok((value, commit))
            }
            Err(err) => Err(self.abandon_with(err).await),
        }
    }

    async fn abandon_with(self, err: TaskError) -> TaskError {
        let dataset = self.dataset.clone();
        if let Err(reset_err) = self.abandon().await {
            warn!(%dataset, error = %reset_err, "reset after failed mutation also failed");
        }
        err
    }
}

impl Drop for CommitScope {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            dataset = %self.dataset,
            files = self.staged.len(),
            "commit scope dropped without commit or reset"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::store::{DatasetStore, InMemoryStore};

    async fn fresh_dataset() -> (InMemoryStore, Dataset) {
        let store = InMemoryStore::new();
        let dataset = store.get_dataset(&DatasetId::new("ds000001").unwrap());
        dataset.repo.create().await.unwrap();
        (store, dataset)
    }

    #[tokio::test]
    async fn finish_commits_on_success_with_bound_author() {
        let (store, dataset) = fresh_dataset().await;
        let mut scope =
            CommitScope::begin(&dataset, CommitAuthor::new("Ada", "ada@example.org"), "add readme");
        let staged = scope.write("README", b"hello").await;
        let ((), commit) = scope.finish(staged).await.unwrap();

        assert_eq!(dataset.repo.head().await.unwrap(), commit);
        let log = store.commit_log(&dataset.id).await;
        let last = log.last().unwrap();
        assert_eq!(last.author.name.as_deref(), Some("Ada"));
        assert_eq!(last.message, "add readme");
    }

    #[tokio::test]
    async fn finish_abandons_on_error() {
        let (store, dataset) = fresh_dataset().await;
        let before = store.commit_log(&dataset.id).await.len();
        let mut scope = CommitScope::begin(&dataset, CommitAuthor::default(), "never");
        scope.write("README", b"draft").await.unwrap();

        let err = scope
            .finish::<()>(Err(TaskError::Store("validation failed".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));
        assert_eq!(store.commit_log(&dataset.id).await.len(), before);
        assert_eq!(dataset.repo.read_working_file("README").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_commit_resets_staged_changes() {
        let (store, dataset) = fresh_dataset().await;
        let mut scope = CommitScope::begin(&dataset, CommitAuthor::default(), "add readme");
        let staged = scope.write("README", b"draft").await;
        store.fail_next("commit", "index.lock exists").await;

        let err = scope.finish(staged).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(ref message) if message == "index.lock exists"));
        assert!(store.commit_log(&dataset.id).await.is_empty());
        assert_eq!(dataset.repo.read_working_file("README").await.unwrap(), None);

        // Nothing stays staged for the next scope.
        let mut retry = CommitScope::begin(&dataset, CommitAuthor::default(), "add readme");
        let staged = retry.write("README", b"final").await;
        let ((), commit) = retry.finish(staged).await.unwrap();
        let log = store.commit_log(&dataset.id).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, commit);
    }

    #[tokio::test]
    async fn dropped_scope_leaves_the_tree_to_its_worker() {
        let (_store, dataset) = fresh_dataset().await;
        {
            let mut scope = CommitScope::begin(&dataset, CommitAuthor::default(), "dropped");
            scope.write("README", b"draft").await.unwrap();
        }
        tokio::task::yield_now().await;
        assert_eq!(
            dataset.repo.read_working_file("README").await.unwrap(),
            Some(b"draft".to_vec())
        );
        dataset.repo.reset().await.unwrap();
        assert_eq!(dataset.repo.read_working_file("README").await.unwrap(), None);
    }
}
