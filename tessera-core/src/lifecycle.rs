//! Whole-dataset tasks: creation, deletion, committing uploaded files and
//! the file-level helpers around them.

use tracing::{info, instrument};

use crate::error::{Result, TaskError};
use crate::store::{CommitScope, DatasetStore, RepoFile, validate_ref_name};
use crate::types::{CommitAuthor, CommitId, DatasetId};

/// Patterns kept in plain git rather than the annex.
pub const NO_ANNEX_PATTERNS: [&str; 7] = [
    "*.tsv",
    "*.json",
    "*.bvec",
    "*.bval",
    "README",
    "CHANGES",
    ".bidsignore",
];

/// Attributes file written on creation.
pub const GITATTRIBUTES_PATH: &str = ".gitattributes";

/// Attribute lines keeping small metadata files out of the annex.
pub fn no_annex_attributes() -> String {
    NO_ANNEX_PATTERNS
        .iter()
        .map(|pattern| format!("{pattern} annex.largefiles=nothing\n"))
        .collect()
}

/// Initializes a new dataset with the annex exclusion rules committed.
#[instrument(skip_all, fields(dataset = %dataset), err)]
pub async fn create_dataset(
    store: &dyn DatasetStore,
    dataset: &DatasetId,
    author: CommitAuthor,
) -> Result<CommitId> {
    let dataset = store.get_dataset(dataset);
    dataset.repo.create().await?;

    let mut scope = CommitScope::begin(&dataset, author, "Initialize dataset");
    let staged = scope
        .write(GITATTRIBUTES_PATH, no_annex_attributes().as_bytes())
        .await;
    let ((), commit) = scope.finish(staged).await?;
    info!(%commit, path = %dataset.path.display(), "dataset created");
    Ok(commit)
}

/// Removes the dataset and every snapshot it holds.
#[instrument(skip_all, fields(dataset = %dataset), err)]
pub async fn delete_dataset(store: &dyn DatasetStore, dataset: &DatasetId) -> Result<()> {
    let dataset = store.get_dataset(dataset);
    dataset.repo.remove().await?;
    info!("dataset deleted");
    Ok(())
}

/// Commits files already present in the working tree.
#[instrument(skip_all, fields(dataset = %dataset, files = files.len()), err)]
pub async fn commit_files(
    store: &dyn DatasetStore,
    dataset: &DatasetId,
    files: &[String],
    author: CommitAuthor,
) -> Result<CommitId> {
    if files.is_empty() {
        return Err(TaskError::Store("no files to commit".into()));
    }
    let dataset = store.get_dataset(dataset);
    let mut scope = CommitScope::begin(&dataset, author, format!("Add {} file(s)", files.len()));
    let mut staged = Ok(());
    for file in files {
        staged = scope.add(file).await;
        if staged.is_err() {
            break;
        }
    }
    let ((), commit) = scope.finish(staged).await?;
    Ok(commit)
}

/// Unlocks annexed files for in-place editing. Stops at the first path that
/// cannot be unlocked; earlier paths stay unlocked.
#[instrument(skip_all, fields(dataset = %dataset, files = files.len()), err)]
pub async fn unlock_files(
    store: &dyn DatasetStore,
    dataset: &DatasetId,
    files: &[String],
) -> Result<()> {
    let dataset = store.get_dataset(dataset);
    for file in files {
        dataset.repo.unlock(file).await?;
    }
    Ok(())
}

/// Files of `branch`, or of HEAD when no branch is given.
#[instrument(skip_all, fields(dataset = %dataset, branch = branch.unwrap_or("HEAD")), err)]
pub async fn get_files(
    store: &dyn DatasetStore,
    dataset: &DatasetId,
    branch: Option<&str>,
) -> Result<Vec<RepoFile>> {
    let treeish = branch.unwrap_or("HEAD");
    validate_ref_name(treeish)?;
    store.get_dataset(dataset).repo.list_files(treeish).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn id() -> DatasetId {
        DatasetId::new("ds000001").unwrap()
    }

    #[test]
    fn attributes_cover_every_pattern() {
        let attributes = no_annex_attributes();
        assert_eq!(attributes.lines().count(), NO_ANNEX_PATTERNS.len());
        assert!(attributes.contains("*.json annex.largefiles=nothing\n"));
        assert!(attributes.contains(".bidsignore annex.largefiles=nothing\n"));
    }

    #[tokio::test]
    async fn create_commits_attributes_and_rejects_duplicates() {
        let store = InMemoryStore::new();
        let commit = create_dataset(&store, &id(), CommitAuthor::new("Ada", "ada@example.org"))
            .await
            .unwrap();

        assert_eq!(store.get_dataset(&id()).repo.head().await.unwrap(), commit);
        assert_eq!(
            store.file_at(&id(), "HEAD", GITATTRIBUTES_PATH).await,
            Some(no_annex_attributes().into_bytes())
        );
        let err = create_dataset(&store, &id(), CommitAuthor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));
    }

    #[tokio::test]
    async fn commit_files_binds_author_and_rolls_back_bad_paths() {
        let store = InMemoryStore::new();
        create_dataset(&store, &id(), CommitAuthor::default()).await.unwrap();
        let repo = store.get_dataset(&id()).repo;
        repo.write_working_file("participants.tsv", b"participant_id\n")
            .await
            .unwrap();

        let commit = commit_files(
            &store,
            &id(),
            &["participants.tsv".to_string()],
            CommitAuthor::new("Ada", "ada@example.org"),
        )
        .await
        .unwrap();
        let log = store.commit_log(&id()).await;
        assert_eq!(log.last().unwrap().id, commit);
        assert_eq!(log.last().unwrap().author.name.as_deref(), Some("Ada"));

        repo.write_working_file("README", b"draft").await.unwrap();
        let err = commit_files(
            &store,
            &id(),
            &["README".to_string(), "missing.nii.gz".to_string()],
            CommitAuthor::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));
        assert_eq!(store.commit_log(&id()).await.len(), 2);
        assert_eq!(repo.read_working_file("README").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_dataset() {
        let store = InMemoryStore::new();
        create_dataset(&store, &id(), CommitAuthor::default()).await.unwrap();
        delete_dataset(&store, &id()).await.unwrap();
        assert!(!store.get_dataset(&id()).repo.exists().await.unwrap());
        assert!(delete_dataset(&store, &id()).await.is_err());
    }

    #[tokio::test]
    async fn files_are_listed_at_head_or_branch() {
        let store = InMemoryStore::new();
        create_dataset(&store, &id(), CommitAuthor::default()).await.unwrap();
        let repo = store.get_dataset(&id()).repo;
        repo.tag("1.0.0").await.unwrap();
        repo.write_working_file("README", b"hello").await.unwrap();
        commit_files(&store, &id(), &["README".to_string()], CommitAuthor::default())
            .await
            .unwrap();

        let head = get_files(&store, &id(), None).await.unwrap();
        let names: Vec<&str> = head.iter().map(|file| file.filename.as_str()).collect();
        assert_eq!(names, vec![GITATTRIBUTES_PATH, "README"]);
        assert_eq!(get_files(&store, &id(), Some("1.0.0")).await.unwrap().len(), 1);
        assert!(matches!(
            get_files(&store, &id(), Some("--all")).await,
            Err(TaskError::InvalidRef(_))
        ));
    }

    #[tokio::test]
    async fn unlock_stops_at_first_missing_file() {
        let store = InMemoryStore::new();
        store
            .seed(&id(), [("sub-01/anat.nii.gz", "a"), ("sub-02/anat.nii.gz", "b")])
            .await
            .unwrap();

        unlock_files(&store, &id(), &["sub-01/anat.nii.gz".to_string()])
            .await
            .unwrap();
        let err = unlock_files(
            &store,
            &id(),
            &["missing.nii.gz".to_string(), "sub-02/anat.nii.gz".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));
        assert_eq!(store.unlocked(&id()).await, vec!["sub-01/anat.nii.gz"]);
    }
}
