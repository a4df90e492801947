//! Guarded read-modify-write of a single tracked document.
//!
//! Both editors read the committed (HEAD) version, decide whether anything
//! changes, confirm the working copy still matches HEAD byte for byte and
//! only then write and commit. A working copy that drifted from HEAD is a
//! [`TaskError::PreconditionConflict`] and nothing is written.

/// The `CHANGES` changelog.
pub mod changes;
/// The `dataset_description.json` document.
pub mod description;

use tracing::{debug, info};

use crate::error::{Result, TaskError};
use crate::store::{CommitScope, Dataset};
use crate::types::{CommitAuthor, CommitId};

pub use changes::{ChangesEntry, ChangesFile, update_changes};
pub use description::{DescriptionFile, update_description};

/// A document the editors know how to decode, patch and encode.
pub trait EditableDocument {
    /// Path of the document relative to the dataset root.
    const PATH: &'static str;

    /// Decoded form of the file.
    type Document: Send;
    /// Requested change.
    type Edit: Send + Sync;

    /// Decodes the HEAD bytes; `None` when the file is not committed.
    fn decode(head: Option<&[u8]>) -> Result<Self::Document>;

    /// Reduces `edit` to what would actually change `head`. `None` means
    /// the edit is a no-op.
    fn normalize(head: &Self::Document, edit: Self::Edit) -> Option<Self::Edit>;

    /// Applies a normalized edit.
    fn apply(head: Self::Document, edit: &Self::Edit) -> Self::Document;

    /// Bytes written to the working tree.
    fn encode(document: &Self::Document) -> Result<Vec<u8>>;

    /// Message of the commit recording `edit`.
    fn commit_message(edit: &Self::Edit) -> String;
}

/// Outcome of [`edit_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct Edited<D> {
    /// Document as committed after the edit.
    pub document: D,
    /// Commit created for the edit; `None` when the edit was a no-op.
    pub commit: Option<CommitId>,
}

/// Runs the guarded read-modify-write for `E` on `dataset`.
pub async fn edit_document<E>(
    dataset: &Dataset,
    edit: E::Edit,
    author: CommitAuthor,
) -> Result<Edited<E::Document>>
where
    E: EditableDocument,
{
    let head_bytes = dataset.repo.read_head_file(E::PATH).await?;
    let head = E::decode(head_bytes.as_deref())?;

    let Some(edit) = E::normalize(&head, edit) else {
        debug!(dataset = %dataset.id, path = E::PATH, "edit is a no-op");
        return Ok(Edited {
            document: head,
            commit: None,
        });
    };

    let updated = E::apply(head, &edit);
    let encoded = E::encode(&updated)?;

    let working_bytes = dataset.repo.read_working_file(E::PATH).await?;
    if working_bytes != head_bytes {
        return Err(TaskError::PreconditionConflict(format!(
            "unexpected {} contents: working copy differs from HEAD",
            E::PATH
        )));
    }

    let mut scope = CommitScope::begin(dataset, author, E::commit_message(&edit));
    let staged = scope.write(E::PATH, &encoded).await;
    let ((), commit) = scope.finish(staged).await?;
    info!(dataset = %dataset.id, path = E::PATH, %commit, "document updated");

    Ok(Edited {
        document: updated,
        commit: Some(commit),
    })
}
