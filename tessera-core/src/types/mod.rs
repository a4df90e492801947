/// Validated ids and commit authorship.
pub mod ids;

pub use ids::{CommitAuthor, CommitId, DatasetId, TaskId};
