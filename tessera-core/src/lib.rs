//! Task orchestration for versioned datasets.
//!
//! Mutations of a dataset run on that dataset's serialized queue. Snapshot
//! creation joins the description and changelog edits before tagging, and
//! publishing fans a tag out to object-store buckets and the code host
//! through the shared publish queue, reporting exported file versions to a
//! metadata service.

pub mod editor;
pub mod error;
pub mod lifecycle;
pub mod orchestration;
pub mod publish;
pub mod snapshot;
pub mod store;
pub mod system;
pub mod tasks;
/// Identifier and author types.
pub mod types;

pub use error::{Result, TaskError};
pub use snapshot::SnapshotCoordinator;
pub use system::TaskSystem;
pub use tasks::{TaskService, TaskSubmitter};
pub use types::{CommitAuthor, CommitId, DatasetId, TaskId};
