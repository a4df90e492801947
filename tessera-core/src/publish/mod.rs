//! Publishing snapshots to object-store buckets and the code host.

/// Reporting exported file versions.
pub mod callback;
/// Publish fan-out.
pub mod coordinator;
/// GitHub code host client.
pub mod github;
/// Re-export of every tag to a realm's bucket.
pub mod migrate;
/// Publish realms and their resolution.
pub mod realm;
/// Remote provisioning and publish settings.
pub mod sibling;

pub use callback::{FILE_URLS_MUTATION, GraphqlCallback, MetadataCallback, file_urls_mutation};
pub use coordinator::{PublishCoordinator, PublishDispatch, PublishSummary};
pub use github::GithubClient;
pub use migrate::MigrationReport;
pub use realm::{DatasetRealm, GITHUB_REMOTE, resolve_realm};
pub use sibling::{
    CodeHost, GithubSettings, PublishSettings, RealmBuckets, SiblingKind, SiblingProvisioner,
};
