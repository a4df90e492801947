use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::orchestration::MigrateToBucketTask;

use super::coordinator::PublishCoordinator;
use super::realm::DatasetRealm;
use super::sibling::SiblingKind;

/// What a migration moved.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    /// Destination realm.
    pub realm: DatasetRealm,
    /// Tags exported, in order.
    pub tags: Vec<String>,
    /// Files reported across all tags.
    pub files_reported: usize,
    /// Whether the tags were also pushed to the code host.
    pub pushed_to_code_host: bool,
}

impl PublishCoordinator {
    /// Exports every existing tag, in order, to the realm's bucket. The
    /// first failing tag stops the migration and its error is returned.
    #[instrument(
        name = "publish.migrate",
        skip(self, task),
        fields(dataset = %task.dataset, realm = %task.realm),
        err
    )]
    pub async fn migrate_to_bucket(&self, task: MigrateToBucketTask) -> Result<MigrationReport> {
        let realm: DatasetRealm = task.realm.parse()?;
        let settings = self.provisioner.settings();
        let bucket = settings.buckets.bucket_for(realm)?.to_string();
        let to_code_host = settings.exports_to_code_host(realm);

        let dataset = self.store.get_dataset(&task.dataset);
        let tags = dataset.repo.tags().await?;
        let mut siblings = dataset.repo.siblings().await?;
        self.provisioner
            .ensure_sibling(&dataset, SiblingKind::ObjectStore(realm), &mut siblings)
            .await?;

        let mut report = MigrationReport {
            realm,
            tags: Vec::with_capacity(tags.len()),
            files_reported: 0,
            pushed_to_code_host: to_code_host,
        };
        for tag in tags {
            let versions = dataset
                .repo
                .export_tree(realm.s3_remote(), &bucket, &tag.name)
                .await?;
            if !versions.is_empty() {
                self.callback
                    .update_file_urls(&task.dataset, &tag.name, &versions, task.cookies.clone())
                    .await?;
            }
            if to_code_host {
                self.provisioner
                    .ensure_sibling(&dataset, SiblingKind::CodeHost, &mut siblings)
                    .await?;
                dataset.repo.push(realm.github_remote(), &tag.name).await?;
            }
            info!(tag = %tag.name, files = versions.len(), "tag migrated");
            report.files_reported += versions.len();
            report.tags.push(tag.name);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::TaskError;
    use crate::orchestration::{InMemoryBroker, QueueConcurrency, QueueRouter};
    use crate::publish::callback::MockMetadataCallback;
    use crate::publish::sibling::{
        GithubSettings, MockCodeHost, PublishSettings, RealmBuckets, SiblingProvisioner,
    };
    use crate::store::{DatasetStore, InMemoryStore};
    use crate::types::{CommitAuthor, DatasetId};

    fn id() -> DatasetId {
        DatasetId::new("ds000001").unwrap()
    }

    async fn store_with_tags(tags: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.seed(&id(), [("sub-01/anat.nii.gz", "v0")]).await.unwrap();
        let repo = store.get_dataset(&id()).repo;
        for (n, tag) in tags.iter().enumerate() {
            repo.write_working_file("sub-01/anat.nii.gz", format!("v{}", n + 1).as_bytes())
                .await
                .unwrap();
            repo.add("sub-01/anat.nii.gz").await.unwrap();
            repo.commit(&CommitAuthor::default(), "edit").await.unwrap();
            repo.tag(tag).await.unwrap();
        }
        store
    }

    fn coordinator(
        store: &InMemoryStore,
        exports_enabled: bool,
        callback: MockMetadataCallback,
        code_host: MockCodeHost,
    ) -> PublishCoordinator {
        let router = QueueRouter::new(1).unwrap();
        let broker = Arc::new(InMemoryBroker::for_router(&router, QueueConcurrency::default()));
        let settings = PublishSettings {
            buckets: RealmBuckets {
                private: Some("private-bucket".into()),
                public: Some("public-bucket".into()),
            },
            github: GithubSettings {
                exports_enabled,
                organization: Some("Org".into()),
                login: Some("bot".into()),
                password: Some("secret".into()),
            },
        };
        PublishCoordinator::new(
            Arc::new(store.clone()),
            broker,
            router,
            Arc::new(SiblingProvisioner::new(Arc::new(settings), Arc::new(code_host))),
            Arc::new(callback),
        )
    }

    #[tokio::test]
    async fn migrates_every_tag_in_order_and_pushes_public() {
        let store = store_with_tags(&["1.0.0", "1.0.1"]).await;
        let mut callback = MockMetadataCallback::new();
        callback
            .expect_update_file_urls()
            .times(2)
            .returning(|_, _, _, _| Ok(()));
        let mut code_host = MockCodeHost::new();
        code_host
            .expect_create_repository()
            .times(1)
            .returning(|org, name| Ok(format!("git@github.com:{org}/{name}.git")));
        let coordinator = coordinator(&store, true, callback, code_host);

        let report = coordinator
            .migrate_to_bucket(MigrateToBucketTask {
                dataset: id(),
                realm: "PUBLIC".into(),
                cookies: None,
            })
            .await
            .unwrap();
        assert_eq!(report.tags, vec!["1.0.0", "1.0.1"]);
        assert_eq!(report.files_reported, 2);

        let exports: Vec<String> = store
            .exports(&id())
            .await
            .into_iter()
            .map(|record| record.reference)
            .collect();
        assert_eq!(exports, vec!["1.0.0", "1.0.1"]);
        assert_eq!(store.pushes(&id()).await.len(), 2);
    }

    #[tokio::test]
    async fn first_failure_stops_the_loop() {
        let store = store_with_tags(&["1.0.0", "1.0.1", "1.0.2"]).await;
        let mut callback = MockMetadataCallback::new();
        callback
            .expect_update_file_urls()
            .withf(|_, tag, _, _| tag == "1.0.0")
            .returning(|_, _, _, _| Ok(()));
        callback
            .expect_update_file_urls()
            .withf(|_, tag, _, _| tag == "1.0.1")
            .returning(|_, _, _, _| {
                Err(TaskError::Upstream {
                    status: 502,
                    body: "bad gateway".into(),
                })
            });
        let coordinator = coordinator(&store, false, callback, MockCodeHost::new());

        let err = coordinator
            .migrate_to_bucket(MigrateToBucketTask {
                dataset: id(),
                realm: "PRIVATE".into(),
                cookies: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Upstream { status: 502, .. }));
        assert_eq!(store.exports(&id()).await.len(), 2);
        assert!(store.pushes(&id()).await.is_empty());
    }
}
