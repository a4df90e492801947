use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::orchestration::{
    PublishGithubTask, PublishS3Task, PublishSnapshotTask, QueueRouter, TaskBroker, TaskHandle,
    TaskPayload,
};
use crate::store::DatasetStore;
use crate::types::TaskId;

use super::callback::MetadataCallback;
use super::realm::{DatasetRealm, resolve_realm};
use super::sibling::{SiblingKind, SiblingProvisioner};

/// Handles for the publish jobs a [`PublishCoordinator::publish_snapshot`]
/// call enqueued.
#[derive(Debug)]
pub struct PublishDispatch {
    /// Realm the publish resolved to.
    pub realm: DatasetRealm,
    /// Bucket export job.
    pub s3: TaskHandle,
    /// Code-host push, when exports are enabled.
    pub github: Option<TaskHandle>,
}

/// Serializable summary of a [`PublishDispatch`].
#[derive(Debug, Clone, Serialize)]
pub struct PublishSummary {
    /// Realm the publish resolved to.
    pub realm: DatasetRealm,
    /// Id of the bucket export job.
    pub s3_task: TaskId,
    /// Id of the code-host push.
    pub github_task: Option<TaskId>,
}

impl PublishDispatch {
    /// Task ids of the dispatched jobs.
    pub fn summary(&self) -> PublishSummary {
        PublishSummary {
            realm: self.realm,
            s3_task: self.s3.task_id,
            github_task: self.github.as_ref().map(|handle| handle.task_id),
        }
    }
}

/// Fans a snapshot out to its publish targets.
pub struct PublishCoordinator {
    pub(super) store: Arc<dyn DatasetStore>,
    pub(super) broker: Arc<dyn TaskBroker>,
    pub(super) router: QueueRouter,
    pub(super) provisioner: Arc<SiblingProvisioner>,
    pub(super) callback: Arc<dyn MetadataCallback>,
}

impl fmt::Debug for PublishCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishCoordinator")
            .field("router", &self.router)
            .field("provisioner", &self.provisioner)
            .finish_non_exhaustive()
    }
}

impl PublishCoordinator {
    /// Coordinator enqueuing on `broker` through `router`.
    pub fn new(
        store: Arc<dyn DatasetStore>,
        broker: Arc<dyn TaskBroker>,
        router: QueueRouter,
        provisioner: Arc<SiblingProvisioner>,
        callback: Arc<dyn MetadataCallback>,
    ) -> Self {
        Self {
            store,
            broker,
            router,
            provisioner,
            callback,
        }
    }

    /// Resolves the realm, wires the needed siblings and enqueues the
    /// publish jobs without waiting for them.
    #[instrument(
        name = "publish.snapshot",
        skip(self, task),
        fields(dataset = %task.dataset, tag = %task.tag),
        err
    )]
    pub async fn publish_snapshot(&self, task: PublishSnapshotTask) -> Result<PublishDispatch> {
        let dataset = self.store.get_dataset(&task.dataset);
        let mut siblings = dataset.repo.siblings().await?;
        let realm = resolve_realm(task.realm.as_deref(), &siblings)?;
        let bucket = self.provisioner.settings().buckets.bucket_for(realm)?.to_string();

        self.provisioner
            .ensure_sibling(&dataset, SiblingKind::ObjectStore(realm), &mut siblings)
            .await?;

        let queue = self.router.publish_queue();
        let s3 = self
            .broker
            .enqueue(
                &queue,
                TaskPayload::PublishS3(PublishS3Task {
                    dataset: task.dataset.clone(),
                    tag: task.tag.clone(),
                    s3_remote: realm.s3_remote().to_string(),
                    s3_bucket: bucket,
                    cookies: task.cookies.clone(),
                }),
            )
            .await?;

        let github = if self.provisioner.settings().exports_to_code_host(realm) {
            self.provisioner
                .ensure_sibling(&dataset, SiblingKind::CodeHost, &mut siblings)
                .await?;
            let handle = self
                .broker
                .enqueue(
                    &queue,
                    TaskPayload::PublishGithub(PublishGithubTask {
                        dataset: task.dataset.clone(),
                        tag: task.tag.clone(),
                        github_remote: realm.github_remote().to_string(),
                    }),
                )
                .await?;
            Some(handle)
        } else {
            None
        };

        info!(
            %realm,
            s3_task = %s3.task_id,
            github = github.is_some(),
            "publish jobs enqueued"
        );
        Ok(PublishDispatch { realm, s3, github })
    }

    /// Exports the tag to the object store and reports the produced
    /// versions. Returns the number of files reported.
    #[instrument(
        name = "publish.s3",
        skip(self, task),
        fields(dataset = %task.dataset, tag = %task.tag, remote = %task.s3_remote),
        err
    )]
    /// Exports the tag and reports the produced versions. Returns the number
    /// of files exported.
    pub async fn publish_s3(&self, task: PublishS3Task) -> Result<usize> {
        let dataset = self.store.get_dataset(&task.dataset);
        let versions = dataset
            .repo
            .export_tree(&task.s3_remote, &task.s3_bucket, &task.tag)
            .await?;
        if !versions.is_empty() {
            self.callback
                .update_file_urls(&task.dataset, &task.tag, &versions, task.cookies.clone())
                .await?;
        }
        info!(files = versions.len(), "object store export finished");
        Ok(versions.len())
    }

    #[instrument(
        name = "publish.github",
        skip(self, task),
        fields(dataset = %task.dataset, tag = %task.tag, remote = %task.github_remote),
        err
    )]
    /// Pushes the tag to the code-host remote.
    pub async fn publish_github(&self, task: PublishGithubTask) -> Result<()> {
        let dataset = self.store.get_dataset(&task.dataset);
        dataset.repo.push(&task.github_remote, &task.tag).await?;
        info!("code host push finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::orchestration::{InMemoryBroker, QueueConcurrency, TaskKind};
    use crate::publish::callback::MockMetadataCallback;
    use crate::publish::sibling::{GithubSettings, MockCodeHost, PublishSettings, RealmBuckets};
    use crate::store::InMemoryStore;
    use crate::types::DatasetId;

    fn id() -> DatasetId {
        DatasetId::new("ds000001").unwrap()
    }

    fn settings(exports_enabled: bool) -> PublishSettings {
        PublishSettings {
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
        }
    }

    struct Harness {
        store: InMemoryStore,
        broker: Arc<InMemoryBroker>,
        coordinator: PublishCoordinator,
    }

    async fn harness(exports_enabled: bool, callback: MockMetadataCallback) -> Harness {
        let store = InMemoryStore::new();
        store
            .seed(&id(), [("sub-01/anat.nii.gz", "data")])
            .await
            .unwrap();
        store.get_dataset(&id()).repo.tag("1.0.0").await.unwrap();

        let router = QueueRouter::new(1).unwrap();
        let broker = Arc::new(InMemoryBroker::for_router(&router, QueueConcurrency::default()));
        let mut code_host = MockCodeHost::new();
        code_host
            .expect_create_repository()
            .returning(|org, name| Ok(format!("git@github.com:{org}/{name}.git")));
        let provisioner = Arc::new(SiblingProvisioner::new(
            Arc::new(settings(exports_enabled)),
            Arc::new(code_host),
        ));
        let coordinator = PublishCoordinator::new(
            Arc::new(store.clone()),
            broker.clone(),
            router,
            provisioner,
            Arc::new(callback),
        );
        Harness {
            store,
            broker,
            coordinator,
        }
    }

    fn publish(realm: Option<&str>) -> PublishSnapshotTask {
        PublishSnapshotTask {
            dataset: id(),
            tag: "1.0.0".into(),
            realm: realm.map(str::to_string),
            cookies: None,
        }
    }

    #[tokio::test]
    async fn private_publish_enqueues_only_object_store_job() {
        let h = harness(true, MockMetadataCallback::new()).await;

        let dispatch = h.coordinator.publish_snapshot(publish(None)).await.unwrap();
        assert_eq!(dispatch.realm, DatasetRealm::Private);
        assert!(dispatch.github.is_none());
        assert!(dispatch.s3.queue.is_publish());

        let queued = h.broker.next_task(&dispatch.s3.queue).await.unwrap();
        match &queued.payload {
            TaskPayload::PublishS3(job) => {
                assert_eq!(job.s3_remote, "s3-PRIVATE");
                assert_eq!(job.s3_bucket, "private-bucket");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(h.store.remote_kind(&id(), "s3-PRIVATE").await.is_some());
    }

    #[tokio::test]
    async fn public_publish_with_exports_enqueues_both_jobs() {
        let h = harness(true, MockMetadataCallback::new()).await;

        let dispatch = h
            .coordinator
            .publish_snapshot(publish(Some("PUBLIC")))
            .await
            .unwrap();
        let github = dispatch.github.expect("github job");
        assert_eq!(github.kind, TaskKind::PublishGithub);
        let siblings = h.store.get_dataset(&id()).repo.siblings().await.unwrap();
        let names: Vec<&str> = siblings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s3-PUBLIC", "github"]);
    }

    #[tokio::test]
    async fn invalid_realm_fails_before_side_effects() {
        let h = harness(true, MockMetadataCallback::new()).await;
        let err = h
            .coordinator
            .publish_snapshot(publish(Some("staging")))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidRealm(_)));
        assert!(h.store.get_dataset(&id()).repo.siblings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn s3_job_reports_versions_through_callback() {
        let mut callback = MockMetadataCallback::new();
        callback
            .expect_update_file_urls()
            .times(1)
            .withf(|dataset, tag, files, cookies| {
                dataset.as_str() == "ds000001"
                    && tag == "1.0.0"
                    && files.contains_key("sub-01/anat.nii.gz")
                    && cookies.as_deref() == Some("session=1")
            })
            .returning(|_, _, _, _| Ok(()));
        let h = harness(false, callback).await;
        h.store
            .get_dataset(&id())
            .repo
            .init_s3_remote("s3-PRIVATE", "private-bucket", false)
            .await
            .unwrap();

        let files = h
            .coordinator
            .publish_s3(PublishS3Task {
                dataset: id(),
                tag: "1.0.0".into(),
                s3_remote: "s3-PRIVATE".into(),
                s3_bucket: "private-bucket".into(),
                cookies: Some("session=1".into()),
            })
            .await
            .unwrap();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn callback_failure_fails_the_s3_job() {
        let mut callback = MockMetadataCallback::new();
        callback.expect_update_file_urls().returning(|_, _, _, _| {
            Err(TaskError::Upstream {
                status: 500,
                body: "down".into(),
            })
        });
        let h = harness(false, callback).await;
        h.store
            .get_dataset(&id())
            .repo
            .init_s3_remote("s3-PRIVATE", "private-bucket", false)
            .await
            .unwrap();

        let err = h
            .coordinator
            .publish_s3(PublishS3Task {
                dataset: id(),
                tag: "1.0.0".into(),
                s3_remote: "s3-PRIVATE".into(),
                s3_bucket: "private-bucket".into(),
                cookies: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Upstream { status: 500, .. }));
    }
}
