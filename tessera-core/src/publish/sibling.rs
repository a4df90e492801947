use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TaskError};
use crate::store::{Dataset, Sibling, has_sibling};

use super::realm::{DatasetRealm, GITHUB_REMOTE};

/// A publish target a dataset may need wired as a remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiblingKind {
    /// Bucket export remote for a realm.
    ObjectStore(DatasetRealm),
    /// Code-host git remote.
    CodeHost,
}

impl SiblingKind {
    /// Remote name the sibling is registered under.
    pub fn remote_name(&self) -> &'static str {
        match self {
            SiblingKind::ObjectStore(realm) => realm.s3_remote(),
            SiblingKind::CodeHost => GITHUB_REMOTE,
        }
    }
}

/// Bucket per realm. Buckets must already exist and be versioned.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RealmBuckets {
    /// Bucket for `PRIVATE` datasets.
    pub private: Option<String>,
    /// Bucket for `PUBLIC` datasets.
    pub public: Option<String>,
}

impl RealmBuckets {
    /// Bucket for `realm`; an unset or blank bucket is a configuration error.
    pub fn bucket_for(&self, realm: DatasetRealm) -> Result<&str> {
        let (bucket, key) = match realm {
            DatasetRealm::Private => (&self.private, "AWS_S3_PRIVATE_BUCKET"),
            DatasetRealm::Public => (&self.public, "AWS_S3_PUBLIC_BUCKET"),
        };
        bucket
            .as_deref()
            .filter(|bucket| !bucket.trim().is_empty())
            .ok_or_else(|| {
                TaskError::ConfigurationMissing(format!(
                    "{key} must be set to publish to the {realm} realm"
                ))
            })
    }
}

/// Code-hosting export settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct GithubSettings {
    /// Push public snapshots to the code host.
    pub exports_enabled: bool,
    /// Organization owning the exported repositories.
    pub organization: Option<String>,
    /// API login.
    pub login: Option<String>,
    /// API token or password.
    pub password: Option<String>,
}

impl fmt::Debug for GithubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubSettings")
            .field("exports_enabled", &self.exports_enabled)
            .field("organization", &self.organization)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GithubSettings {
    /// Organization that owns exported repositories, once exports are
    /// enabled and every credential is present.
    pub fn require_organization(&self) -> Result<&str> {
        if !self.exports_enabled {
            return Err(TaskError::ConfigurationMissing(
                "DATALAD_GITHUB_EXPORTS_ENABLED must be defined to create remote repos".into(),
            ));
        }
        match (&self.organization, &self.login, &self.password) {
            (Some(org), Some(_), Some(_)) => Ok(org),
            _ => Err(TaskError::ConfigurationMissing(
                "DATALAD_GITHUB_LOGIN, DATALAD_GITHUB_PASS, and DATALAD_GITHUB_ORG must be defined to create remote repos"
                    .into(),
            )),
        }
    }
}

/// Settings shared by the publish and migration coordinators.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Object-store buckets.
    pub buckets: RealmBuckets,
    /// Code-host export.
    pub github: GithubSettings,
}

impl PublishSettings {
    /// Whether a publish to `realm` also goes to the code host.
    pub fn exports_to_code_host(&self, realm: DatasetRealm) -> bool {
        realm.is_public() && self.github.exports_enabled
    }
}

/// Remote repository creation on the code host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Creates `organization/name` (or accepts an existing one) and returns
    /// the URL to push to.
    async fn create_repository(&self, organization: &str, name: &str) -> Result<String>;
}

/// Wires publish remotes onto a dataset, at most once per name.
pub struct SiblingProvisioner {
    settings: Arc<PublishSettings>,
    code_host: Arc<dyn CodeHost>,
}

impl fmt::Debug for SiblingProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiblingProvisioner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SiblingProvisioner {
    /// Provisioner creating code-host repositories through `code_host`.
    pub fn new(settings: Arc<PublishSettings>, code_host: Arc<dyn CodeHost>) -> Self {
        Self {
            settings,
            code_host,
        }
    }

    /// Settings the provisioner was built with.
    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Ensures the `kind` remote exists, creating it only when `existing`
    /// has no sibling of that name. A created sibling is appended to
    /// `existing`. Returns whether a remote was created.
    pub async fn ensure_sibling(
        &self,
        dataset: &Dataset,
        kind: SiblingKind,
        existing: &mut Vec<Sibling>,
    ) -> Result<bool> {
        let name = kind.remote_name();
        if has_sibling(existing, name) {
            debug!(dataset = %dataset.id, sibling = name, "sibling already configured");
            return Ok(false);
        }

        let sibling = match kind {
            SiblingKind::ObjectStore(realm) => {
                let bucket = self.settings.buckets.bucket_for(realm)?;
                dataset
                    .repo
                    .init_s3_remote(name, bucket, realm.is_public())
                    .await?;
                Sibling::named(name)
            }
            SiblingKind::CodeHost => {
                let organization = self.settings.github.require_organization()?;
                let url = self
                    .code_host
                    .create_repository(organization, dataset.id.as_str())
                    .await?;
                dataset.repo.add_remote(name, &url).await?;
                Sibling {
                    name: name.to_string(),
                    url: Some(url),
                }
            }
        };
        info!(dataset = %dataset.id, sibling = name, "sibling created");
        existing.push(sibling);
        Ok(true)
    }
}
