//! Raw configuration sources: process environment and the TOML file.
//!
//! Both layers keep every field optional; [`crate::loader`] composes them
//! with environment values taking precedence.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::lookup_var;

/// Values read from the environment. Numeric and boolean fields are kept as
/// raw text so that composition can report which key was malformed.
#[derive(Default, Clone)]
pub struct EnvConfig {
    /// `TESSERA_CONFIG_PATH`.
    pub config_path: Option<PathBuf>,
    /// `DATALAD_WORKERS`.
    pub workers: Option<String>,
    /// `DATALAD_DATASET_PATH`.
    pub dataset_path: Option<PathBuf>,
    /// `TESSERA_DATASET_QUEUE_CONCURRENCY`.
    pub dataset_concurrency: Option<String>,
    /// `TESSERA_PUBLISH_QUEUE_CONCURRENCY`.
    pub publish_concurrency: Option<String>,
    /// `TESSERA_JOIN_STRATEGY`.
    pub join_strategy: Option<String>,
    /// `TESSERA_TASK_RETENTION_SECS`.
    pub task_retention_secs: Option<String>,
    /// `SERVER_HOST`.
    pub server_host: Option<String>,
    /// `SERVER_PORT`.
    pub server_port: Option<String>,
    /// `GRAPHQL_ENDPOINT`.
    pub graphql_endpoint: Option<String>,
    /// `DATALAD_GITHUB_ORG`.
    pub github_org: Option<String>,
    /// `DATALAD_GITHUB_LOGIN`.
    pub github_login: Option<String>,
    /// `DATALAD_GITHUB_PASS`.
    pub github_pass: Option<String>,
    /// `DATALAD_GITHUB_EXPORTS_ENABLED`.
    pub github_exports_enabled: Option<String>,
    /// `AWS_ACCESS_KEY_ID`.
    pub aws_access_key_id: Option<String>,
    /// `AWS_SECRET_ACCESS_KEY`.
    pub aws_secret_access_key: Option<String>,
    /// `AWS_REGION`.
    pub aws_region: Option<String>,
    /// `AWS_ACCOUNT_ID`.
    pub aws_account_id: Option<String>,
    /// `AWS_S3_PRIVATE_BUCKET`.
    pub aws_private_bucket: Option<String>,
    /// `AWS_S3_PUBLIC_BUCKET`.
    pub aws_public_bucket: Option<String>,
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("EnvConfig")
            .field("config_path", &self.config_path)
            .field("workers", &self.workers)
            .field("dataset_path", &self.dataset_path)
            .field("join_strategy", &self.join_strategy)
            .field("server_port", &self.server_port)
            .field("github_org", &self.github_org)
            .field("github_pass", &redact(&self.github_pass))
            .field("aws_secret_access_key", &redact(&self.aws_secret_access_key))
            .finish_non_exhaustive()
    }
}

impl EnvConfig {
    /// Snapshot of the current process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the environment layer from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup_var(&lookup, key);
        Self {
            config_path: var("TESSERA_CONFIG_PATH").map(PathBuf::from),
            workers: var("DATALAD_WORKERS"),
            dataset_path: var("DATALAD_DATASET_PATH").map(PathBuf::from),
            dataset_concurrency: var("TESSERA_DATASET_QUEUE_CONCURRENCY"),
            publish_concurrency: var("TESSERA_PUBLISH_QUEUE_CONCURRENCY"),
            join_strategy: var("TESSERA_JOIN_STRATEGY"),
            task_retention_secs: var("TESSERA_TASK_RETENTION_SECS"),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT"),
            graphql_endpoint: var("GRAPHQL_ENDPOINT"),
            github_org: var("DATALAD_GITHUB_ORG"),
            github_login: var("DATALAD_GITHUB_LOGIN"),
            github_pass: var("DATALAD_GITHUB_PASS"),
            github_exports_enabled: var("DATALAD_GITHUB_EXPORTS_ENABLED"),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            aws_region: var("AWS_REGION"),
            aws_account_id: var("AWS_ACCOUNT_ID"),
            aws_private_bucket: var("AWS_S3_PRIVATE_BUCKET"),
            aws_public_bucket: var("AWS_S3_PUBLIC_BUCKET"),
        }
    }
}

/// Shape of `tessera.toml`. Secrets are read from the environment only.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    /// `[server]`.
    pub server: FileServerConfig,
    /// `[datasets]`.
    pub datasets: FileDatasetConfig,
    /// `[workers]`.
    pub workers: FileWorkerConfig,
    /// `[github]`.
    pub github: FileGithubConfig,
    /// `[aws]`.
    pub aws: FileAwsConfig,
    /// `[graphql]`.
    pub graphql: FileGraphqlConfig,
}

/// HTTP listener.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileServerConfig {
    /// Bind host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Bind port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Dataset storage.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileDatasetConfig {
    /// Directory holding one repository per dataset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Worker layout.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileWorkerConfig {
    /// Number of dataset partitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    /// Consumers per dataset queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_concurrency: Option<usize>,
    /// Consumers on the publish queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_concurrency: Option<usize>,
    /// `in_process` or `queued`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<String>,
    /// Seconds a finished task stays queryable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_retention_secs: Option<u64>,
}

/// Code-host export. The password is read from the environment only.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileGithubConfig {
    /// Push public snapshots to the code host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports_enabled: Option<bool>,
    /// Organization owning exported repositories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// API login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

/// Object-store location. Keys are read from the environment only.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileAwsConfig {
    /// Bucket region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Account owning the buckets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Bucket for private datasets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_bucket: Option<String>,
    /// Bucket for public datasets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_bucket: Option<String>,
}

/// Metadata service.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileGraphqlConfig {
    /// GraphQL endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_layer_reads_recognised_keys() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATALAD_WORKERS", "4"),
            ("DATALAD_DATASET_PATH", "/datalad"),
            ("DATALAD_GITHUB_PASS", "hunter2"),
            ("AWS_S3_PUBLIC_BUCKET", "public-bucket"),
            ("TESSERA_JOIN_STRATEGY", ""),
        ]);
        let env = EnvConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(env.workers.as_deref(), Some("4"));
        assert_eq!(env.dataset_path, Some(PathBuf::from("/datalad")));
        assert_eq!(env.aws_public_bucket.as_deref(), Some("public-bucket"));
        assert_eq!(env.join_strategy, None);
        assert!(!format!("{env:?}").contains("hunter2"));
    }

    #[test]
    fn file_sections_are_optional() {
        let file: FileConfig = toml::from_str(
            r#"
            [workers]
            partitions = 2
            join_strategy = "queued"
            task_retention_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(file.workers.partitions, Some(2));
        assert_eq!(file.workers.join_strategy.as_deref(), Some("queued"));
        assert_eq!(file.workers.task_retention_secs, Some(30));
        assert!(file.server.port.is_none());
        assert!(file.aws.public_bucket.is_none());
    }
}
