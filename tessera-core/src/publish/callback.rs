use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::{Result, TaskError};
use crate::store::VersionRecord;
use crate::types::DatasetId;

/// GraphQL mutation recording exported file versions.
pub const FILE_URLS_MUTATION: &str =
    "mutation ($files: FileUrls!) { updateSnapshotFileUrls(fileUrls: $files)}";

/// Request body reporting the object-store versions of a snapshot's files.
pub fn file_urls_mutation(dataset: &DatasetId, tag: &str, files: &VersionRecord) -> Value {
    json!({
        "query": FILE_URLS_MUTATION,
        "variables": {
            "files": {
                "datasetId": dataset.as_str(),
                "tag": tag,
                "files": files,
            }
        }
    })
}

/// Receives the version record produced by an export.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataCallback: Send + Sync {
    /// Records the versions exported for `tag`. `cookies` authenticates the
    /// call on behalf of the requesting user.
    async fn update_file_urls(
        &self,
        dataset: &DatasetId,
        tag: &str,
        files: &VersionRecord,
        cookies: Option<String>,
    ) -> Result<()>;
}

/// [`MetadataCallback`] posting the mutation to a GraphQL endpoint.
pub struct GraphqlCallback {
    http: reqwest::Client,
    endpoint: Url,
}

impl fmt::Debug for GraphqlCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphqlCallback")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl GraphqlCallback {
    /// Callback posting to `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl MetadataCallback for GraphqlCallback {
    async fn update_file_urls(
        &self,
        dataset: &DatasetId,
        tag: &str,
        files: &VersionRecord,
        cookies: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&file_urls_mutation(dataset, tag, files));
        if let Some(cookies) = cookies.filter(|cookies| !cookies.is_empty()) {
            request = request.header(reqwest::header::COOKIE, cookies);
        }
        let response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        debug!(%dataset, %tag, files = files.len(), "file urls reported");
        Ok(())
    }
}
