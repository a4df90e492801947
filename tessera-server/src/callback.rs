use async_trait::async_trait;
use tessera_core::publish::MetadataCallback;
use tessera_core::store::VersionRecord;
use tessera_core::{DatasetId, Result};
use tracing::warn;

/// Stand-in used when no metadata endpoint is configured. Exports still run;
/// their version records are only logged.
#[derive(Debug, Default)]
pub struct UnreportedVersions;

#[async_trait]
impl MetadataCallback for UnreportedVersions {
    async fn update_file_urls(
        &self,
        dataset: &DatasetId,
        tag: &str,
        files: &VersionRecord,
        _cookies: Option<String>,
    ) -> Result<()> {
        warn!(
            %dataset,
            tag,
            files = files.len(),
            "no metadata endpoint configured, file versions not reported"
        );
        Ok(())
    }
}
