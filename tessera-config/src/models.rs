//! Composed configuration handed to the worker process.

use std::fmt;
use std::path::PathBuf;

use tessera_core::orchestration::OrchestratorConfig;
use tessera_core::publish::PublishSettings;
use url::Url;

/// Everything the worker process needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Directory holding one repository per dataset.
    pub dataset_root: PathBuf,
    /// Queue layout and join strategy.
    pub orchestrator: OrchestratorConfig,
    /// Buckets and code-host export.
    pub publish: PublishSettings,
    /// Object-store credentials.
    pub aws: AwsConfig,
    /// Metadata service receiving exported file versions.
    pub graphql_endpoint: Option<Url>,
    /// Provenance of the values above.
    pub metadata: ConfigMetadata,
}

/// HTTP listener address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Credentials and location handed to the annex S3 special remotes.
#[derive(Clone, Default)]
pub struct AwsConfig {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret key; redacted from debug output.
    pub secret_access_key: Option<String>,
    /// Bucket region.
    pub region: Option<String>,
    /// Account owning the buckets.
    pub account_id: Option<String>,
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl AwsConfig {
    /// Environment passed to `git annex` subprocesses.
    pub fn annex_env(&self) -> Vec<(String, String)> {
        [
            ("AWS_ACCESS_KEY_ID", &self.access_key_id),
            ("AWS_SECRET_ACCESS_KEY", &self.secret_access_key),
            ("AWS_REGION", &self.region),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|value| (key.to_string(), value)))
        .collect()
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// TOML file that was read, if any.
    pub config_path: Option<PathBuf>,
    /// Whether a `.env` file was found.
    pub env_file_loaded: bool,
}
