use std::fs;
use std::path::PathBuf;

use tessera_core::TaskError;
use tessera_core::orchestration::{
    DEFAULT_TASK_RETENTION_SECS, JoinStrategy, OrchestratorConfig, QueueConcurrency,
};
use tessera_core::publish::{GithubSettings, PublishSettings, RealmBuckets};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::{AwsConfig, Config, ConfigMetadata, ServerConfig};
use crate::sources::{EnvConfig, FileConfig};
use crate::util::{parse_bool, parse_raw};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["tessera.toml", "config/tessera.toml"];
const DEFAULT_DATASET_ROOT: &str = "/datalad";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

/// Overrides for where configuration is read from.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    /// Explicit TOML path; missing is an error.
    pub config_path: Option<PathBuf>,
    /// Explicit `.env` path.
    pub env_file: Option<PathBuf>,
}

/// Reads and composes every configuration source.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    /// Loader using the default locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader using `options`.
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Reads the TOML file at `path`.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Reads the `.env` file at `path`.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then the process environment, then the TOML file, and
    /// composes them with environment values winning.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(not_found)?,
            None => dotenvy::dotenv().map(|_| true).or_else(not_found)?,
        };
        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;
        debug!(?config_path, env_file_loaded, "configuration sources resolved");

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        compose(file, env, metadata)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let source = ConfigPathSource {
            explicit: self.options.config_path.clone(),
            env: env.config_path.clone(),
            default: DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists()),
        };
        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance == ConfigPathProvenance::Default {
                return Ok((None, None));
            }
            return Err(ConfigLoadError::MissingConfig { path });
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file = toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok((Some(file), Some(path)))
    }
}

fn not_found(err: dotenvy::Error) -> Result<bool, dotenvy::Error> {
    match err {
        dotenvy::Error::Io(_) => Ok(false),
        other => Err(other),
    }
}

/// Merges the two layers, validates the result and collects warnings for
/// settings that will only fail once a task needs them.
pub fn compose(
    file: Option<FileConfig>,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let file = file.unwrap_or_default();
    let mut warnings = Vec::new();
    if metadata.config_path.is_none() {
        warnings.push("No tessera.toml detected; using environment variables only".to_string());
    }

    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file.server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: parsed("SERVER_PORT", env.server_port.as_deref())?
            .or(file.server.port)
            .unwrap_or(DEFAULT_PORT),
    };

    let join_strategy = match env.join_strategy.clone().or(file.workers.join_strategy) {
        Some(raw) => raw
            .parse::<JoinStrategy>()
            .map_err(|_| ConfigLoadError::InvalidValue {
                key: "TESSERA_JOIN_STRATEGY",
                value: raw,
            })?,
        None => JoinStrategy::default(),
    };
    let defaults = QueueConcurrency::default();
    let orchestrator = OrchestratorConfig {
        partitions: parsed("DATALAD_WORKERS", env.workers.as_deref())?
            .or(file.workers.partitions)
            .unwrap_or(1),
        concurrency: QueueConcurrency {
            dataset: parsed(
                "TESSERA_DATASET_QUEUE_CONCURRENCY",
                env.dataset_concurrency.as_deref(),
            )?
            .or(file.workers.dataset_concurrency)
            .unwrap_or(defaults.dataset),
            publish: parsed(
                "TESSERA_PUBLISH_QUEUE_CONCURRENCY",
                env.publish_concurrency.as_deref(),
            )?
            .or(file.workers.publish_concurrency)
            .unwrap_or(defaults.publish),
        },
        join_strategy,
        task_retention_secs: parsed(
            "TESSERA_TASK_RETENTION_SECS",
            env.task_retention_secs.as_deref(),
        )?
        .or(file.workers.task_retention_secs)
        .unwrap_or(DEFAULT_TASK_RETENTION_SECS),
    };
    orchestrator.validate()?;

    let exports_enabled = match env.github_exports_enabled.as_deref() {
        Some(raw) => parse_bool(raw).ok_or_else(|| ConfigLoadError::InvalidValue {
            key: "DATALAD_GITHUB_EXPORTS_ENABLED",
            value: raw.to_string(),
        })?,
        None => file.github.exports_enabled.unwrap_or(false),
    };
    let publish = PublishSettings {
        buckets: RealmBuckets {
            private: env.aws_private_bucket.clone().or(file.aws.private_bucket),
            public: env.aws_public_bucket.clone().or(file.aws.public_bucket),
        },
        github: GithubSettings {
            exports_enabled,
            organization: env.github_org.clone().or(file.github.organization),
            login: env.github_login.clone().or(file.github.login),
            password: env.github_pass.clone(),
        },
    };
    if publish.buckets.private.is_none() && publish.buckets.public.is_none() {
        warnings.push("No S3 buckets configured; publish tasks will fail".to_string());
    }
    if exports_enabled && publish.github.require_organization().is_err() {
        warnings.push(
            "GitHub exports enabled without DATALAD_GITHUB_ORG/LOGIN/PASS; public publishes will fail"
                .to_string(),
        );
    }

    let graphql_endpoint = match env.graphql_endpoint.clone().or(file.graphql.endpoint) {
        Some(raw) => Some(Url::parse(&raw).map_err(|source| ConfigLoadError::InvalidUrl {
            key: "GRAPHQL_ENDPOINT",
            source,
        })?),
        None => {
            warnings.push("GRAPHQL_ENDPOINT unset; exported file versions are not reported".to_string());
            None
        }
    };

    let config = Config {
        server,
        dataset_root: env
            .dataset_path
            .clone()
            .or(file.datasets.root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET_ROOT)),
        orchestrator,
        publish,
        aws: AwsConfig {
            access_key_id: env.aws_access_key_id.clone(),
            secret_access_key: env.aws_secret_access_key.clone(),
            region: env.aws_region.clone().or(file.aws.region),
            account_id: env.aws_account_id.clone().or(file.aws.account_id),
        },
        graphql_endpoint,
        metadata,
    };
    Ok(ConfigLoad { config, warnings })
}

fn parsed<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<&str>,
) -> Result<Option<T>, ConfigLoadError> {
    parse_raw(raw).map_err(|value| ConfigLoadError::InvalidValue { key, value })
}

/// Why configuration could not be composed.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// An explicitly requested TOML file does not exist.
    #[error("configuration file missing: {path}")]
    MissingConfig {
        /// Requested path.
        path: PathBuf,
    },
    /// The TOML file could not be read.
    #[error("failed to read configuration {path}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The TOML file is malformed.
    #[error("failed to parse configuration {path}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
    /// The `.env` file exists but is malformed.
    #[error("failed to load environment file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    /// A value does not parse as its key's type.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Environment key the value came from.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// A URL setting does not parse.
    #[error("invalid URL in {key}")]
    InvalidUrl {
        /// Environment key the value came from.
        key: &'static str,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The worker layout cannot make progress.
    #[error("invalid worker configuration: {0}")]
    Orchestrator(#[from] TaskError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        self.default
            .clone()
            .map(|path| (path, ConfigPathProvenance::Default))
    }
}

/// Composed configuration and the warnings raised while composing it.
#[derive(Debug)]
pub struct ConfigLoad {
    /// Composed configuration.
    pub config: Config,
    /// Settings that will only fail once a task needs them.
    pub warnings: Vec<String>,
}
