//! Configuration loading for the Tessera worker process.
//!
//! Sources are layered as `.env` file, process environment, then an optional
//! `tessera.toml`; environment values take precedence over the file.

/// Source discovery and composition.
pub mod loader;
pub mod models;
pub mod sources;
pub(crate) mod util;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, compose};
pub use models::{AwsConfig, Config, ConfigMetadata, ServerConfig};
