use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tessera_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use tessera_core::TaskSystem;
use tessera_core::publish::{GithubClient, GraphqlCallback, MetadataCallback};
use tessera_core::store::{AnnexStore, DatasetStore, InMemoryStore};
use tessera_server::{AppState, callback::UnreportedVersions, create_app};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "tessera-server")]
#[command(about = "Dataset snapshot and publish task workers")]
struct Cli {
    /// Path to tessera.toml
    #[arg(long, env = "TESSERA_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Keep datasets in memory instead of git-annex repositories
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Listen address (overrides SERVER_HOST/SERVER_PORT)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "tessera_server=info,tessera_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings {
        warn!(message = %warning, "configuration warning");
    }
    info!(
        workers.partitions = config.orchestrator.partitions,
        workers.dataset_concurrency = config.orchestrator.concurrency.dataset,
        workers.publish_concurrency = config.orchestrator.concurrency.publish,
        workers.join_strategy = %config.orchestrator.join_strategy,
        "worker configuration in effect"
    );

    let system = build_system(&config, cli.in_memory)?;
    system.start().await;

    let shutdown = system.runtime().shutdown_token();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let addr = cli.bind.unwrap_or_else(|| config.server.bind_addr());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "task intake listening");

    let app = create_app(AppState::new(system.submitter()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("intake server failed")?;

    system.shutdown().await;
    Ok(())
}

fn build_system(config: &Config, in_memory: bool) -> anyhow::Result<TaskSystem> {
    let store: Arc<dyn DatasetStore> = if in_memory {
        warn!("using in-memory dataset store; nothing is persisted");
        Arc::new(InMemoryStore::with_root(&config.dataset_root))
    } else {
        info!(root = %config.dataset_root.display(), "using git-annex dataset store");
        Arc::new(AnnexStore::new(&config.dataset_root).with_env(config.aws.annex_env()))
    };

    let github = &config.publish.github;
    let code_host = GithubClient::new(
        github.login.clone().unwrap_or_default(),
        github.password.clone().unwrap_or_default(),
    )
    .context("failed to build GitHub client")?;

    let callback: Arc<dyn MetadataCallback> = match &config.graphql_endpoint {
        Some(endpoint) => Arc::new(GraphqlCallback::new(endpoint.clone())),
        None => Arc::new(UnreportedVersions),
    };

    TaskSystem::build(
        &config.orchestrator,
        store,
        config.publish.clone(),
        Arc::new(code_host),
        callback,
    )
    .context("failed to assemble task system")
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    token.cancel();
}
