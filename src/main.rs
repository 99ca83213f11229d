use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use athena_node::config::{self, Config, ConfigError};
use athena_node::{metrics, NodeGroup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config();
    if config.nodes.is_empty() {
        warn!("No backend nodes configured");
    }

    let group = Arc::new(NodeGroup::from_config(&config)?);
    for node in group.snapshots() {
        info!(
            node = %node.name,
            role = node.role,
            read_weight = node.read_weight,
            write_weight = node.write_weight,
            capacity = node.pool.capacity,
            "Node registered"
        );
    }

    let shutdown = CancellationToken::new();
    let server = {
        let addr = config.server.metrics_addr.clone();
        let group = Arc::clone(&group);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(&addr, group, shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, draining nodes");

    shutdown.cancel();
    group.close_all().await;
    if let Err(e) = server.await {
        warn!(error = %e, "Metrics server task failed");
    }
    info!("Shutdown complete");
    Ok(())
}

fn load_or_default_config() -> Config {
    let config_paths = ["config/athena-node.toml", "athena-node.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = path, "Config file not found");
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
