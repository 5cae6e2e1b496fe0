//! Entity gateway server
//!
//! Usage: `entity-gateway [CONFIG]` (defaults to `gateway.yaml`).
//! The `project` named in the configuration selects the deployment.

use anyhow::{Context, Result};
use gateway::config::GatewayConfig;
use gateway::deployments;
use gateway::server::ServerBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "gateway.yaml".to_string());

    let config = GatewayConfig::from_yaml_file(&path)
        .with_context(|| format!("failed to load configuration from {}", path))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let module = deployments::module_for(&config.project)?;
    tracing::info!(
        "Starting project '{}' on {}",
        config.project,
        config.server.bind
    );

    ServerBuilder::new(config)
        .register_boxed_module(module)
        .serve()
        .await
}
