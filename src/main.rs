//! CLI entry point.
//!
//! Startup failures (configuration, logging, Docker connection, identity)
//! exit non-zero. A terminal run-loop error exits zero once cleanup has
//! completed; the failure itself is in the log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use resim_agent::agent::Agent;
use resim_agent::config::logging::{self, LogConfig};
use resim_agent::config::AgentConfig;
use resim_agent::docker::DockerDriver;

#[derive(Parser, Debug)]
#[command(name = "resim-agent", version, about = "ReSim worker-launch agent")]
struct Cli {
    /// Configuration directory (default ~/resim)
    #[arg(long, env = "RESIM_AGENT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log directory (defaults to the configuration directory)
    #[arg(long, env = "RESIM_AGENT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config =
        AgentConfig::load(cli.config_dir.as_deref()).context("error loading config")?;

    let log_dir = cli.log_dir.unwrap_or_else(|| config.config_dir.clone());
    let _log_guard = logging::init(&LogConfig {
        level: config.log_level.clone(),
        dir: log_dir,
    })
    .context("error initializing logging")?;

    tracing::info!(
        api_host = %config.api_host,
        auth_host = %config.auth_host,
        name = %config.name,
        pool_labels = ?config.pool_labels,
        "loaded config"
    );

    let driver = Arc::new(DockerDriver::connect().context("error initializing Docker client")?);
    let mut agent = Agent::new(config, driver)
        .await
        .context("error starting agent")?;

    if let Err(err) = agent.run().await {
        tracing::error!(error = %err, "agent terminated");
    }
    Ok(())
}
