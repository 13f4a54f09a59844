//! Fleet agent entrypoint.

use anyhow::Context;
use clap::Parser;
use fleet_agent::agent::{load_api_key, load_or_create_agent_id, register_and_store_key};
use fleet_agent::{AgentConfig, FleetAgent, ManagerClient};
use fleet_core::ports::ManagerApi;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fleet-agent")]
#[command(author, version, about = "Fleet machine agent", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Manager base URL. Overrides the file and FLEET_MANAGER_URL.
    #[arg(long)]
    manager_url: Option<String>,

    /// Maximum tasks executed at once.
    #[arg(long)]
    max_concurrent_tasks: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = cli.manager_url {
        config.manager_url = url;
    }
    if let Some(n) = cli.max_concurrent_tasks {
        config.max_concurrent_tasks = n;
    }
    config.validate()?;

    fleet_trace::init_tracing(&config.log)?;

    let agent_id = load_or_create_agent_id(config.agent_id, &config.agent_id_file())
        .context("resolving agent id")?;
    let api_key = load_api_key(config.api_key.clone(), &config.api_key_file())?;

    let selection = fleet_runtime::negotiate(&config.runtime)
        .await
        .context("no usable runtime on this host")?;

    let client = Arc::new(ManagerClient::new(
        &config.manager_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?);
    let key_file = config.api_key_file();
    let agent = FleetAgent::new(
        config,
        agent_id,
        Arc::clone(&client) as Arc<dyn ManagerApi>,
        selection,
    );

    register_and_store_key(&agent, &client, &key_file).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    agent.run(shutdown).await?;
    Ok(())
}
