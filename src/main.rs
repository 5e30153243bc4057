use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = slack_irc_gateway::config::ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(ref dir) = config.download_location {
        if !dir.is_dir() {
            bail!("missing or invalid download directory: {}", dir.display());
        }
    }

    tracing::info!("starting server on {}", config.listen_addr());
    let server = slack_irc_gateway::server::Server::new(config);
    server.run().await
}
