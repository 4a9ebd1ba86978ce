//! data-hub server entry point.
//!
//! Boots a [`DataHub`] from configuration and serves it as an MCP server on
//! stdio. Logging goes to stderr to avoid interfering with the JSON-RPC
//! protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use datahub_client::HttpFetcher;
use datahub_core::{DataHub, HubConfig, SystemClock};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = HubConfig::load()?;
    let fetcher = HttpFetcher::from_hub_config(&config)?;
    let hub = Arc::new(DataHub::open(&config, Arc::new(fetcher), Arc::new(SystemClock)).await?);

    let sweeper = config.sweep_interval().map(|interval| hub.spawn_sweeper(interval));

    tracing::info!(
        db_path = %config.db_path.display(),
        volatile_capacity = config.volatile_capacity,
        seeded_sources = config.sources.len(),
        "Starting data-hub server on stdio transport"
    );

    let handler = handler::DataHubServer::new(hub);
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}
