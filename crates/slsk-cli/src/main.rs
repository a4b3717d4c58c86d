//! Command-line demonstration of the Soulseek client engine: log in,
//! dispatch a network-wide search, and print results as they arrive.

use async_trait::async_trait;
use clap::Parser;
use dashmap::DashMap;
use slsk_client::{ClientConfig, ImmediateSlotAwaiter, SoulseekClient};
use slsk_net::{Endpoint, EndpointCache};
use slsk_search::SearchScope;
use slsk_transfer::NoopGovernor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Search the Soulseek network from the command line.
#[derive(Parser, Debug)]
#[command(name = "slsk", version, about)]
struct Cli {
    /// Soulseek server address, e.g. server.slsknet.org:2242.
    #[arg(long)]
    server: SocketAddr,

    /// Login username.
    #[arg(long)]
    username: String,

    /// Login password.
    #[arg(long)]
    password: String,

    /// Search query text.
    query: String,

    /// Stop collecting results after this many seconds.
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,
}

struct InMemoryEndpointCache(DashMap<String, Endpoint>);

#[async_trait]
impl EndpointCache for InMemoryEndpointCache {
    async fn get(&self, username: &str) -> Option<Endpoint> {
        self.0.get(username).map(|e| *e.value())
    }

    async fn put(&self, username: &str, endpoint: Endpoint) {
        self.0.insert(username.to_string(), endpoint);
    }

    async fn invalidate(&self, username: &str) {
        self.0.remove(username);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(&cli.username, &cli.password, cli.server);
    config.search_timeout = Duration::from_secs(cli.timeout_secs);

    let endpoint_cache = Arc::new(InMemoryEndpointCache(DashMap::new()));
    let governor = Arc::new(NoopGovernor);
    let slot_awaiter = Arc::new(ImmediateSlotAwaiter);

    let client = SoulseekClient::new(config, endpoint_cache, governor, slot_awaiter);
    client.connect().await?;
    tracing::info!("logged in as {}", cli.username);

    let token = client.search(&cli.query, SearchScope::Network).await?;
    let session = client
        .search_coordinator()
        .get(token)
        .expect("search was just started under this token");

    let results = session.wait_for_completion().await;
    for result in &results {
        println!("{} ({} files, {} bytes/sec)", result.username, result.files.len(), result.upload_speed);
        for file in &result.files {
            println!("  {} ({} bytes)", file.filename, file.size);
        }
    }
    println!("{} peers responded", results.len());

    Ok(())
}
