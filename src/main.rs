//! Whale Feed
//!
//! Runs one scan of the configured node and writes the RSS feed if anything new
//! crossed the threshold. Intended to be invoked periodically by an external scheduler.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use whale_feed::{NodeClient, PhraseFormatter, Watcher, WatcherConfig};

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting RSS feed generation process");

    let config = match WatcherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let client = match NodeClient::new(config.node.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Cannot create node client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Watching {} for outputs over {} in the last {} blocks",
        client.url(),
        config.threshold,
        config.window_size
    );

    let watcher = Watcher::new(config, client, Box::new(PhraseFormatter::from_entropy()));
    match watcher.run().await {
        Ok(report) => {
            info!(
                "RSS feed generation process completed: {} qualifying transactions found",
                report.events.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
