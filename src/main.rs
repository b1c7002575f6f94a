use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sockbridge::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level if RUST_LOG is not set
            if cfg!(debug_assertions) {
                "sockbridge=debug,warn".into()
            } else {
                "sockbridge=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!("sockbridge relay starting");

    // Log environment loading after logger is initialized
    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    }

    let config = RelayConfig::default();
    info!(
        port = config.port,
        max_connections = config.max_connections,
        ping_interval_secs = config.ping_interval_secs,
        "Loaded relay configuration"
    );

    let mut server = RelayServer::new(config);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.stop().await?;

    Ok(())
}
