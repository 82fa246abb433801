//! # watch-relay
//!
//! Room relay server for watch-together clients.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! watch-relay
//!
//! # Run with a config file in the working directory
//! cp relay.example.toml relay.toml && watch-relay
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_ALLOWED_ORIGINS=chrome-extension://abc watch-relay
//! ```

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watch_relay::{config, handlers, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watch_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
