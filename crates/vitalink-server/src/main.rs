//! # Vitalink Server
//!
//! Realtime messaging hub for doctor/patient consultations.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vitalink
//!
//! # Run with a config file at one of the default paths
//! # (vitalink.toml, /etc/vitalink/vitalink.toml, ~/.config/vitalink/vitalink.toml)
//!
//! # Run with environment variables
//! VITALINK_PORT=8080 VITALINK_HOST=0.0.0.0 VITALINK_JWT_SECRET=... vitalink
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod pump;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitalink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Vitalink server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
