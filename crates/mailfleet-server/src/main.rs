//! MailFleet - Provider router entry point

use anyhow::Result;
use mailfleet_common::config::Config;
use mailfleet_common::logging::init_logging;
use mailfleet_core::{ProviderRegistry, ProviderRouter};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match std::env::var_os("MAILFLEET_CONFIG") {
        Some(path) => Config::from_file(&PathBuf::from(path))?,
        None => Config::load()?,
    };

    init_logging(&config.logging)?;
    info!("Starting MailFleet...");

    // Build providers
    let registry = ProviderRegistry::from_config(&config.providers)?;
    if registry.is_empty() {
        warn!("No enabled providers configured; every send will fail");
    }
    info!(providers = ?registry.names(), "Providers registered");

    // Start router and health monitor
    let router = ProviderRouter::start(registry, &config)?;
    if config.health.enabled {
        info!(
            interval_secs = config.health.interval_secs,
            "Provider health monitor started"
        );
    } else {
        info!("Provider health monitor disabled");
    }

    info!("MailFleet started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    router.shutdown().await;

    for (provider, metrics) in router.get_metrics() {
        info!(
            provider = %provider,
            total = metrics.total_requests,
            successful = metrics.successful_requests,
            failed = metrics.failed_requests,
            "Provider totals"
        );
    }
    debug!("Final metrics:\n{}", router.prometheus().encode_text());

    info!("MailFleet shutdown complete");

    Ok(())
}
