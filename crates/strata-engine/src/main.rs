//! # Strata
//!
//! Headless driver for the Strata tile world.
//!
//! Loads `strata.toml` (or the path given as the first argument, writing
//! defaults there when it is missing), builds a world, pans a camera across it
//! and shuts down cleanly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;
mod config;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, ConfigLoad, LogFormat, CONFIG_FILE};

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("strata=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);

    let load = AppConfig::read_from(&config_path);
    let config = load.config();
    init_tracing(config.log_format)?;

    info!("Strata starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    load.report(&config_path);
    if matches!(load, ConfigLoad::Missing) {
        if let Err(e) = config.save_to(&config_path) {
            warn!("Failed to write default config: {e}");
        }
    }

    let summary = app::run(&config).await?;

    info!(
        "Simulated {} frames (peak {} chunks ready, {} generated), saved {}, unloaded {}",
        summary.frames,
        summary.peak_ready,
        summary.stats.generated,
        summary.saved,
        summary.unloaded
    );
    info!("Strata shutdown complete");
    Ok(())
}
