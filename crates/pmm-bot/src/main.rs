//! Perp market-making robot - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

/// Exit status asking the external supervisor for a restart.
const RESTART_EXIT_CODE: i32 = 99;

/// Perp market-making robot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PMM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Quote with live sizing instead of the simulated entry size
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the TLS provider before any connection is opened.
    pmm_session::init_crypto();

    let args = Args::parse();

    pmm_bot::telemetry::init_logging()?;

    info!("Starting pmm-bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("PMM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = pmm_bot::AppConfig::from_file(&config_path)?;
    if args.live {
        config.live = true;
    }
    info!(symbol = %config.symbol, live = config.live, "Configuration loaded");

    let app = pmm_bot::Application::new(config)?;

    if let Err(err) = app.run().await {
        if err.requires_restart() {
            error!(%err, "Fatal fault, requesting supervisor restart");
            std::process::exit(RESTART_EXIT_CODE);
        }
        return Err(err.into());
    }

    Ok(())
}
