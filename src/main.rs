use anyhow::{Context, Result};
use bounce::config::ConfigResolver;
use bounce::logging;
use bounce::server::HttpServer;
use bounce::shutdown::SignalSubscription;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "bounce")]
#[command(about = "Redirects requests for its own server names, 404s everything else")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a .toml or .json configuration file
    #[arg(short, long = "config_file", alias = "config-file", env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Resolve the configuration and exit
    #[arg(short = 't', long)]
    test_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::from_env()
        .resolve(args.config_file.as_deref())
        .context("Failed to load configuration")?;

    if args.test_config {
        println!("Configuration test successful");
        return Ok(());
    }

    logging::init(config.log_level)?;

    // subscribe before any listener starts so no signal is missed
    let signals = SignalSubscription::new()?;

    let server = HttpServer::new(Arc::new(config))?;
    let state = server.run(signals.into_stream()).await;
    info!(?state, "exiting");

    Ok(())
}
