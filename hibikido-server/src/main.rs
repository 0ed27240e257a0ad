//! hibikido-server entry point
//!
//! `hibikido-server --config hibikido.json --log-level debug`
//! Exit code 0 on clean shutdown, non-zero on initialization failure.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use hibikido_common::config::ServerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hibikido-server", about = "Semantic audio retrieval and orchestration server")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    info!(
        "starting hibikido-server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            ServerConfig::load(path)?
        }
        None => {
            info!("no config file given, using defaults");
            ServerConfig::default()
        }
    };

    hibikido_server::server::run(config).await
}
