//! bale CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bale_cli::commands::{dispatch, Cli};
use bale_core::BaleConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match BaleConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over --log-level, which wins over the config file.
    let level = cli.log_level.unwrap_or(config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli, config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
