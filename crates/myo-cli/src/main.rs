use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::{cmd_config, cmd_info, cmd_stream};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Info { device, format } => cmd_info(device, format, &config).await,
        Commands::Stream(args) => cmd_stream(args, &config, cli.quiet).await,
        Commands::Config { action } => cmd_config(action, &config),
    }
}
