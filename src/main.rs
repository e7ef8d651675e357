mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use scrapeproxy::config::Config;
use scrapeproxy::observability::init_tracing;
use std::path::PathBuf;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn load(path: Option<PathBuf>) -> Result<Config, AnyError> {
    let config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let config = load(args.config)?;
            let mut address = config.server.bind_addr;
            if let Some(port) = args.port {
                address.set_port(port);
            }
            scrapeproxy::api::run(config, address).await?;
        }
        Commands::Check(args) => {
            let config = load(args.config)?;
            let catalog = config.catalog();
            info!(
                services = catalog.services().len(),
                metrics = catalog.metrics().len(),
                "Configuration is valid"
            );
        }
    }

    Ok(())
}
