use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scrapeproxy")]
#[command(about = "Prometheus exporter that turns JSON APIs into metrics", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the metrics endpoint
    Server(ServerArgs),
    /// Load and validate the configuration, then exit
    Check(CheckArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Main configuration file (defaults to $SCRAPEPROXY_CONFIG or config/scrapeproxy.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding server.bind_addr
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Main configuration file (defaults to $SCRAPEPROXY_CONFIG or config/scrapeproxy.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_args() {
        let cli = Cli::parse_from(["scrapeproxy", "server", "--config", "a.toml", "--port", "9100"]);
        let Commands::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert_eq!(args.config, Some(PathBuf::from("a.toml")));
        assert_eq!(args.port, Some(9100));
    }

    #[test]
    fn test_check_defaults() {
        let cli = Cli::parse_from(["scrapeproxy", "check"]);
        assert!(matches!(cli.command, Commands::Check(CheckArgs { config: None })));
    }
}
