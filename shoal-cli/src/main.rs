//! Shoal CLI - Command-line interface
//!
//! Runs the stream server or talks to a running one over its JSON API.

mod commands;

use anyhow::Context;
use clap::Parser;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Stream torrent files over HTTP while they download")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, global = true, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None).context("Failed to initialize tracing")?;

    commands::handle_command(cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Commands;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "shoal",
            "serve",
            "--library",
            "/media",
            "--host",
            "0.0.0.0",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level, CliLogLevel::Debug);
        let Commands::Serve {
            config,
            host,
            library,
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(config, std::path::PathBuf::from("./shoal.json"));
        assert_eq!(host.to_string(), "0.0.0.0");
        assert_eq!(library, Some(std::path::PathBuf::from("/media")));
    }

    #[test]
    fn test_parse_add_requires_magnet() {
        assert!(Cli::try_parse_from(["shoal", "add"]).is_err());

        let cli = Cli::try_parse_from(["shoal", "add", "magnet:?xt=urn:btih:abc"]).unwrap();
        assert!(matches!(cli.command, Commands::Add { .. }));
    }
}
