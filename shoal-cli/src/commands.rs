//! CLI command implementations

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use reqwest::{StatusCode, Url};
use shoal_core::config::DEFAULT_CONFIG_PATH;
use shoal_core::{ShoalConfig, SnapshotMap, SnapshotRefresher, TransferRegistry, TransferSnapshot};
use shoal_sim::{Catalog, SimulatedEngineBuilder, SimulationConfig};
use shoal_web::{AppState, run_server};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the registry, refresher and HTTP API over the simulated engine
    Serve {
        /// JSON configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Address to bind the HTTP server to
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,
        /// Directory whose contents the simulated swarm serves
        #[arg(long)]
        library: Option<PathBuf>,
    },
    /// List transfers known to a running server
    List {
        /// Base URL of the server
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Add a magnet link to a running server
    Add {
        /// Magnet URI or 40 character info hash
        magnet: String,
        /// Base URL of the server
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of whichever command ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            config,
            host,
            library,
        } => serve(&config, host, library.as_deref()).await,
        Commands::List { server } => list_transfers(&server).await,
        Commands::Add { magnet, server } => add_magnet(&server, &magnet).await,
    }
}

/// Runs the server until Ctrl-C.
///
/// # Errors
/// - Config file unreadable or malformed
/// - Library directory unreadable
/// - Engine rejected the configuration
/// - HTTP listener could not bind
pub async fn serve(config_path: &Path, host: IpAddr, library: Option<&Path>) -> anyhow::Result<()> {
    let config = ShoalConfig::load(config_path)
        .with_context(|| format!("Loading {}", config_path.display()))?;
    let engine_config = config.engine_config()?;

    let catalog = match library {
        Some(dir) => Catalog::from_dir(dir).await?,
        None => {
            tracing::info!("No library directory given, serving sample content");
            Catalog::sample()
        }
    };
    for entry in catalog.entries() {
        tracing::info!("Available: {} -> {}", entry.name(), entry.magnet());
    }

    let builder = SimulatedEngineBuilder::new(catalog, SimulationConfig::default());
    let registry = Arc::new(TransferRegistry::new(Arc::new(builder)));
    registry
        .configure(engine_config)
        .await
        .context("Configuring transfer engine")?;

    let refresher = SnapshotRefresher::spawn(Arc::clone(&registry), config.refresh_interval());
    let address = SocketAddr::new(host, config.http_server_port);
    let state = AppState::new(Arc::clone(&registry), config.http_server_port);

    let result = run_server(state, address, shutdown_signal()).await;

    refresher.shutdown().await;
    registry.shutdown().await;
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Prints every transfer of a running server.
///
/// # Errors
/// - Server unreachable or answered with an error status
pub async fn list_transfers(server: &str) -> anyhow::Result<()> {
    let url = api_url(server, "torrents")?;
    let transfers: Option<SnapshotMap> = reqwest::get(url)
        .await
        .with_context(|| format!("Contacting {server}"))?
        .error_for_status()?
        .json()
        .await?;

    match transfers {
        None => println!("Server engine is not configured yet"),
        Some(map) if map.is_empty() => println!("No transfers"),
        Some(map) => {
            for snapshot in map.values() {
                print!("{}", format_transfer(snapshot));
            }
        }
    }
    Ok(())
}

/// Posts a magnet link and prints the resulting info hash.
///
/// # Errors
/// - Server unreachable
/// - Server rejected the link
pub async fn add_magnet(server: &str, magnet: &str) -> anyhow::Result<()> {
    let url = api_url(server, "torrents/magnet")?;
    let response = reqwest::Client::new()
        .post(url)
        .form(&[("link", magnet)])
        .send()
        .await
        .with_context(|| format!("Contacting {server}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if status != StatusCode::ACCEPTED {
        let reason = body["error"].as_str().unwrap_or("no reason given");
        bail!("Server rejected magnet ({status}): {reason}");
    }

    println!(
        "Added transfer {}",
        body["info_hash"].as_str().unwrap_or("(unknown)")
    );
    Ok(())
}

fn api_url(server: &str, path: &str) -> anyhow::Result<Url> {
    let base = Url::parse(&format!("{}/api/v1/", server.trim_end_matches('/')))
        .with_context(|| format!("Invalid server URL {server}"))?;
    Ok(base.join(path)?)
}

fn format_transfer(snapshot: &TransferSnapshot) -> String {
    let state = if snapshot.started { "started" } else { "stopped" };
    let mut out = format!(
        "{}  {:5.1}%  {:7}  {}\n",
        snapshot.info_hash,
        snapshot.progress() * 100.0,
        state,
        snapshot.name
    );
    if !snapshot.ready {
        out.push_str("    (waiting for metadata)\n");
    }
    for (index, file) in snapshot.files.iter().enumerate() {
        let _ = writeln!(out, "    [{index}] {} ({} bytes)", file.path, file.length);
    }
    out
}

#[cfg(test)]
mod tests {
    use shoal_core::{FileSnapshot, InfoHash};

    use super::*;

    #[test]
    fn test_api_url() {
        assert_eq!(
            api_url("http://127.0.0.1:8080", "torrents").unwrap().as_str(),
            "http://127.0.0.1:8080/api/v1/torrents"
        );
        assert_eq!(
            api_url("http://media:9000/", "torrents/magnet")
                .unwrap()
                .as_str(),
            "http://media:9000/api/v1/torrents/magnet"
        );
        assert!(api_url("not a url", "torrents").is_err());
    }

    #[test]
    fn test_format_transfer() {
        let snapshot = TransferSnapshot {
            info_hash: InfoHash::new([0xab; 20]),
            name: "show".to_string(),
            total_length: 200,
            completed_length: 50,
            started: true,
            ready: true,
            files: vec![FileSnapshot {
                path: "show/video.mkv".to_string(),
                length: 200,
                offset: 0,
                started: true,
            }],
        };

        let out = format_transfer(&snapshot);
        assert!(out.starts_with(&format!("{}   25.0%  started", "ab".repeat(20))));
        assert!(out.contains("    [0] show/video.mkv (200 bytes)\n"));
    }

    #[test]
    fn test_format_pending_transfer() {
        let snapshot = TransferSnapshot {
            info_hash: InfoHash::new([0x01; 20]),
            name: "pending".to_string(),
            total_length: 0,
            completed_length: 0,
            started: false,
            ready: false,
            files: Vec::new(),
        };
        assert!(format_transfer(&snapshot).contains("waiting for metadata"));
    }
}
