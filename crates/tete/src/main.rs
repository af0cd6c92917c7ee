//! # tete
//!
//! Relay server binary: loads configuration, installs logging and metrics,
//! serves until Ctrl-C, then shuts down gracefully.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tete_server::config::{self, ServerConfig};
use tete_server::RelayServer;

/// Anonymous, ephemeral two-party message relay.
#[derive(Parser, Debug)]
#[command(name = "tete", about = "Anonymous, ephemeral two-party message relay")]
struct Cli {
    /// JSON config file (missing file means defaults).
    #[arg(long, env = "TETE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Domain people use to reach this server.
    #[arg(long)]
    domain: Option<String>,

    /// Full link base, overriding the domain-derived one.
    #[arg(long)]
    public_url: Option<String>,

    /// Default log filter (`RUST_LOG` wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layer the flags over a loaded configuration.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(domain) = self.domain {
            config.domain = domain;
        }
        if let Some(url) = self.public_url {
            config.public_url = Some(url);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.json_logs {
            config.json_logs = true;
        }
    }
}

fn load(cli: Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load_config_from_env(),
    };
    cli.apply(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load(Cli::parse())?;
    tete_core::logging::init_subscriber(&config.log_level, config.json_logs);

    let metrics = tete_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RelayServer::new(config).with_metrics(metrics);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind relay listener")?;
    tracing::info!(%addr, links = server.config().links().base(), "tete ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown_gracefully(Some(handle)).await;
    Ok(())
}
