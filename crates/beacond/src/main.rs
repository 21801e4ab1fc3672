//! beacond — the beacon signaling broker daemon.
//!
//! Wires configuration, logging, metrics, the WebSocket server, and the
//! periodic scans together, then waits for Ctrl-C.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;

use beacon_server::config::ServerConfig;
use beacon_server::metrics;
use beacon_server::server::BeaconServer;

/// Beacon signaling broker.
#[derive(Parser, Debug)]
#[command(name = "beacond", about = "WebRTC signaling and presence broker")]
struct Cli {
    /// Host to bind (overrides BEACON_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides BEACON_PORT; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if std::env::var("BEACON_AUTH_SECRET").is_err() {
        tracing::warn!("BEACON_AUTH_SECRET is not set; using the development secret");
    }

    let metrics_handle = metrics::install_recorder();
    let server = BeaconServer::new(config, metrics_handle);
    server.start_scans();

    let (addr, server_task) = server.listen().await.context("failed to bind server")?;
    tracing::info!(%addr, "beacond ready");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    server.shutdown().graceful_shutdown(None).await;
    let _ = server_task.await;
    Ok(())
}
