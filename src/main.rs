//! ws-gateway
//!
//! A transparent HTTP gateway that tunnels WebSocket upgrades, built with
//! Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌────────────────────────────────────────────────┐
//!                         │                   GATEWAY                      │
//!   Client Request        │  ┌──────────┐   ┌────────────┐                 │
//!   ──────────────────────┼─▶│  http    │──▶│ upgrade?   │── no ──┐        │
//!                         │  │  server  │   │ (detect)   │        ▼        │
//!                         │  └──────────┘   └─────┬──────┘  ┌───────────┐  │
//!                         │                       │ yes     │passthrough│──┼──▶ Upstream
//!                         │                       ▼         └───────────┘  │
//!                         │  ┌──────────────────────────────────────────┐  │
//!                         │  │ tunnel: handshake → hijack → 101 → relay │──┼──▶ Upstream
//!                         │  └──────────────────────────────────────────┘  │
//!                         │                                                │
//!                         │  config · observability · lifecycle            │
//!                         └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use ws_gateway::config::load_config;
use ws_gateway::lifecycle::{signals, StartupError};
use ws_gateway::observability::{logging, metrics};
use ws_gateway::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "ws-gateway", version, about = "HTTP gateway with WebSocket tunneling")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).map_err(StartupError::from)?;
    logging::init(&config.observability.log_level);

    tracing::info!("ws-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(upstream = %config.upstream.url, "Proxying to upstream");
    if config.upstream.tls_skip_verify {
        tracing::warn!("TLS verification: disabled");
    } else {
        tracing::info!("TLS verification: enabled");
    }
    tracing::info!(
        "WebSocket support: {}",
        if config.websocket.enabled { "enabled" } else { "disabled" }
    );

    // Initialize metrics server
    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = HttpServer::new(config)?;
    let tracker = server.tracker();
    let drain = Duration::from_secs(server.config().timeouts.drain_secs);
    let bind_address = server.config().listener.bind_address.clone();

    // Bind TCP listener
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            addr: bind_address.clone(),
            source,
        })?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let signal = signals::wait_for_signal().await;
        tracing::info!(signal, "Shutting down");
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    let open = tracker.active_count();
    if open > 0 {
        tracing::info!(open_tunnels = open, "Waiting for tunnels to drain");
        if tokio::time::timeout(drain, tracker.wait_for_drain()).await.is_err() {
            tracing::warn!(
                open_tunnels = tracker.active_count(),
                "Drain deadline reached, closing remaining tunnels"
            );
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
