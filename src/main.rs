//! tetherd - persistent-connection message server.
//!
//! Composition root: loads configuration, assembles the dispatch
//! pipeline and server, and runs until interrupted. Application
//! handlers are registered on the two layers by the embedding
//! deployment; the daemon itself stays protocol-only.

use std::sync::Arc;
use tether_server::{Config, Dispatcher, HandlerTable, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if TETHER_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("TETHER_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("TETHER_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting tetherd");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max body size: {} bytes", config.protocol.max_body_size);

    let scripted = Arc::new(HandlerTable::new("scripted"));
    let native = Arc::new(HandlerTable::new("native"));
    let dispatcher = Arc::new(Dispatcher::new(scripted, native));

    let server = Arc::new(Server::new(ServerConfig::from(&config), dispatcher));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;

    tracing::info!("tetherd stopped");
    Ok(())
}
