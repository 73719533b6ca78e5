//! kwire - Kafka wire protocol endpoint
//!
//! A TCP server that speaks the Kafka framing and answers ApiVersions.

use kwire_server::metrics::run_metrics_server;
use kwire_server::{Config, Metrics, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if KWIRE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    match std::env::var("KWIRE_CONFIG") {
        Ok(path) => tracing::info!("Loaded config from {}", path),
        Err(_) => tracing::info!("No config file set, using defaults and environment"),
    }

    tracing::info!("Starting kwire server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max frame size: {} bytes", config.network.max_frame_bytes);
    tracing::info!("  Error replies: {:?}", config.network.error_replies);

    let mut server_config = ServerConfig::from(&config.network);

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: enabled ({})", config.metrics.bind_addr);
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::new(server_config));

    // Spawn metrics server
    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = server.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    tracing::info!("Server stopped");
    Ok(())
}
